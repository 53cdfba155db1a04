//! Languages and their sentence-separator sets.
//!
//! Separators are a fixed table per language family; a part is complete when
//! its last character is one of them.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

const ASCII_SEPARATORS: &[char] = &[',', '.', ';', '!', '?'];
const CJK_SEPARATORS: &[char] = &['，', '。', '；', '！', '？'];

/// A supported part language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Lang {
    #[default]
    Default,
    En,
    Zh,
    Ja,
    Ko,
}

impl Lang {
    /// Parse from a language code (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Language code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Default => "default",
            Lang::En => "en",
            Lang::Zh => "zh",
            Lang::Ja => "ja",
            Lang::Ko => "ko",
        }
    }

    /// Human-readable name, as handed to the generation service.
    pub fn name(&self) -> &'static str {
        match self {
            Lang::Default => "Default",
            Lang::En => "English",
            Lang::Zh => "Chinese",
            Lang::Ja => "Japanese",
            Lang::Ko => "Korean",
        }
    }

    /// Sentence-separator characters for this language.
    pub fn separators(&self) -> &'static [char] {
        match self {
            Lang::Default | Lang::En => ASCII_SEPARATORS,
            Lang::Zh | Lang::Ja | Lang::Ko => CJK_SEPARATORS,
        }
    }

    /// Whether `text` ends with one of this language's separators.
    pub fn is_complete(&self, text: &str) -> bool {
        text.chars()
            .next_back()
            .is_some_and(|c| self.separators().contains(&c))
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The language pair for a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Languages {
    pub source: Lang,
    pub target: Lang,
}

impl Languages {
    pub fn new(source: Lang, target: Lang) -> Self {
        Self { source, target }
    }

    /// Language of the given part.
    pub fn of(&self, part: crate::PartKind) -> Lang {
        match part {
            crate::PartKind::Source => self.source,
            crate::PartKind::Target => self.target,
        }
    }
}

impl Default for Languages {
    fn default() -> Self {
        Self::new(Lang::En, Lang::Zh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_completeness() {
        assert!(Lang::En.is_complete("Hello."));
        assert!(Lang::En.is_complete("Wait,"));
        assert!(!Lang::En.is_complete("Hello"));
        assert!(!Lang::En.is_complete(""));
    }

    #[test]
    fn test_cjk_completeness_uses_full_width() {
        assert!(Lang::Zh.is_complete("你好。"));
        assert!(!Lang::Zh.is_complete("你好."));
        assert!(Lang::Ja.is_complete("こんにちは！"));
    }

    #[test]
    fn test_parse_codes() {
        assert_eq!(Lang::from_str("EN"), Some(Lang::En));
        assert_eq!(Lang::from_str("ko"), Some(Lang::Ko));
        assert_eq!(Lang::from_str("fr"), None);
        assert_eq!(Lang::Zh.name(), "Chinese");
    }
}
