//! Sync configuration.
//!
//! Loaded from TOML; every field has a default so an empty or missing file
//! yields a working setup. The value is passed explicitly into the parser
//! and the orchestrator.
//!
//! ```toml
//! [lang]
//! source = "en"
//! target = "zh"
//!
//! [sync]
//! auto_sync = true
//! debounce_ms = 1200
//! comment = "auto"     # auto | latex | markdown | custom
//!
//! [generation]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [references]
//! glossary = [{ source = "kernel", target = "内核" }]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use syncwright_types::{BlockParser, CommentSyntax, Languages};
use thiserror::Error;

use crate::llm::References;
use crate::locator::{DEFAULT_BLOCKS_PER_DOCUMENT, DEFAULT_DOCUMENTS};
use crate::response_cache::DEFAULT_RESPONSES;

pub const DEFAULT_DEBOUNCE_MS: u64 = 1200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub lang: Languages,
    pub sync: SyncSection,
    pub locator: LocatorConfig,
    pub cache: CacheConfig,
    pub generation: GenerationConfig,
    pub references: References,
}

/// Which comment syntax markers use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentKind {
    /// Chosen from the file extension, LaTeX when unknown.
    #[default]
    Auto,
    Latex,
    Markdown,
    /// `open`/`close` from the same section.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Start a sync when an edited part becomes complete.
    pub auto_sync: bool,
    /// Delay between a sync request and the generation call.
    pub debounce_ms: u64,
    pub comment: CommentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            auto_sync: true,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            comment: CommentKind::Auto,
            open: None,
            close: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub blocks_per_document: usize,
    pub documents: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            blocks_per_document: DEFAULT_BLOCKS_PER_DOCUMENT,
            documents: DEFAULT_DOCUMENTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub responses: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            responses: DEFAULT_RESPONSES,
        }
    }
}

/// OpenAI-compatible endpoint settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Inline key; takes precedence over `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_key_env: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl GenerationConfig {
    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .finish()
    }
}

impl SyncConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.comment == CommentKind::Custom
            && self.sync.open.as_deref().is_none_or(|o| o.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "comment = \"custom\" requires a non-empty `open` token".into(),
            ));
        }
        if self.locator.blocks_per_document == 0 || self.locator.documents == 0 {
            return Err(ConfigError::Invalid("locator capacities must be non-zero".into()));
        }
        if self.cache.responses == 0 {
            return Err(ConfigError::Invalid("cache.responses must be non-zero".into()));
        }
        Ok(())
    }

    pub fn languages(&self) -> Languages {
        self.lang
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.sync.debounce_ms)
    }

    /// Comment syntax for a file with the given extension.
    pub fn comment_syntax(&self, extension: Option<&str>) -> CommentSyntax {
        match self.sync.comment {
            CommentKind::Auto => extension
                .and_then(CommentSyntax::for_extension)
                .unwrap_or_default(),
            CommentKind::Latex => CommentSyntax::latex(),
            CommentKind::Markdown => CommentSyntax::markdown(),
            CommentKind::Custom => {
                let open = self.sync.open.clone().unwrap_or_default();
                match self.sync.close.as_deref().filter(|c| !c.is_empty()) {
                    Some(close) => CommentSyntax::delimited(open, close),
                    None => CommentSyntax::line(open),
                }
            }
        }
    }

    pub fn parser(&self, extension: Option<&str>) -> BlockParser {
        BlockParser::new(self.comment_syntax(extension), self.languages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncwright_types::Lang;

    #[test]
    fn test_empty_config_is_default() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert!(config.sync.auto_sync);
        assert_eq!(config.debounce(), Duration::from_millis(1200));
        assert_eq!(config.languages(), Languages::new(Lang::En, Lang::Zh));
    }

    #[test]
    fn test_full_config() {
        let config = SyncConfig::from_toml_str(
            r#"
            [lang]
            source = "ja"
            target = "en"

            [sync]
            auto_sync = false
            debounce_ms = 300
            comment = "custom"
            open = "//"

            [generation]
            model = "local"
            api_key = "sk-test"

            [references]
            glossary = [{ source = "カーネル", target = "kernel" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.languages(), Languages::new(Lang::Ja, Lang::En));
        assert!(!config.sync.auto_sync);
        assert_eq!(config.comment_syntax(Some("md")), CommentSyntax::line("//"));
        assert_eq!(config.generation.resolve_api_key().as_deref(), Some("sk-test"));
        assert_eq!(config.generation.base_url, "https://api.openai.com/v1");
        assert_eq!(config.references.glossary.len(), 1);
        assert!(!format!("{:?}", config.generation).contains("sk-test"));
    }

    #[test]
    fn test_auto_comment_follows_extension() {
        let config = SyncConfig::default();
        assert_eq!(config.comment_syntax(Some("md")), CommentSyntax::markdown());
        assert_eq!(config.comment_syntax(Some("tex")), CommentSyntax::latex());
        assert_eq!(config.comment_syntax(None), CommentSyntax::latex());
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        assert!(matches!(
            SyncConfig::from_toml_str("[sync]\ncomment = \"custom\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str("[cache]\nresponses = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str("[lang]\nsource = \"klingon\"\ntarget = \"en\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }
}
