//! Marker line grammar.
//!
//! A marker is the comment-embedded line that names a block and carries its
//! source text:
//!
//! ```text
//! <indent><open>sync<glyph><uid6> <free text><close?>
//!
//! %sync>ab12cd Hello there.            (LaTeX, single-line comments)
//! <!--sync|ab12cd Hello there.-->      (Markdown, delimited comments)
//! ```
//!
//! Column ranges are measured in `char`s so hosts can address edits in
//! documents with multi-byte text.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{UID_LEN, Uid, is_uid_byte};
use crate::status::SyncStatus;

/// Literal tag that opens every marker after the comment token.
pub const MARKER_TAG: &str = "sync";

/// Length in chars of `sync<glyph><uid>`.
pub const PREFIX_LEN: usize = MARKER_TAG.len() + 1 + UID_LEN;

/// Errors from parsing markers and marker components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line does not start with comment token {0:?}")]
    MissingCommentOpen(String),

    #[error("comment is not a sync marker")]
    MissingTag,

    #[error("unknown status glyph {0:?}")]
    UnknownGlyph(char),

    #[error("invalid uid {0:?} (expected 6 lowercase alphanumerics)")]
    InvalidUid(String),

    #[error("expected a single space after the uid")]
    MissingSeparator,

    #[error("comment is not closed with {0:?}")]
    MissingCommentClose(String),
}

/// How the host file format wraps comments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentSyntax {
    /// Token opening a comment (`%`, `<!--`, `//`).
    pub open: String,
    /// Token closing a delimited comment; `None` for line comments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<String>,
}

impl CommentSyntax {
    /// Line comments (`%`), one token per line.
    pub fn latex() -> Self {
        Self::line("%")
    }

    /// Delimited HTML comments.
    pub fn markdown() -> Self {
        Self::delimited("<!--", "-->")
    }

    /// Line-comment syntax with the given token.
    pub fn line(open: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: None,
        }
    }

    /// Delimited-comment syntax with the given tokens.
    pub fn delimited(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: Some(close.into()),
        }
    }

    /// Pick the syntax for a file extension.
    pub fn for_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "tex" | "latex" | "sty" | "cls" => Some(Self::latex()),
            "md" | "markdown" | "mdx" => Some(Self::markdown()),
            _ => None,
        }
    }

    /// Whether comments end at the line break.
    pub fn is_single_line(&self) -> bool {
        self.close.is_none()
    }

    /// Wrap text in a comment.
    ///
    /// For single-line syntax every embedded line gets its own open token.
    pub fn wrap(&self, text: &str) -> String {
        let body = if self.is_single_line() {
            text.replace('\n', &format!("\n{}", self.open))
        } else {
            text.to_string()
        };
        format!("{}{}{}", self.open, body, self.close.as_deref().unwrap_or(""))
    }

    /// Whether a line is a comment under this syntax (after indentation).
    pub fn is_comment(&self, line: &str) -> bool {
        line.trim_start().starts_with(&self.open)
    }
}

impl Default for CommentSyntax {
    fn default() -> Self {
        Self::latex()
    }
}

/// The `sync<glyph><uid>` prefix for a status and uid.
///
/// Exact inverse of the prefix portion of [`Marker::parse`].
pub fn format_prefix(status: SyncStatus, uid: Uid) -> String {
    format!("{MARKER_TAG}{}{uid}", status.glyph())
}

/// A parsed marker line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Marker {
    /// Leading whitespace before the comment token.
    pub indent: String,
    pub status: SyncStatus,
    pub uid: Uid,
    /// Free text (the source part).
    pub text: String,
    /// Char columns of `sync<glyph><uid>` within the line.
    pub prefix_cols: Range<usize>,
    /// Char columns of the free text within the line.
    pub text_cols: Range<usize>,
}

impl Marker {
    /// Parse a full line under the given comment syntax.
    pub fn parse(line: &str, syntax: &CommentSyntax) -> Result<Self, ParseError> {
        let body = line.trim_start();
        let indent = &line[..line.len() - body.len()];

        let rest = body
            .strip_prefix(syntax.open.as_str())
            .ok_or_else(|| ParseError::MissingCommentOpen(syntax.open.clone()))?;
        let rest = rest.strip_prefix(MARKER_TAG).ok_or(ParseError::MissingTag)?;

        let glyph = rest.chars().next().ok_or(ParseError::MissingTag)?;
        let status = SyncStatus::from_glyph(glyph).ok_or(ParseError::UnknownGlyph(glyph))?;
        let rest = &rest[glyph.len_utf8()..];

        let uid_end = rest
            .bytes()
            .position(|b| !is_uid_byte(b))
            .unwrap_or(rest.len());
        if uid_end != UID_LEN {
            let shown: String = rest.chars().take(UID_LEN + 1).collect();
            return Err(ParseError::InvalidUid(shown));
        }
        let uid = Uid::parse(&rest[..UID_LEN])?;
        let rest = rest[UID_LEN..]
            .strip_prefix(' ')
            .ok_or(ParseError::MissingSeparator)?;

        let text = match &syntax.close {
            None => rest,
            Some(close) => rest
                .trim_end()
                .strip_suffix(close.as_str())
                .ok_or_else(|| ParseError::MissingCommentClose(close.clone()))?,
        };

        let prefix_start = indent.chars().count() + syntax.open.chars().count();
        let text_start = prefix_start + PREFIX_LEN + 1;
        Ok(Self {
            indent: indent.to_string(),
            status,
            uid,
            text: text.to_string(),
            prefix_cols: prefix_start..prefix_start + PREFIX_LEN,
            text_cols: text_start..text_start + text.chars().count(),
        })
    }

    /// Parse, treating any malformation as "no marker here".
    pub fn try_parse(line: &str, syntax: &CommentSyntax) -> Option<Self> {
        Self::parse(line, syntax).ok()
    }

    /// The `sync<glyph><uid>` prefix of this marker.
    pub fn prefix(&self) -> String {
        format_prefix(self.status, self.uid)
    }

    /// Render the full line back out.
    pub fn render(&self, syntax: &CommentSyntax) -> String {
        format!("{}{}", self.indent, render_marker(syntax, self.status, self.uid, &self.text))
    }
}

/// Render a marker line with no indentation.
pub fn render_marker(syntax: &CommentSyntax, status: SyncStatus, uid: Uid, text: &str) -> String {
    syntax.wrap(&format!("{} {}", format_prefix(status, uid), text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> Uid {
        Uid::parse(s).unwrap()
    }

    #[test]
    fn test_parse_latex_marker() {
        let marker = Marker::parse("%sync>ab12cd hello", &CommentSyntax::latex()).unwrap();
        assert_eq!(marker.status, SyncStatus::S2t);
        assert_eq!(marker.uid, uid("ab12cd"));
        assert_eq!(marker.text, "hello");
        assert_eq!(marker.prefix_cols, 1..12);
        assert_eq!(marker.text_cols, 13..18);
    }

    #[test]
    fn test_parse_markdown_marker() {
        let line = "  <!--sync|zz0099 Bonjour le monde.-->";
        let marker = Marker::parse(line, &CommentSyntax::markdown()).unwrap();
        assert_eq!(marker.indent, "  ");
        assert_eq!(marker.status, SyncStatus::Synced);
        assert_eq!(marker.text, "Bonjour le monde.");
        assert_eq!(marker.prefix_cols, 6..17);
    }

    #[test]
    fn test_parse_allows_empty_text() {
        let marker = Marker::parse("%sync<000000 ", &CommentSyntax::latex()).unwrap();
        assert_eq!(marker.text, "");
        assert_eq!(marker.text_cols, 13..13);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let latex = CommentSyntax::latex();
        assert_eq!(
            Marker::parse("sync>ab12cd x", &latex),
            Err(ParseError::MissingCommentOpen("%".into()))
        );
        assert_eq!(Marker::parse("% plain comment", &latex), Err(ParseError::MissingTag));
        assert_eq!(Marker::parse("%sync?ab12cd x", &latex), Err(ParseError::UnknownGlyph('?')));
        assert!(matches!(Marker::parse("%sync>AB12CD x", &latex), Err(ParseError::InvalidUid(_))));
        assert!(matches!(Marker::parse("%sync>ab12cde x", &latex), Err(ParseError::InvalidUid(_))));
        assert_eq!(Marker::parse("%sync>ab12cd", &latex), Err(ParseError::MissingSeparator));
        assert_eq!(
            Marker::parse("<!--sync>ab12cd open", &CommentSyntax::markdown()),
            Err(ParseError::MissingCommentClose("-->".into()))
        );
    }

    #[test]
    fn test_render_roundtrip() {
        let cases = [
            ("%sync>ab12cd hello", CommentSyntax::latex()),
            ("    %sync+a1b2c3 indented text.", CommentSyntax::latex()),
            ("<!--sync<qwerty 中文内容。-->", CommentSyntax::markdown()),
            ("// sync|000000 not a marker", CommentSyntax::line("//")),
            ("//sync|000000 ", CommentSyntax::line("//")),
        ];
        for (line, syntax) in cases {
            match Marker::try_parse(line, &syntax) {
                Some(marker) => assert_eq!(marker.render(&syntax), line),
                None => assert!(line.starts_with("// ")),
            }
        }
    }

    #[test]
    fn test_multibyte_columns() {
        let marker = Marker::parse("%sync>ab12cd 你好。", &CommentSyntax::latex()).unwrap();
        assert_eq!(marker.text_cols, 13..16);
    }

    #[test]
    fn test_wrap_single_line_prefixes_each_line() {
        assert_eq!(CommentSyntax::latex().wrap("a\nb"), "%a\n%b");
        assert_eq!(CommentSyntax::markdown().wrap("a\nb"), "<!--a\nb-->");
    }

    #[test]
    fn test_format_prefix() {
        assert_eq!(format_prefix(SyncStatus::Syncing, uid("ab12cd")), "sync+ab12cd");
        assert_eq!(format_prefix(SyncStatus::T2s, uid("ab12cd")).chars().count(), PREFIX_LEN);
    }

    #[test]
    fn test_syntax_for_extension() {
        assert_eq!(CommentSyntax::for_extension("TEX"), Some(CommentSyntax::latex()));
        assert_eq!(CommentSyntax::for_extension("md"), Some(CommentSyntax::markdown()));
        assert_eq!(CommentSyntax::for_extension("rs"), None);
    }
}
