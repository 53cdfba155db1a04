//! Blocks: a marker line, a separator line, and a target line.
//!
//! ```text
//! line n     %sync>ab12cd Hello there.     <- marker, owns the source part
//! line n+1                                 <- separator (not inspected)
//! line n+2   你好。                         <- target part
//! ```
//!
//! Parsing is purely line-addressed through [`LineSource`], so the same code
//! serves in-memory buffers, files on disk, and host editor documents.

use std::ops::{Range, RangeInclusive};

use serde::{Deserialize, Serialize};

use crate::ids::Uid;
use crate::lang::{Lang, Languages};
use crate::marker::{CommentSyntax, Marker, render_marker};
use crate::status::{PartKind, SyncStatus};

/// Lines between a marker and its target line.
pub const TARGET_OFFSET: usize = 2;

/// Line-addressed read access to a document.
pub trait LineSource {
    /// Number of lines in the document.
    fn line_count(&self) -> usize;

    /// Text of a line without its terminator; `None` past the end.
    fn line_text(&self, line: usize) -> Option<String>;
}

impl LineSource for [String] {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line_text(&self, line: usize) -> Option<String> {
        self.get(line).cloned()
    }
}

impl LineSource for Vec<String> {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line_text(&self, line: usize) -> Option<String> {
        self.get(line).cloned()
    }
}

/// One half of a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub kind: PartKind,
    pub lang: Lang,
    pub text: String,
    /// Line the part lives on.
    pub line: usize,
    /// Char columns of the text within that line.
    pub cols: Range<usize>,
}

impl Part {
    /// Non-empty and ends with one of the language's separators.
    pub fn complete(&self) -> bool {
        self.lang.is_complete(&self.text)
    }
}

/// A parsed block at a specific document version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub uid: Uid,
    pub status: SyncStatus,
    /// Line of the marker.
    pub line: usize,
    /// Char columns of `sync<glyph><uid>` on the marker line.
    pub prefix_cols: Range<usize>,
    pub source: Part,
    pub target: Part,
}

impl Block {
    pub fn part(&self, kind: PartKind) -> &Part {
        match kind {
            PartKind::Source => &self.source,
            PartKind::Target => &self.target,
        }
    }

    /// The authoritative part, if the block is dirty.
    pub fn from_part(&self) -> Option<&Part> {
        self.status.from_part().map(|kind| self.part(kind))
    }

    /// The part to be regenerated, if the block is dirty.
    pub fn to_part(&self) -> Option<&Part> {
        self.status.to_part().map(|kind| self.part(kind))
    }

    pub fn target_line(&self) -> usize {
        self.line + TARGET_OFFSET
    }

    /// Marker through target line.
    pub fn lines(&self) -> RangeInclusive<usize> {
        self.line..=self.target_line()
    }

    /// Which part a document line belongs to; the separator belongs to neither.
    pub fn part_at(&self, line: usize) -> Option<PartKind> {
        if line == self.line {
            Some(PartKind::Source)
        } else if line == self.target_line() {
            Some(PartKind::Target)
        } else {
            None
        }
    }
}

/// Parses blocks under one comment syntax and language pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockParser {
    pub syntax: CommentSyntax,
    pub languages: Languages,
}

impl BlockParser {
    pub fn new(syntax: CommentSyntax, languages: Languages) -> Self {
        Self { syntax, languages }
    }

    /// The block whose marker is on `line`.
    ///
    /// Needs a target line inside the document, and rejects a target line
    /// that is itself a marker so blocks never nest. Any other line counts as
    /// target text, including a plain comment; such a target is dropped by
    /// export along with the markers.
    pub fn parse_at<D: LineSource + ?Sized>(&self, doc: &D, line: usize) -> Option<Block> {
        let target_line = line + TARGET_OFFSET;
        if target_line >= doc.line_count() {
            return None;
        }
        let marker = Marker::try_parse(&doc.line_text(line)?, &self.syntax)?;
        let target_text = doc.line_text(target_line)?;
        if Marker::try_parse(&target_text, &self.syntax).is_some() {
            return None;
        }

        let target_len = target_text.chars().count();
        Some(Block {
            uid: marker.uid,
            status: marker.status,
            line,
            prefix_cols: marker.prefix_cols,
            source: Part {
                kind: PartKind::Source,
                lang: self.languages.source,
                text: marker.text,
                line,
                cols: marker.text_cols,
            },
            target: Part {
                kind: PartKind::Target,
                lang: self.languages.target,
                text: target_text,
                line: target_line,
                cols: 0..target_len,
            },
        })
    }

    /// The block covering `line` as either its marker or its target line.
    pub fn parse_at_any<D: LineSource + ?Sized>(&self, doc: &D, line: usize) -> Option<Block> {
        self.parse_at(doc, line).or_else(|| {
            line.checked_sub(TARGET_OFFSET)
                .and_then(|marker_line| self.parse_at(doc, marker_line))
        })
    }

    /// Every block in the document, top to bottom.
    pub fn scan<D: LineSource + ?Sized>(&self, doc: &D) -> Vec<Block> {
        (0..doc.line_count())
            .filter_map(|line| self.parse_at(doc, line))
            .collect()
    }

    /// Text inserted to create a new, empty block: marker, separator and an
    /// empty target line.
    pub fn new_block_text(&self, uid: Uid) -> String {
        format!("{}\n\n", render_marker(&self.syntax, SyncStatus::T2s, uid, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Vec<String> {
        text.split('\n').map(str::to_string).collect()
    }

    fn latex() -> BlockParser {
        BlockParser::new(CommentSyntax::latex(), Languages::new(Lang::En, Lang::Zh))
    }

    #[test]
    fn test_parse_block_triple() {
        let lines = doc("intro\n%sync>ab12cd Hello.\n\n你好。\ntail");
        let block = latex().parse_at(&lines, 1).unwrap();
        assert_eq!(block.uid.as_str(), "ab12cd");
        assert_eq!(block.status, SyncStatus::S2t);
        assert_eq!(block.source.text, "Hello.");
        assert_eq!(block.target.text, "你好。");
        assert_eq!(block.target.line, 3);
        assert_eq!(block.target.cols, 0..3);
        assert!(block.source.complete());
        assert!(block.target.complete());
        assert_eq!(block.from_part().map(|p| p.kind), Some(PartKind::Source));
        assert_eq!(block.to_part().map(|p| p.kind), Some(PartKind::Target));
    }

    #[test]
    fn test_block_needs_target_line() {
        let lines = doc("%sync>ab12cd Hello.\n");
        assert!(latex().parse_at(&lines, 0).is_none());
    }

    #[test]
    fn test_target_line_must_not_be_marker() {
        let lines = doc("%sync>ab12cd a\n\n%sync>zz0000 b\n\nc");
        let parser = latex();
        assert!(parser.parse_at(&lines, 0).is_none());
        assert_eq!(parser.parse_at(&lines, 2).unwrap().uid.as_str(), "zz0000");
    }

    #[test]
    fn test_plain_comment_target_is_allowed() {
        let lines = doc("%sync|ab12cd a\n\n% just a note");
        assert!(latex().parse_at(&lines, 0).is_some());
    }

    #[test]
    fn test_parse_at_any_from_target_line() {
        let lines = doc("%sync|ab12cd Hi.\n\n嗨。");
        let parser = latex();
        let block = parser.parse_at_any(&lines, 2).unwrap();
        assert_eq!(block.line, 0);
        assert_eq!(block.part_at(2), Some(PartKind::Target));
        assert_eq!(block.part_at(1), None);
        assert!(parser.parse_at_any(&lines, 1).is_none());
    }

    #[test]
    fn test_dirty_accessors_none_when_settled() {
        let lines = doc("%sync+ab12cd Hi.\n\n嗨。");
        let block = latex().parse_at(&lines, 0).unwrap();
        assert!(block.from_part().is_none());
        assert!(block.to_part().is_none());
    }

    #[test]
    fn test_scan_finds_all_blocks() {
        let lines = doc("%sync>aaaaaa a.\n\nx\n%sync<bbbbbb b.\n\ny\nplain");
        let uids: Vec<_> = latex()
            .scan(&lines)
            .into_iter()
            .map(|b| b.uid.to_string())
            .collect();
        assert_eq!(uids, vec!["aaaaaa", "bbbbbb"]);
    }

    #[test]
    fn test_new_block_text_parses_back() {
        let uid = Uid::parse("n3wb1k").unwrap();
        for syntax in [CommentSyntax::latex(), CommentSyntax::markdown()] {
            let parser = BlockParser::new(syntax, Languages::default());
            let lines = doc(&parser.new_block_text(uid));
            let block = parser.parse_at(&lines, 0).unwrap();
            assert_eq!(block.uid, uid);
            assert_eq!(block.status, SyncStatus::T2s);
            assert_eq!(block.source.text, "");
            assert_eq!(block.target.text, "");
            assert!(!block.source.complete());
        }
    }
}
