//! Editor collaborator: line-addressed reads and atomic batched edits.
//!
//! The kernel never holds document text of its own. It reads lines through
//! [`LineSource`] and writes through [`DocumentEditor::apply_edits`], which
//! applies a whole batch or nothing. [`MemoryDocument`] is the in-process
//! implementation used by the CLI and the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use syncwright_types::{Block, Decoration, DocumentId, LineSource, Uid};

use crate::error::EditorError;

/// A line/char-column position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    /// Column in `char`s.
    pub col: usize,
}

impl Position {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

/// Replace `start..end` with `text`. An empty range is an insertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextEdit {
    pub start: Position,
    pub end: Position,
    pub text: String,
}

impl TextEdit {
    /// Replace char columns `cols` on `line`.
    pub fn replace(line: usize, cols: std::ops::Range<usize>, text: impl Into<String>) -> Self {
        Self {
            start: Position::new(line, cols.start),
            end: Position::new(line, cols.end),
            text: text.into(),
        }
    }

    pub fn insert(at: Position, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            text: text.into(),
        }
    }

    pub fn is_insert(&self) -> bool {
        self.start == self.end
    }
}

/// Host document the sync engine edits.
#[async_trait]
pub trait DocumentEditor: LineSource + Send + Sync {
    /// Identity used to key snapshots and the locator cache.
    fn document_id(&self) -> DocumentId;

    /// Apply every edit or none. Positions refer to the document before the
    /// batch; edits must not overlap.
    async fn apply_edits(&self, edits: Vec<TextEdit>) -> Result<(), EditorError>;

    /// Visual hook for a block's status. Not part of correctness.
    fn decorate(&self, _block: &Block, _decoration: Decoration) {}
}

/// In-memory document.
pub struct MemoryDocument {
    id: DocumentId,
    lines: RwLock<Vec<String>>,
    version: AtomicU64,
    read_only: AtomicBool,
    history: Mutex<Vec<Vec<TextEdit>>>,
    decorations: Mutex<HashMap<Uid, Decoration>>,
}

impl MemoryDocument {
    pub fn new(id: DocumentId, text: &str) -> Self {
        Self {
            id,
            lines: RwLock::new(split_lines(text)),
            version: AtomicU64::new(0),
            read_only: AtomicBool::new(false),
            history: Mutex::new(Vec::new()),
            decorations: Mutex::new(HashMap::new()),
        }
    }

    /// A scratch document with a random identity.
    pub fn from_text(text: &str) -> Self {
        Self::new(DocumentId::ephemeral(), text)
    }

    /// Full text, lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.read().join("\n")
    }

    /// Replace the whole text, as an external change would.
    pub fn set_text(&self, text: &str) {
        *self.lines.write() = split_lines(text);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Bumped on every successful change.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Reject every edit batch while set.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    /// Every applied batch, oldest first.
    pub fn history(&self) -> Vec<Vec<TextEdit>> {
        self.history.lock().clone()
    }

    /// Last decoration applied to a block.
    pub fn decoration(&self, uid: Uid) -> Option<Decoration> {
        self.decorations.lock().get(&uid).copied()
    }

    fn offset(lines: &[String], pos: Position) -> Result<usize, EditorError> {
        let line = lines.get(pos.line).ok_or(EditorError::LineOutOfRange {
            line: pos.line,
            lines: lines.len(),
        })?;
        let before: usize = lines[..pos.line].iter().map(|l| l.len() + 1).sum();
        let col = match line.char_indices().nth(pos.col) {
            Some((byte, _)) => byte,
            None if pos.col == line.chars().count() => line.len(),
            None => {
                return Err(EditorError::ColumnOutOfRange {
                    line: pos.line,
                    col: pos.col,
                });
            }
        };
        Ok(before + col)
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

impl LineSource for MemoryDocument {
    fn line_count(&self) -> usize {
        self.lines.read().len()
    }

    fn line_text(&self, line: usize) -> Option<String> {
        self.lines.read().get(line).cloned()
    }
}

#[async_trait]
impl DocumentEditor for MemoryDocument {
    fn document_id(&self) -> DocumentId {
        self.id
    }

    async fn apply_edits(&self, edits: Vec<TextEdit>) -> Result<(), EditorError> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(EditorError::Rejected("document is read-only".into()));
        }
        if edits.is_empty() {
            return Ok(());
        }

        let mut lines = self.lines.write();
        let mut spans = Vec::with_capacity(edits.len());
        for (idx, edit) in edits.iter().enumerate() {
            let start = Self::offset(&lines, edit.start)?;
            let end = Self::offset(&lines, edit.end)?;
            if end < start {
                return Err(EditorError::Rejected(format!(
                    "edit ends before it starts at line {}",
                    edit.start.line
                )));
            }
            spans.push((start, end, idx));
        }
        spans.sort();
        for pair in spans.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(EditorError::Overlapping {
                    line: edits[pair[1].2].start.line,
                });
            }
        }

        let mut text = lines.join("\n");
        for (start, end, idx) in spans.into_iter().rev() {
            text.replace_range(start..end, &edits[idx].text);
        }
        *lines = split_lines(&text);
        drop(lines);

        self.version.fetch_add(1, Ordering::AcqRel);
        self.history.lock().push(edits);
        Ok(())
    }

    fn decorate(&self, block: &Block, decoration: Decoration) {
        self.decorations.lock().insert(block.uid, decoration);
    }
}

impl std::fmt::Debug for MemoryDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDocument")
            .field("id", &self.id)
            .field("lines", &self.line_count())
            .field("version", &self.version())
            .finish()
    }
}
