//! Error types for the sync kernel.

use syncwright_types::Uid;
use thiserror::Error;

use crate::llm::GenerationError;

/// Errors from the editor collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditorError {
    #[error("line {line} out of range (document has {lines} lines)")]
    LineOutOfRange { line: usize, lines: usize },

    #[error("column {col} out of range on line {line}")]
    ColumnOutOfRange { line: usize, col: usize },

    #[error("edits overlap at line {line}")]
    Overlapping { line: usize },

    #[error("edit rejected: {0}")]
    Rejected(String),
}

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of one sync operation.
///
/// Every per-block failure is caught at the orchestrator boundary and turned
/// into one of these; none of them tear down the scheduler or other blocks.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The uid no longer resolves to a block.
    #[error("no block with uid {0}")]
    LocatorMiss(Uid),

    /// No block covers the requested line.
    #[error("no block at line {0}")]
    NoBlockAt(usize),

    /// The block is not dirty and no direction was given.
    #[error("block {0} has no sync direction")]
    NoDirection(Uid),

    /// The generation service failed before or during the stream.
    #[error("generation failed: {0}")]
    Transport(#[from] GenerationError),

    /// Aborted by the user or by a replacing request.
    #[error("cancelled")]
    Cancelled,

    #[error("editor: {0}")]
    Editor(#[from] EditorError),

    #[error("snapshot store: {0}")]
    Store(#[from] StoreError),

    /// Snapshots may only be written for synced blocks.
    #[error("block {0} is not synced")]
    NotSynced(Uid),
}

impl SyncError {
    /// Cancellation is rolled back like any failure but never shown to the user.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
