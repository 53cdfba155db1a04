//! # syncwright-kernel
//!
//! Sync engine for bilingual documents.
//!
//! The kernel keeps the two halves of every block consistent:
//! - Locates blocks by uid, healing line drift from unrelated edits
//! - Runs at most one debounced, cancellable sync per block
//! - Streams generated text into the destination part chunk by chunk
//! - Rolls back to the last synced snapshot on failure or cancellation
//! - Persists snapshots per document and replays repeated requests
//!
//! The host supplies a [`DocumentEditor`] (line reads, atomic edit batches)
//! and a [`Generator`] (streaming text generation). Everything else lives
//! here.

pub mod cancel;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod export;
pub mod llm;
pub mod locator;
pub mod response_cache;
pub mod scheduler;
pub mod snapshot;
pub mod syncer;

pub use cancel::SyncToken;
pub use config::{CommentKind, ConfigError, GenerationConfig, SyncConfig};
pub use editor::{DocumentEditor, MemoryDocument, Position, TextEdit};
pub use error::{EditorError, StoreError, StoreResult, SyncError, SyncResult};
pub use events::{EventReceiver, SyncEvent};
pub use export::{ExportError, Exporter, strip_markers};
pub use llm::{
    CachingGenerator, GenerationError, GenerationRequest, GenerationResult, Generator,
    OpenAiGenerator, Reference, References,
};
pub use locator::Locator;
pub use response_cache::ResponseCache;
pub use scheduler::{ScheduledTask, TaskScheduler, TaskState};
pub use snapshot::{
    MemorySnapshotStore, Snapshot, SnapshotCache, SnapshotStore, SqliteSnapshotStore,
};
pub use syncer::{BlockSummary, SyncOptions, SyncRequest, SyncTarget, SyncTask, Syncer};
