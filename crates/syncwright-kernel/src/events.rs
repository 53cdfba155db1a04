//! Orchestrator notifications.
//!
//! Hosts subscribe to a broadcast channel to refresh highlights and show
//! warnings. Slow subscribers lag and lose events; the document itself stays
//! the source of truth.

use serde::{Deserialize, Serialize};
use syncwright_types::{DocumentId, PartKind, SyncStatus, Uid};
use tokio::sync::broadcast;

use crate::snapshot::Snapshot;

/// Capacity of the event channel.
pub const EVENT_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The marker of a block was rewritten.
    StatusChanged {
        document: DocumentId,
        uid: Uid,
        status: SyncStatus,
    },
    /// A sync completed and its snapshot was written.
    Synced {
        document: DocumentId,
        snapshot: Snapshot,
    },
    /// A sync failed and was rolled back. Shown to the user.
    Failed {
        document: DocumentId,
        uid: Uid,
        from: PartKind,
        error: String,
    },
    /// A sync was cancelled and rolled back. Not shown to the user.
    Cancelled {
        document: DocumentId,
        uid: Uid,
        from: PartKind,
    },
}

impl SyncEvent {
    pub fn uid(&self) -> Uid {
        match self {
            SyncEvent::StatusChanged { uid, .. }
            | SyncEvent::Failed { uid, .. }
            | SyncEvent::Cancelled { uid, .. } => *uid,
            SyncEvent::Synced { snapshot, .. } => snapshot.uid,
        }
    }

    pub fn document(&self) -> DocumentId {
        match self {
            SyncEvent::StatusChanged { document, .. }
            | SyncEvent::Synced { document, .. }
            | SyncEvent::Failed { document, .. }
            | SyncEvent::Cancelled { document, .. } => *document,
        }
    }
}

pub type EventSender = broadcast::Sender<SyncEvent>;
pub type EventReceiver = broadcast::Receiver<SyncEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    broadcast::channel(EVENT_CAPACITY)
}
