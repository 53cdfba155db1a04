//! Snapshot cache: the last confirmed-synced pair per block.
//!
//! Written only when a block reaches `synced`; read for rollback and as
//! prior-turn context for generation. Bound to one document, over any
//! [`SnapshotStore`].

mod sqlite;
mod store;

pub use sqlite::SqliteSnapshotStore;
pub use store::{MemorySnapshotStore, SnapshotStore};

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use syncwright_types::{Block, DocumentId, PartKind, SyncStatus, Uid};
use tracing::debug;

use crate::error::{StoreResult, SyncError, SyncResult};

/// Confirmed-consistent text of one block.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    pub uid: Uid,
    pub source: String,
    pub target: String,
}

impl Snapshot {
    pub fn new(uid: Uid, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            uid,
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn part(&self, kind: PartKind) -> &str {
        match kind {
            PartKind::Source => &self.source,
            PartKind::Target => &self.target,
        }
    }
}

/// Snapshots of one document.
#[derive(Clone)]
pub struct SnapshotCache {
    document: DocumentId,
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotCache {
    pub fn new(document: DocumentId, store: Arc<dyn SnapshotStore>) -> Self {
        Self { document, store }
    }

    pub fn document(&self) -> DocumentId {
        self.document
    }

    pub fn get(&self, uid: Uid) -> StoreResult<Option<Snapshot>> {
        self.store.get(self.document, uid)
    }

    pub fn get_part(&self, uid: Uid, kind: PartKind) -> StoreResult<Option<String>> {
        Ok(self.get(uid)?.map(|snap| snap.part(kind).to_string()))
    }

    /// Record a synced block.
    pub fn save(&self, block: &Block) -> SyncResult<Snapshot> {
        if block.status != SyncStatus::Synced {
            return Err(SyncError::NotSynced(block.uid));
        }
        let snapshot = Snapshot::new(block.uid, &block.source.text, &block.target.text);
        self.store.put(self.document, &snapshot)?;
        debug!(uid = %block.uid, document = ?self.document, "snapshot saved");
        Ok(snapshot)
    }

    pub fn remove(&self, uid: Uid) -> StoreResult<bool> {
        self.store.remove(self.document, uid)
    }

    /// Delete every snapshot whose uid is not live. Returns the removed uids.
    pub fn reserve<I: IntoIterator<Item = Uid>>(&self, live: I) -> StoreResult<Vec<Uid>> {
        let live: HashSet<Uid> = live.into_iter().collect();
        let mut removed = Vec::new();
        for uid in self.store.uids(self.document)? {
            if !live.contains(&uid) && self.store.remove(self.document, uid)? {
                removed.push(uid);
            }
        }
        if !removed.is_empty() {
            debug!(document = ?self.document, removed = removed.len(), kept = live.len(), "snapshots reserved");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}
