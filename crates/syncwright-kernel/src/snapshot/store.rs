//! Persistent snapshot store collaborator.

use dashmap::DashMap;
use syncwright_types::{DocumentId, Uid};

use super::Snapshot;
use crate::error::StoreResult;

/// Key-value store of snapshots, keyed by `(document, uid)`.
///
/// Calls are synchronous and short; implementations guard their own state.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, document: DocumentId, uid: Uid) -> StoreResult<Option<Snapshot>>;

    /// Insert or overwrite.
    fn put(&self, document: DocumentId, snapshot: &Snapshot) -> StoreResult<()>;

    /// Remove; returns whether an entry existed.
    fn remove(&self, document: DocumentId, uid: Uid) -> StoreResult<bool>;

    /// Every uid stored for a document.
    fn uids(&self, document: DocumentId) -> StoreResult<Vec<Uid>>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: DashMap<(DocumentId, Uid), Snapshot>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, document: DocumentId, uid: Uid) -> StoreResult<Option<Snapshot>> {
        Ok(self.entries.get(&(document, uid)).map(|e| e.value().clone()))
    }

    fn put(&self, document: DocumentId, snapshot: &Snapshot) -> StoreResult<()> {
        self.entries.insert((document, snapshot.uid), snapshot.clone());
        Ok(())
    }

    fn remove(&self, document: DocumentId, uid: Uid) -> StoreResult<bool> {
        Ok(self.entries.remove(&(document, uid)).is_some())
    }

    fn uids(&self, document: DocumentId) -> StoreResult<Vec<Uid>> {
        let mut uids: Vec<Uid> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == document)
            .map(|e| e.key().1)
            .collect();
        uids.sort();
        Ok(uids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_scopes_by_document() {
        let store = MemorySnapshotStore::new();
        let a = DocumentId::ephemeral();
        let b = DocumentId::ephemeral();
        let uid = Uid::parse("ab12cd").unwrap();
        store.put(a, &Snapshot::new(uid, "Hi.", "嗨。")).unwrap();

        assert_eq!(store.get(a, uid).unwrap().unwrap().target, "嗨。");
        assert!(store.get(b, uid).unwrap().is_none());
        assert_eq!(store.uids(a).unwrap(), vec![uid]);
        assert!(store.uids(b).unwrap().is_empty());
        assert!(store.remove(a, uid).unwrap());
        assert!(!store.remove(a, uid).unwrap());
        assert!(store.is_empty());
    }
}
