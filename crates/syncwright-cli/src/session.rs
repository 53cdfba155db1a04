//! One document on disk, loaded into memory and driven by a [`Syncer`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use syncwright_kernel::{
    Generator, Locator, MemoryDocument, SnapshotStore, SyncConfig, SyncOptions, Syncer,
};
use syncwright_types::DocumentId;
use tracing::debug;

/// Stable identity of a file: UUIDv5 of its canonical `file://` URI.
pub fn document_id(path: &Path) -> Result<DocumentId> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    Ok(DocumentId::from_uri(&format!("file://{}", canonical.display())))
}

pub struct Session {
    path: PathBuf,
    doc: Arc<MemoryDocument>,
    syncer: Syncer,
    loaded_version: u64,
}

impl Session {
    /// Load `path`. The CLI has no keystrokes to debounce, so syncs start
    /// immediately.
    pub fn open(
        path: &Path,
        config: &SyncConfig,
        store: Arc<dyn SnapshotStore>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let id = document_id(path)?;
        let doc = Arc::new(MemoryDocument::new(id, &text));

        let extension = path.extension().and_then(|e| e.to_str());
        let locator = Arc::new(Locator::with_capacity(
            config.parser(extension),
            config.locator.documents,
            config.locator.blocks_per_document,
        ));
        let options = SyncOptions {
            debounce: Duration::ZERO,
            ..SyncOptions::from_config(config)
        };
        let syncer = Syncer::new(doc.clone(), locator, store, generator, options);
        debug!(path = %path.display(), document = %id, "document loaded");

        Ok(Self {
            path: path.to_path_buf(),
            loaded_version: doc.version(),
            doc,
            syncer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn syncer(&self) -> &Syncer {
        &self.syncer
    }

    pub fn text(&self) -> String {
        self.doc.text()
    }

    /// Write the document back if anything changed. Returns whether it did.
    pub fn save(&self) -> Result<bool> {
        if self.doc.version() == self.loaded_version {
            return Ok(false);
        }
        std::fs::write(&self.path, self.doc.text())
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        debug!(path = %self.path.display(), "document saved");
        Ok(true)
    }
}
