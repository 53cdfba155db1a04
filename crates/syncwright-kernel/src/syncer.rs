//! Sync orchestrator.
//!
//! Drives one block from dirty to synced: marks it `syncing`, waits out the
//! debounce through the [`TaskScheduler`], streams the generator's chunks
//! into the destination part, then writes a snapshot. Any failure rolls the
//! destination back to the last snapshot and restores the dirty status.
//!
//! ```text
//!   sync(uid) ──► status = syncing ──► schedule(debounce)
//!                                          │
//!                            ┌─────────────┴─────────────┐
//!                            ▼                           ▼
//!                     chunks appended              error / cancel
//!                            │                           │
//!                  status = synced, snapshot    restore destination,
//!                                               status = s2t | t2s
//! ```
//!
//! All document access goes through the [`DocumentEditor`]; the block is
//! re-located before every write so concurrent edits elsewhere in the
//! document only shift where the next chunk lands.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use syncwright_types::{Block, BlockAction, DocumentId, PartKind, SyncStatus, Uid, format_prefix};
use tracing::{debug, info, trace, warn};

use crate::cancel::SyncToken;
use crate::config::{DEFAULT_DEBOUNCE_MS, SyncConfig};
use crate::editor::{DocumentEditor, Position, TextEdit};
use crate::error::{SyncError, SyncResult};
use crate::events::{self, EventReceiver, EventSender, SyncEvent};
use crate::llm::{GenerationRequest, Generator, References};
use crate::locator::Locator;
use crate::scheduler::{CancelledTask, ScheduledTask, TaskScheduler, TaskState};
use crate::snapshot::{Snapshot, SnapshotCache, SnapshotStore};

/// Handle to a scheduled sync. Resolves to the written snapshot.
pub type SyncTask = ScheduledTask<SyncResult<Snapshot>>;

/// Orchestrator settings that are not part of parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub auto_sync: bool,
    pub debounce: Duration,
    pub references: References,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            auto_sync: true,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            references: References::default(),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            auto_sync: config.sync.auto_sync,
            debounce: config.debounce(),
            references: config.references.clone(),
        }
    }
}

/// What a sync request points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    Uid(Uid),
    /// Marker or target line of a block.
    Line(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub target: SyncTarget,
    /// Authoritative side. Defaults to the block's dirty side, then to the
    /// side under the requested line.
    pub from: Option<PartKind>,
    pub instruction: Option<String>,
}

impl SyncRequest {
    pub fn uid(uid: Uid) -> Self {
        Self {
            target: SyncTarget::Uid(uid),
            from: None,
            instruction: None,
        }
    }

    pub fn line(line: usize) -> Self {
        Self {
            target: SyncTarget::Line(line),
            from: None,
            instruction: None,
        }
    }

    pub fn with_from(mut self, from: PartKind) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

/// One row of the document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub uid: Uid,
    pub status: SyncStatus,
    /// Marker line through target line.
    pub lines: RangeInclusive<usize>,
    pub actions: Vec<BlockAction>,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        Self {
            uid: block.uid,
            status: block.status,
            lines: block.lines(),
            actions: block.status.actions(),
        }
    }
}

struct Shared {
    editor: Arc<dyn DocumentEditor>,
    locator: Arc<Locator>,
    snapshots: SnapshotCache,
    generator: Arc<dyn Generator>,
    /// Metadata is the from-part, for restoring status on early cancel.
    scheduler: TaskScheduler<PartKind>,
    options: SyncOptions,
    events: EventSender,
}

/// Sync engine for one document.
#[derive(Clone)]
pub struct Syncer {
    shared: Arc<Shared>,
}

impl Syncer {
    pub fn new(
        editor: Arc<dyn DocumentEditor>,
        locator: Arc<Locator>,
        store: Arc<dyn SnapshotStore>,
        generator: Arc<dyn Generator>,
        options: SyncOptions,
    ) -> Self {
        let snapshots = SnapshotCache::new(editor.document_id(), store);
        let (events, _) = events::channel();
        Self {
            shared: Arc::new(Shared {
                editor,
                locator,
                snapshots,
                generator,
                scheduler: TaskScheduler::new(),
                options,
                events,
            }),
        }
    }

    pub fn document_id(&self) -> DocumentId {
        self.shared.editor.document_id()
    }

    pub fn snapshots(&self) -> &SnapshotCache {
        &self.shared.snapshots
    }

    pub fn options(&self) -> &SyncOptions {
        &self.shared.options
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    /// State of the live task for `uid`; `None` when idle.
    pub fn task_state(&self, uid: Uid) -> Option<TaskState> {
        self.shared.scheduler.state(uid)
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.shared.events.send(event);
    }

    fn locate(&self, uid: Uid, token: &SyncToken) -> Option<Block> {
        let s = &self.shared;
        s.locator.find(self.document_id(), &*s.editor, uid, token)
    }

    fn locate_or_miss(&self, uid: Uid, token: &SyncToken) -> SyncResult<Block> {
        match self.locate(uid, token) {
            Some(block) => Ok(block),
            None if token.is_cancelled() => Err(SyncError::Cancelled),
            None => Err(SyncError::LocatorMiss(uid)),
        }
    }

    /// Current status of a block.
    pub fn status(&self, uid: Uid) -> Option<SyncStatus> {
        self.locate(uid, &SyncToken::detached()).map(|b| b.status)
    }

    /// Rewrite the marker prefix only. No-op when the status is unchanged.
    async fn set_status(&self, block: &Block, status: SyncStatus) -> SyncResult<Block> {
        if block.status == status {
            return Ok(block.clone());
        }
        let edit = TextEdit::replace(block.line, block.prefix_cols.clone(), format_prefix(status, block.uid));
        self.shared.editor.apply_edits(vec![edit]).await?;

        let mut updated = block.clone();
        updated.status = status;
        self.shared.editor.decorate(&updated, status.decoration());
        debug!(uid = %block.uid, from = %block.status, to = %status, "status changed");
        self.emit(SyncEvent::StatusChanged {
            document: self.document_id(),
            uid: block.uid,
            status,
        });
        Ok(updated)
    }

    /// Start syncing a block.
    ///
    /// Marks it `syncing` right away and runs the generation after the
    /// debounce delay. A newer request for the same block replaces this one.
    pub async fn sync(&self, request: SyncRequest) -> SyncResult<SyncTask> {
        let token = SyncToken::detached();
        let (block, line) = match request.target {
            SyncTarget::Uid(uid) => (self.locate_or_miss(uid, &token)?, None),
            SyncTarget::Line(line) => {
                let s = &self.shared;
                let block = s
                    .locator
                    .at_line(self.document_id(), &*s.editor, line)
                    .ok_or(SyncError::NoBlockAt(line))?;
                (block, Some(line))
            }
        };

        let from = request
            .from
            .or_else(|| block.status.from_part())
            .or_else(|| self.shared.scheduler.meta(block.uid))
            .or_else(|| line.and_then(|l| block.part_at(l)))
            .ok_or(SyncError::NoDirection(block.uid))?;

        let uid = block.uid;
        self.set_status(&block, SyncStatus::Syncing).await?;

        let this = self.clone();
        let instruction = request.instruction;
        let task = self.shared.scheduler.schedule(
            uid,
            from,
            self.shared.options.debounce,
            move |token| async move { this.run(uid, from, instruction, token).await },
        );
        debug!(uid = %uid, %from, generation = task.generation(), "sync requested");
        Ok(task)
    }

    async fn run(
        &self,
        uid: Uid,
        from: PartKind,
        instruction: Option<String>,
        token: SyncToken,
    ) -> SyncResult<Snapshot> {
        match self.stream_into(uid, from, instruction.as_deref(), &token).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                self.rollback(uid, from, &err).await;
                Err(err)
            }
        }
    }

    async fn stream_into(
        &self,
        uid: Uid,
        from: PartKind,
        instruction: Option<&str>,
        token: &SyncToken,
    ) -> SyncResult<Snapshot> {
        let s = &self.shared;
        let to = from.opposite();

        // A cancelled predecessor may have restored the dirty status.
        let block = self.locate_or_miss(uid, token)?;
        let block = self.set_status(&block, SyncStatus::Syncing).await?;

        let prior = s.snapshots.get(uid)?;
        let request = GenerationRequest::new(from, &block.part(from).text, s.locator.parser().languages)
            .with_instruction(instruction)
            .with_prior(prior.as_ref())
            .with_references(s.options.references.clone());

        let mut stream = token
            .run_until_cancelled(s.generator.generate(Arc::new(request), token.clone()))
            .await
            .ok_or(SyncError::Cancelled)??;

        let mut chunks = 0usize;
        loop {
            let item = match token.run_until_cancelled(stream.next()).await {
                None => return Err(SyncError::Cancelled),
                Some(None) => break,
                Some(Some(item)) => item,
            };
            let chunk = single_line(&item?);
            if token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let block = self.locate_or_miss(uid, token)?;
            let dest = block.part(to);
            let edit = if chunks == 0 {
                TextEdit::replace(dest.line, dest.cols.clone(), chunk)
            } else {
                TextEdit::insert(Position::new(dest.line, dest.cols.end), chunk)
            };
            s.editor.apply_edits(vec![edit]).await?;
            chunks += 1;
            trace!(uid = %uid, chunks, "chunk applied");
        }

        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let mut block = self.locate_or_miss(uid, token)?;
        if chunks == 0 {
            let dest = block.part(to);
            if !dest.text.is_empty() {
                s.editor
                    .apply_edits(vec![TextEdit::replace(dest.line, dest.cols.clone(), "")])
                    .await?;
                block = self.locate_or_miss(uid, token)?;
            }
        }

        let block = self.set_status(&block, SyncStatus::Synced).await?;
        let snapshot = s.snapshots.save(&block)?;
        info!(uid = %uid, %from, chunks, provider = s.generator.name(), "block synced");
        self.emit(SyncEvent::Synced {
            document: self.document_id(),
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Put the destination back to its snapshot (or empty) and mark the
    /// block dirty from its original side.
    async fn rollback(&self, uid: Uid, from: PartKind, err: &SyncError) {
        let to = from.opposite();
        let token = SyncToken::detached();
        let Some(block) = self.locate(uid, &token) else {
            warn!(uid = %uid, error = %err, "sync failed and block is gone, nothing to roll back");
            self.report(uid, from, err);
            return;
        };

        let restore = match self.shared.snapshots.get_part(uid, to) {
            Ok(part) => part.unwrap_or_default(),
            Err(e) => {
                warn!(uid = %uid, error = %e, "snapshot unavailable, clearing destination");
                String::new()
            }
        };

        let dest = block.part(to);
        if dest.text != restore {
            let edit = TextEdit::replace(dest.line, dest.cols.clone(), restore);
            if let Err(e) = self.shared.editor.apply_edits(vec![edit]).await {
                warn!(uid = %uid, error = %e, "rollback edit rejected");
            }
        }
        // The destination edit never moves the marker prefix.
        if let Err(e) = self.set_status(&block, from.dirty_status()).await {
            warn!(uid = %uid, error = %e, "failed to restore status");
        }
        self.report(uid, from, err);
    }

    fn report(&self, uid: Uid, from: PartKind, err: &SyncError) {
        let document = self.document_id();
        if err.is_cancellation() {
            debug!(uid = %uid, %from, "sync cancelled, rolled back");
            self.emit(SyncEvent::Cancelled { document, uid, from });
        } else {
            warn!(uid = %uid, %from, error = %err, "sync failed, rolled back");
            self.emit(SyncEvent::Failed {
                document,
                uid,
                from,
                error: err.to_string(),
            });
        }
    }

    /// A task cancelled before its body ran wrote nothing but the
    /// `syncing` marker.
    async fn restore_cancelled(&self, cancelled: &CancelledTask<PartKind>) {
        if cancelled.state != TaskState::Scheduled {
            return;
        }
        let from = cancelled.meta;
        if let Some(block) = self.locate(cancelled.uid, &SyncToken::detached()) {
            if let Err(e) = self.set_status(&block, from.dirty_status()).await {
                warn!(uid = %cancelled.uid, error = %e, "failed to restore status");
            }
        }
        self.report(cancelled.uid, from, &SyncError::Cancelled);
    }

    /// Cancel the sync of one block. Returns whether one was live.
    ///
    /// Returns once the cancelled task has rolled back, so the block is
    /// dirty again and ready for a new sync.
    pub async fn abort(&self, uid: Uid) -> bool {
        match self.shared.scheduler.cancel(uid) {
            Some(cancelled) => {
                self.restore_cancelled(&cancelled).await;
                self.shared.scheduler.settled(uid).await;
                true
            }
            None => false,
        }
    }

    /// Cancel every live sync, e.g. when focus leaves the document.
    pub async fn cancel_all(&self) -> usize {
        let cancelled = self.shared.scheduler.cancel_all();
        for task in &cancelled {
            self.restore_cancelled(task).await;
        }
        for task in &cancelled {
            self.shared.scheduler.settled(task.uid).await;
        }
        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), "cancelled all syncs");
        }
        cancelled.len()
    }

    /// React to a user edit on `line`.
    ///
    /// Recomputes the block's status against its snapshot and, with
    /// auto-sync on, starts a sync once the edited part is complete.
    pub async fn handle_edit(&self, line: usize) -> SyncResult<Option<SyncTask>> {
        let s = &self.shared;
        let Some(block) = s.locator.at_line(self.document_id(), &*s.editor, line) else {
            return Ok(None);
        };
        if block.status == SyncStatus::Syncing {
            trace!(uid = %block.uid, "edit ignored while syncing");
            return Ok(None);
        }
        let Some(kind) = block.part_at(line) else {
            return Ok(None);
        };

        let part = block.part(kind);
        let status = match s.snapshots.get_part(block.uid, kind)? {
            Some(synced) if synced == part.text => SyncStatus::Synced,
            _ => kind.dirty_status(),
        };
        let complete = part.complete();
        let block = self.set_status(&block, status).await?;

        if status.is_dirty() && complete && s.options.auto_sync {
            let task = self.sync(SyncRequest::uid(block.uid).with_from(kind)).await?;
            return Ok(Some(task));
        }
        Ok(None)
    }

    /// Insert a new block whose marker goes at `line`; the text on `line`
    /// becomes its target part. Returns the existing block when one already
    /// covers the line.
    pub async fn create_block(&self, line: usize) -> SyncResult<Block> {
        let s = &self.shared;
        let document = self.document_id();
        if let Some(existing) = s.locator.at_line(document, &*s.editor, line) {
            debug!(uid = %existing.uid, line, "block already exists");
            return Ok(existing);
        }

        let live: Vec<Uid> = s
            .locator
            .find_all(document, &*s.editor, &SyncToken::detached())
            .iter()
            .map(|b| b.uid)
            .collect();
        let mut uid = Uid::random();
        while live.contains(&uid) {
            uid = Uid::random();
        }

        let text = s.locator.parser().new_block_text(uid);
        s.editor
            .apply_edits(vec![TextEdit::insert(Position::new(line, 0), text)])
            .await?;

        let block = s
            .locator
            .at_line(document, &*s.editor, line)
            .filter(|b| b.uid == uid)
            .ok_or(SyncError::LocatorMiss(uid))?;
        s.editor.decorate(&block, block.status.decoration());
        info!(uid = %uid, line, "block created");
        Ok(block)
    }

    /// Rescan the whole document and drop snapshots of removed blocks.
    pub fn reload(&self) -> SyncResult<Vec<Block>> {
        let s = &self.shared;
        let blocks = s
            .locator
            .find_all(self.document_id(), &*s.editor, &SyncToken::detached());
        let removed = s.snapshots.reserve(blocks.iter().map(|b| b.uid))?;
        if !removed.is_empty() {
            info!(removed = removed.len(), live = blocks.len(), "dropped stale snapshots");
        }
        Ok(blocks)
    }

    /// The document is gone: drop all of its snapshots and cached lines.
    pub fn forget_document(&self) -> SyncResult<Vec<Uid>> {
        let removed = self.shared.snapshots.reserve(std::iter::empty())?;
        self.shared.locator.forget(self.document_id());
        info!(document = %self.document_id(), removed = removed.len(), "document forgotten");
        Ok(removed)
    }

    /// Every block with its line span and available actions.
    pub fn outline(&self) -> Vec<BlockSummary> {
        let s = &self.shared;
        s.locator
            .find_all(self.document_id(), &*s.editor, &SyncToken::detached())
            .iter()
            .map(BlockSummary::from)
            .collect()
    }
}

impl std::fmt::Debug for Syncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Syncer")
            .field("document", &self.document_id())
            .field("generator", &self.shared.generator.name())
            .field("scheduler", &self.shared.scheduler)
            .finish_non_exhaustive()
    }
}

/// Generated text goes into a single line.
fn single_line(chunk: &str) -> String {
    chunk.replace("\r\n", " ").replace(['\r', '\n'], " ")
}
