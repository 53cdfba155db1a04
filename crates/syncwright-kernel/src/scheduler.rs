//! Single-flight, debounced, cancellable task execution per block uid.
//!
//! Per uid: `Idle -> Scheduled -> Running -> Idle`. Idle means no registry
//! entry. Scheduling over a live entry cancels it and takes its place, so the
//! newest request always wins.
//!
//! A cancelled task leaves the live registry immediately but may still be
//! unwinding (a running sync rolls back its partial output). Its completion
//! signal stays parked under the uid until the next `schedule` picks it up,
//! and the replacement waits on it before running. Two tasks never touch the
//! same block at once, whether the predecessor was replaced or cancelled.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use syncwright_types::Uid;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cancel::SyncToken;

/// Live state of a registered task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting out the debounce delay.
    Scheduled,
    /// Task body is executing.
    Running,
}

/// A task removed by [`TaskScheduler::cancel`].
#[derive(Debug)]
pub struct CancelledTask<M> {
    pub uid: Uid,
    pub generation: u64,
    /// Caller metadata given at schedule time.
    pub meta: M,
    /// State at the moment of cancellation.
    pub state: TaskState,
}

struct Entry<M> {
    generation: u64,
    meta: M,
    state: TaskState,
    token: SyncToken,
    done: watch::Receiver<bool>,
}

/// Flips the completion signal however the task exits.
struct DoneGuard(watch::Sender<bool>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(true);
    }
}

/// Handle to one scheduled task.
#[derive(Debug)]
pub struct ScheduledTask<T> {
    uid: Uid,
    generation: u64,
    token: SyncToken,
    handle: JoinHandle<Option<T>>,
}

impl<T> ScheduledTask<T> {
    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &SyncToken {
        &self.token
    }

    /// Wait for the task to finish.
    ///
    /// `None` if it was cancelled before its body ran (or the body panicked).
    pub async fn wait(self) -> Option<T> {
        self.handle.await.ok().flatten()
    }
}

struct Registry<M> {
    live: HashMap<Uid, Entry<M>>,
    /// Completion signals of cancelled tasks that may still be unwinding.
    unwinding: HashMap<Uid, watch::Receiver<bool>>,
}

impl<M> Registry<M> {
    /// Take `uid` out of the live set and park its completion signal.
    fn cancel(&mut self, uid: Uid) -> Option<Entry<M>> {
        let entry = self.live.remove(&uid)?;
        self.unwinding.retain(|_, done| !*done.borrow());
        self.unwinding.insert(uid, entry.done.clone());
        entry.token.cancel();
        Some(entry)
    }
}

/// Per-uid single-flight scheduler, generic over caller metadata `M`.
pub struct TaskScheduler<M> {
    registry: Arc<Mutex<Registry<M>>>,
    generations: Arc<AtomicU64>,
}

impl<M> Clone for TaskScheduler<M> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            generations: self.generations.clone(),
        }
    }
}

impl<M> Default for TaskScheduler<M> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                live: HashMap::new(),
                unwinding: HashMap::new(),
            })),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<M: Send + 'static> TaskScheduler<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` for `uid` after `delay`, replacing any live task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn schedule<F, Fut, T>(&self, uid: Uid, meta: M, delay: Duration, task: F) -> ScheduledTask<T>
    where
        F: FnOnce(SyncToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let generation = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
        let token = SyncToken::new(generation);
        let (done_tx, done_rx) = watch::channel(false);

        let (previous, parked) = {
            let mut registry = self.registry.lock();
            let previous = registry.live.remove(&uid);
            let parked = registry.unwinding.remove(&uid);
            registry.live.insert(
                uid,
                Entry {
                    generation,
                    meta,
                    state: TaskState::Scheduled,
                    token: token.clone(),
                    done: done_rx,
                },
            );
            (previous, parked)
        };

        // A live predecessor was scheduled after any parked one and already
        // chains on it.
        let mut predecessor = match previous {
            Some(prev) => {
                debug!(uid = %uid, replaced = prev.generation, generation, state = ?prev.state, "replacing task");
                prev.token.cancel();
                Some(prev.done)
            }
            None => parked.filter(|done| !*done.borrow()),
        };

        let registry = self.registry.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let _done = DoneGuard(done_tx);

            let elapsed = task_token
                .run_until_cancelled(tokio::time::sleep(delay))
                .await
                .is_some();

            if let Some(prev) = predecessor.as_mut() {
                let _ = prev.wait_for(|finished| *finished).await;
            }
            if !elapsed || task_token.is_cancelled() {
                trace!(uid = %uid, generation, "cancelled before running");
                return None;
            }

            {
                let mut registry = registry.lock();
                match registry.live.get_mut(&uid) {
                    Some(entry) if entry.generation == generation => {
                        entry.state = TaskState::Running;
                    }
                    _ => return None,
                }
            }
            trace!(uid = %uid, generation, "running");

            let output = task(task_token).await;

            let mut registry = registry.lock();
            if registry.live.get(&uid).is_some_and(|e| e.generation == generation) {
                registry.live.remove(&uid);
            }
            trace!(uid = %uid, generation, "finished");
            Some(output)
        });

        debug!(uid = %uid, generation, delay_ms = delay.as_millis() as u64, "scheduled");
        ScheduledTask {
            uid,
            generation,
            token,
            handle,
        }
    }

    /// Cancel the live task for `uid`, if any.
    ///
    /// Signals its token and removes the registry entry; a running body stops
    /// at its next cancellation check. Use [`settled`](Self::settled) to wait
    /// for it to finish unwinding.
    pub fn cancel(&self, uid: Uid) -> Option<CancelledTask<M>> {
        let entry = self.registry.lock().cancel(uid)?;
        debug!(uid = %uid, generation = entry.generation, state = ?entry.state, "cancelled");
        Some(CancelledTask {
            uid,
            generation: entry.generation,
            meta: entry.meta,
            state: entry.state,
        })
    }

    /// Cancel every live task.
    pub fn cancel_all(&self) -> Vec<CancelledTask<M>> {
        let drained: Vec<(Uid, Entry<M>)> = {
            let mut registry = self.registry.lock();
            let uids: Vec<Uid> = registry.live.keys().copied().collect();
            uids.into_iter()
                .filter_map(|uid| registry.cancel(uid).map(|entry| (uid, entry)))
                .collect()
        };
        drained
            .into_iter()
            .map(|(uid, entry)| CancelledTask {
                uid,
                generation: entry.generation,
                meta: entry.meta,
                state: entry.state,
            })
            .collect()
    }

    /// Wait until no cancelled task for `uid` is still unwinding.
    pub async fn settled(&self, uid: Uid) {
        let parked = self.registry.lock().unwinding.get(&uid).cloned();
        if let Some(mut done) = parked {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// State of the task for `uid`; `None` is Idle.
    pub fn state(&self, uid: Uid) -> Option<TaskState> {
        self.registry.lock().live.get(&uid).map(|e| e.state)
    }

    /// Number of live (Scheduled or Running) tasks.
    pub fn len(&self) -> usize {
        self.registry.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().live.is_empty()
    }

    /// Uids with a live task.
    pub fn uids(&self) -> Vec<Uid> {
        self.registry.lock().live.keys().copied().collect()
    }
}

impl<M: Clone> TaskScheduler<M> {
    /// Metadata of the live task for `uid`.
    pub fn meta(&self, uid: Uid) -> Option<M> {
        self.registry.lock().live.get(&uid).map(|e| e.meta.clone())
    }
}

impl<M> std::fmt::Debug for TaskScheduler<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("live", &self.registry.lock().live.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn uid(s: &str) -> Uid {
        Uid::parse(s).unwrap()
    }

    const DELAY: Duration = Duration::from_millis(1200);

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_delay_then_idles() {
        let scheduler: TaskScheduler<()> = TaskScheduler::new();
        let task = scheduler.schedule(uid("aaaaaa"), (), DELAY, |_| async { 42 });
        assert_eq!(scheduler.state(uid("aaaaaa")), Some(TaskState::Scheduled));

        assert_eq!(task.wait().await, Some(42));
        assert_eq!(scheduler.state(uid("aaaaaa")), None);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_runs_only_newest() {
        let scheduler: TaskScheduler<&'static str> = TaskScheduler::new();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let r = ran.clone();
        let a = scheduler.schedule(uid("aaaaaa"), "a", DELAY, move |_| async move {
            r.lock().push("a");
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        let r = ran.clone();
        let b = scheduler.schedule(uid("aaaaaa"), "b", DELAY, move |_| async move {
            r.lock().push("b");
        });

        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.meta(uid("aaaaaa")), Some("b"));
        assert_eq!(a.wait().await, None);
        assert_eq!(b.wait().await, Some(()));
        assert_eq!(*ran.lock(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_scheduled() {
        let scheduler: TaskScheduler<u8> = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let task = scheduler.schedule(uid("bbbbbb"), 7, DELAY, move |_| async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let cancelled = scheduler.cancel(uid("bbbbbb")).unwrap();
        assert_eq!(cancelled.meta, 7);
        assert_eq!(cancelled.state, TaskState::Scheduled);
        assert!(task.token().is_cancelled());
        assert_eq!(task.wait().await, None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(scheduler.cancel(uid("bbbbbb")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_running_is_cooperative() {
        let scheduler: TaskScheduler<()> = TaskScheduler::new();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let task = scheduler.schedule(uid("cccccc"), (), Duration::ZERO, move |token| async move {
            let _ = started_tx.send(());
            token.cancelled().await;
            "stopped"
        });

        started_rx.await.unwrap();
        assert_eq!(scheduler.state(uid("cccccc")), Some(TaskState::Running));
        let cancelled = scheduler.cancel(uid("cccccc")).unwrap();
        assert_eq!(cancelled.state, TaskState::Running);
        assert_eq!(scheduler.state(uid("cccccc")), None);
        assert_eq!(task.wait().await, Some("stopped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_waits_for_running_predecessor() {
        let scheduler: TaskScheduler<()> = TaskScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let l = log.clone();
        let first = scheduler.schedule(uid("dddddd"), (), Duration::ZERO, move |token| async move {
            let _ = started_tx.send(());
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(300)).await;
            l.lock().push("first rolled back");
        });
        started_rx.await.unwrap();

        let l = log.clone();
        let second = scheduler.schedule(uid("dddddd"), (), Duration::ZERO, move |_| async move {
            l.lock().push("second ran");
        });

        first.wait().await;
        second.wait().await;
        assert_eq!(*log.lock(), vec!["first rolled back", "second ran"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_cancel_waits_for_unwind() {
        let scheduler: TaskScheduler<()> = TaskScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let l = log.clone();
        let first = scheduler.schedule(uid("dddddd"), (), Duration::ZERO, move |token| async move {
            let _ = started_tx.send(());
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(300)).await;
            l.lock().push("first rolled back");
        });
        started_rx.await.unwrap();

        assert!(scheduler.cancel(uid("dddddd")).is_some());
        assert!(scheduler.is_empty());

        let l = log.clone();
        let second = scheduler.schedule(uid("dddddd"), (), Duration::ZERO, move |_| async move {
            l.lock().push("second ran");
        });

        second.wait().await;
        first.wait().await;
        assert_eq!(*log.lock(), vec!["first rolled back", "second ran"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_waits_for_cancelled_task() {
        let scheduler: TaskScheduler<()> = TaskScheduler::new();
        let unwound = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let u = unwound.clone();
        let task = scheduler.schedule(uid("eeeeee"), (), Duration::ZERO, move |token| async move {
            let _ = started_tx.send(());
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(300)).await;
            u.fetch_add(1, Ordering::SeqCst);
        });
        started_rx.await.unwrap();

        scheduler.settled(uid("eeeeee")).await;
        assert_eq!(unwound.load(Ordering::SeqCst), 0);

        scheduler.cancel(uid("eeeeee"));
        scheduler.settled(uid("eeeeee")).await;
        assert_eq!(unwound.load(Ordering::SeqCst), 1);
        assert_eq!(task.wait().await, Some(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chained_replacements_still_serialize() {
        let scheduler: TaskScheduler<()> = TaskScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let l = log.clone();
        let first = scheduler.schedule(uid("eeeeee"), (), Duration::ZERO, move |token| async move {
            let _ = started_tx.send(());
            token.cancelled().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            l.lock().push("first");
        });
        started_rx.await.unwrap();

        let skipped = scheduler.schedule(uid("eeeeee"), (), DELAY, |_| async {});
        let l = log.clone();
        let last = scheduler.schedule(uid("eeeeee"), (), Duration::ZERO, move |_| async move {
            l.lock().push("last");
        });

        assert_eq!(skipped.wait().await, None);
        first.wait().await;
        assert_eq!(last.wait().await, Some(()));
        assert_eq!(*log.lock(), vec!["first", "last"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_live_task_per_uid() {
        let scheduler: TaskScheduler<usize> = TaskScheduler::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for i in 0..20 {
            let running = running.clone();
            let peak = peak.clone();
            handles.push(scheduler.schedule(
                uid("ffffff"),
                i,
                Duration::from_millis((i % 3) as u64 * 100),
                move |_| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                },
            ));
            assert!(scheduler.len() <= 1);
            if i % 4 == 0 {
                scheduler.cancel(uid("ffffff"));
            }
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        for handle in handles {
            handle.wait().await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 1);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_returns_every_task() {
        let scheduler: TaskScheduler<u8> = TaskScheduler::new();
        let a = scheduler.schedule(uid("aaaaaa"), 1, DELAY, |_| async {});
        let b = scheduler.schedule(uid("bbbbbb"), 2, DELAY, |_| async {});

        let mut cancelled: Vec<u8> = scheduler.cancel_all().into_iter().map(|c| c.meta).collect();
        cancelled.sort();
        assert_eq!(cancelled, vec![1, 2]);
        assert!(scheduler.is_empty());
        assert_eq!(a.wait().await, None);
        assert_eq!(b.wait().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_uids_run_independently() {
        let scheduler: TaskScheduler<()> = TaskScheduler::new();
        let a = scheduler.schedule(uid("aaaaaa"), (), DELAY, |_| async { 1 });
        let b = scheduler.schedule(uid("bbbbbb"), (), DELAY, |_| async { 2 });
        assert_eq!(scheduler.len(), 2);
        assert_eq!(a.wait().await, Some(1));
        assert_eq!(b.wait().await, Some(2));
    }
}
