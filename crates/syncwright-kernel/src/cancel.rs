//! Cancellation context threaded through every suspending call.
//!
//! One type serves both styles of cooperative cancellation: polling
//! ([`SyncToken::is_cancelled`] at chunk boundaries and before destructive
//! edits) and notification ([`SyncToken::on_cancelled`] for collaborators that
//! need to tear something down, such as an HTTP stream).

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

type Callback = Box<dyn FnOnce() + Send>;

/// Generation-scoped cancellation handle for one scheduled task.
#[derive(Clone)]
pub struct SyncToken {
    generation: u64,
    cancel: CancellationToken,
    callbacks: Arc<Mutex<Vec<Callback>>>,
}

impl SyncToken {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            cancel: CancellationToken::new(),
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A token that is never cancelled, for one-off calls outside the scheduler.
    pub fn detached() -> Self {
        Self::new(0)
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Request cancellation and run registered callbacks exactly once.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }

    /// Run `callback` on cancellation, or right away if already cancelled.
    pub fn on_cancelled(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.callbacks.lock();
        if self.cancel.is_cancelled() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Drive `fut` unless cancelled first; `None` means cancelled.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

impl std::fmt::Debug for SyncToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncToken")
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .field("callbacks", &self.callbacks.lock().len())
            .finish()
    }
}
