//! Response-cache decorator for any [`Generator`].

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use parking_lot::Mutex;
use tracing::debug;

use super::{ChunkStream, GenerationRequest, GenerationResult, Generator};
use crate::cancel::SyncToken;
use crate::response_cache::ResponseCache;

/// Serves identical requests from the response cache and records fresh
/// streams into it.
///
/// At most one stream per request records at a time. While it runs, an
/// identical request neither replays the partial entry nor records, it just
/// streams from the inner generator. A recorded entry only survives a stream
/// that ran to its end: errors, cancellation and early drops all invalidate
/// it.
pub struct CachingGenerator {
    inner: Arc<dyn Generator>,
    cache: Arc<ResponseCache<GenerationRequest>>,
    recording: Arc<Mutex<HashSet<String>>>,
}

impl CachingGenerator {
    pub fn new(inner: Arc<dyn Generator>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Arc::new(ResponseCache::new(capacity)),
            recording: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache<GenerationRequest>> {
        &self.cache
    }
}

#[async_trait]
impl Generator for CachingGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        request: Arc<GenerationRequest>,
        token: SyncToken,
    ) -> GenerationResult<ChunkStream> {
        let hash = ResponseCache::<GenerationRequest>::hash(&request);
        let claim = {
            let mut recording = self.recording.lock();
            if recording.contains(&hash) {
                None
            } else if let Some(cached) = self.cache.get(&request) {
                debug!(provider = self.inner.name(), len = cached.len(), "replaying cached response");
                return Ok(stream::once(async move { Ok(cached) }).boxed());
            } else {
                recording.insert(hash.clone());
                Some(Claim {
                    hash,
                    recording: self.recording.clone(),
                })
            }
        };

        let Some(claim) = claim else {
            debug!(provider = self.inner.name(), "identical request in flight, not recording");
            return self.inner.generate(request, token).await;
        };

        // The claim is released if the inner call fails here.
        let inner = self.inner.generate(request.clone(), token.clone()).await?;
        Ok(Recording {
            inner,
            cache: self.cache.clone(),
            key: request,
            token,
            healthy: true,
            finished: false,
            _claim: claim,
        }
        .boxed())
    }
}

/// Exclusive right to record one request hash.
struct Claim {
    hash: String,
    recording: Arc<Mutex<HashSet<String>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.recording.lock().remove(&self.hash);
    }
}

/// Tees chunks into the cache while passing them through.
struct Recording {
    inner: ChunkStream,
    cache: Arc<ResponseCache<GenerationRequest>>,
    key: Arc<GenerationRequest>,
    token: SyncToken,
    /// False once an error or cancellation was seen; nothing more is recorded.
    healthy: bool,
    finished: bool,
    // Dropped after `Drop::drop` has invalidated a partial entry.
    _claim: Claim,
}

impl Stream for Recording {
    type Item = GenerationResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if this.token.is_cancelled() {
                    this.poison();
                } else if this.healthy {
                    this.cache.extend(&this.key, &chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.poison();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if this.token.is_cancelled() {
                    this.poison();
                }
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Recording {
    fn poison(&mut self) {
        if self.healthy {
            self.healthy = false;
            self.cache.invalidate(&self.key);
        }
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        if !self.finished || !self.healthy {
            self.cache.invalidate(&self.key);
        }
    }
}
