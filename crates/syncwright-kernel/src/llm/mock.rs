//! Scripted generator for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;

use super::{ChunkStream, GenerationError, GenerationRequest, GenerationResult, Generator};
use crate::cancel::SyncToken;

/// One scripted response.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub chunks: Vec<String>,
    /// Pause before each chunk.
    pub delay: Duration,
    /// Error returned by `generate` itself.
    pub fail_before: Option<GenerationError>,
    /// Error yielded after the last chunk.
    pub fail_after: Option<GenerationError>,
}

impl Script {
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn failing(error: GenerationError) -> Self {
        Self {
            fail_before: Some(error),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_with(mut self, error: GenerationError) -> Self {
        self.fail_after = Some(error);
        self
    }
}

/// Plays back scripts in order; the last one repeats.
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new<I: IntoIterator<Item = Script>>(scripts: I) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(script: Script) -> Self {
        Self::new([script])
    }

    /// Number of `generate` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock();
        if scripts.len() > 1 {
            scripts.pop_front().unwrap_or_default()
        } else {
            scripts.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        request: Arc<GenerationRequest>,
        _token: SyncToken,
    ) -> GenerationResult<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push((*request).clone());

        let script = self.next_script();
        if let Some(err) = script.fail_before {
            return Err(err);
        }

        let delay = script.delay;
        let items = script
            .chunks
            .into_iter()
            .map(Ok)
            .chain(script.fail_after.map(Err));
        Ok(stream::iter(items)
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncwright_types::{Languages, PartKind};

    #[tokio::test]
    async fn test_scripts_play_in_order_then_repeat() {
        let generator = ScriptedGenerator::new([
            Script::failing(GenerationError::Auth("bad key".into())),
            Script::chunks(["ok"]),
        ]);
        let request = Arc::new(GenerationRequest::new(PartKind::Source, "x", Languages::default()));

        let first = generator.generate(request.clone(), SyncToken::detached()).await;
        assert!(matches!(first, Err(GenerationError::Auth(_))));
        for _ in 0..2 {
            let chunks: Vec<_> = generator
                .generate(request.clone(), SyncToken::detached())
                .await
                .unwrap()
                .collect()
                .await;
            assert_eq!(chunks, vec![Ok("ok".to_string())]);
        }
        assert_eq!(generator.calls(), 3);
        assert_eq!(generator.requests()[0].content, "x");
    }
}
