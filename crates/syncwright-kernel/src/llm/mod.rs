//! Generation collaborator abstraction.
//!
//! A [`Generator`] turns a [`GenerationRequest`] into a cancellable stream of
//! text chunks. The sync orchestrator consumes the stream chunk by chunk and
//! never sees provider details.
//!
//! ```text
//! ┌─────────────────┐   ┌───────────────────┐
//! │ OpenAiGenerator │   │ ScriptedGenerator │
//! └────────┬────────┘   └─────────┬─────────┘
//!          └────────────┬─────────┘
//!                       ▼
//!             ┌──────────────────┐
//!             │ CachingGenerator │   replays identical requests
//!             └─────────┬────────┘
//!                       ▼
//!              ChunkStream -> Syncer
//! ```

mod caching;
mod openai;
mod prompt;

#[cfg(any(test, feature = "test-mock"))]
pub mod mock;

pub use caching::CachingGenerator;
pub use openai::OpenAiGenerator;
pub use prompt::{SYSTEM_PROMPT, render_user_prompt};

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use syncwright_types::{Languages, PartKind};

use crate::cancel::SyncToken;
use crate::snapshot::Snapshot;

/// A source/target term pair handed to the generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub source: String,
    pub target: String,
}

impl Reference {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Glossary and style preferences for a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct References {
    #[serde(default)]
    pub glossary: Vec<Reference>,
    #[serde(default)]
    pub preferences: Vec<Reference>,
}

impl References {
    pub fn is_empty(&self) -> bool {
        self.glossary.is_empty() && self.preferences.is_empty()
    }
}

/// Last synced pair, given to the generator as prior-turn context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriorTurn {
    pub source: String,
    pub target: String,
}

impl From<&Snapshot> for PriorTurn {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            source: snapshot.source.trim().to_string(),
            target: snapshot.target.trim().to_string(),
        }
    }
}

/// Everything a generator needs for one part. Also the response-cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub references: References,
    /// Which side `content` comes from.
    pub from: PartKind,
    /// Source language name (e.g. "English").
    pub source_lang: String,
    /// Target language name.
    pub target_lang: String,
    /// Authoritative text, trimmed.
    pub content: String,
    pub instruction: Option<String>,
    pub prior: Option<PriorTurn>,
}

impl GenerationRequest {
    pub fn new(from: PartKind, content: &str, languages: Languages) -> Self {
        Self {
            references: References::default(),
            from,
            source_lang: languages.source.name().to_string(),
            target_lang: languages.target.name().to_string(),
            content: content.trim().to_string(),
            instruction: None,
            prior: None,
        }
    }

    /// Blank instructions are dropped.
    pub fn with_instruction(mut self, instruction: Option<&str>) -> Self {
        self.instruction = instruction
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        self
    }

    pub fn with_prior(mut self, prior: Option<&Snapshot>) -> Self {
        self.prior = prior.map(PriorTurn::from);
        self
    }

    pub fn with_references(mut self, references: References) -> Self {
        self.references = references;
        self
    }

    /// Language name of the side being read.
    pub fn from_lang(&self) -> &str {
        match self.from {
            PartKind::Source => &self.source_lang,
            PartKind::Target => &self.target_lang,
        }
    }

    /// Language name of the side being written.
    pub fn to_lang(&self) -> &str {
        match self.from {
            PartKind::Source => &self.target_lang,
            PartKind::Target => &self.source_lang,
        }
    }
}

/// Error type for generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Provider not configured or unavailable.
    #[error("provider not available: {0}")]
    Unavailable(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Rate limited.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// API error.
    #[error("api error: {0}")]
    Api(String),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// The stream carried something we could not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for generation.
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Stream of generated text chunks; a single `Err` ends it.
pub type ChunkStream = BoxStream<'static, GenerationResult<String>>;

/// The external text-generation service.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider name (e.g. "openai", "scripted").
    fn name(&self) -> &str;

    /// Start generating. Failing here is a pre-stream transport error.
    ///
    /// The stream should end promptly once `token` is cancelled.
    async fn generate(
        &self,
        request: Arc<GenerationRequest>,
        token: SyncToken,
    ) -> GenerationResult<ChunkStream>;
}
