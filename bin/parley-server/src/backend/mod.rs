//! Completion backends.
//!
//! The relay only needs one capability from a model provider: given a
//! conversation, produce a stream of text deltas. [`CompletionBackend`] is
//! that seam; [`openai::OpenAiCompatBackend`] talks to any OpenAI-compatible
//! `chat/completions` endpoint.

pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parley_types::WireMessage;
use thiserror::Error;

pub use openai::OpenAiCompatBackend;

/// Incremental completion output. An `Err` item ends the stream.
pub type DeltaStream = BoxStream<'static, Result<String, BackendError>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream stream is malformed: {0}")]
    Decode(String),
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Open a streaming completion over `messages`.
    async fn stream_completion(&self, messages: Vec<WireMessage>) -> Result<DeltaStream, BackendError>;
}
