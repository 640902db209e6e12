//! Completion provider abstraction.
//!
//! The analysis pipeline only needs one capability from a model provider: submit a prompt and get
//! back a lazy, finite, non-restartable sequence of text fragments. [`CompletionProvider`] captures
//! exactly that, so the pipeline never depends on a particular SDK and tests can substitute a fake.
//! [`OpenAiProvider`] is the production implementation against an OpenAI-compatible
//! `/chat/completions` endpoint.

mod openai;
mod sse;

pub use openai::OpenAiProvider;

use crate::analysis::prompt::PromptPayload;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Incremental provider output. Each item is one (possibly empty) text fragment.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider answered the submission with a non-success status
    #[error("{status} {message}")]
    Rejected { status: u16, message: String },

    /// Provider reported an error inside an already-open stream
    #[error("{message}")]
    Upstream { message: String },

    /// Stream event could not be decoded
    #[error("Malformed stream event: {0}")]
    MalformedEvent(String),

    #[error("Request to provider failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Submit a prompt and request an incremental response.
    ///
    /// Returns an error if the provider rejects the submission before any output is produced.
    /// Errors raised after that surface as items of the returned stream.
    async fn stream_completion(&self, payload: PromptPayload) -> Result<FragmentStream, ProviderError>;
}
