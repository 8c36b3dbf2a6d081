//! Error types for the keyword pipeline.

use hnkw_ledger::LedgerError;
use hnkw_store::StoreError;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while resolving embeddings or extracting keywords.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Error from the embedding store. Integrity errors always surface here.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error reading or appending the completion ledger.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The embedder failed for one chunk of a resolve call.
    ///
    /// Chunks before `chunk` were committed; later chunks were not attempted.
    #[error("Compute failed for chunk {chunk}: {source}")]
    Compute {
        chunk: usize,
        #[source]
        source: Box<PipelineError>,
    },

    /// Error reported by the model API.
    #[error("Backend error: {0}")]
    Backend(String),

    /// HTTP/network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Keyword extraction failed for a single story.
    #[error("Processing failed for story {story_id}: {message}")]
    ItemProcessing { story_id: String, message: String },
}

impl PipelineError {
    /// Wrap an embedder failure with the index of the chunk it happened in.
    pub fn compute(chunk: usize, source: PipelineError) -> Self {
        PipelineError::Compute {
            chunk,
            source: Box::new(source),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Serialization(e.to_string())
    }
}
