//! hnkw-pipeline: keyword extraction and embedding resolution
//!
//! This crate connects the model API to the two persistent stages of the
//! keyword pipeline:
//! - Resumable keyword extraction, checkpointed to the completion ledger
//! - Batch embedding resolution through the persistent embedding store
//! - `Embedder` / `KeywordExtractor` seams with OpenAI-compatible HTTP clients
//! - Deterministic mocks of both seams for tests

pub mod client;
pub mod driver;
pub mod embedder;
pub mod error;
pub mod extractor;
pub mod keywords;
pub mod prompts;
pub mod resolver;
pub mod story;

// Testing utilities - available in test builds and with the `testing` feature
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{API_KEY_ENV, ApiConfig, BASE_URL_ENV, DEFAULT_API_BASE, is_retryable, with_retry};
pub use driver::{ItemState, RunDriver, RunReport};
pub use embedder::{DEFAULT_EMBEDDING_MODEL, Embedder, MockEmbedder, OpenAiEmbedder};
pub use error::{PipelineError, Result};
pub use extractor::{
    ChatKeywordExtractor, ChatOptions, DEFAULT_EXTRACTION_MODEL, KeywordExtractor, MockExtractor,
    parse_keyword_reply,
};
pub use keywords::collect_keywords;
pub use prompts::KEYWORD_EXTRACTION_INSTRUCTIONS;
pub use resolver::{BatchResolver, DEFAULT_BATCH_SIZE, Resolution, ResolveStats, ResolverConfig};
pub use story::{ExtractedKeywords, Story, read_stories};
