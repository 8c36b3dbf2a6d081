//! Embedding computation seam.
//!
//! The resolver only knows the [`Embedder`] trait. [`OpenAiEmbedder`] talks to
//! an OpenAI-compatible `/embeddings` endpoint; [`MockEmbedder`] produces
//! deterministic vectors for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::client::{ApiConfig, error_from_response, with_retry};
use crate::error::{PipelineError, Result};

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-exp-03-07";

/// Computes embedding vectors for keywords.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `inputs`, returning exactly one vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f64>>>;

    /// Get the embedder name (for logging).
    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
    #[serde(default)]
    index: Option<usize>,
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    config: ApiConfig,
}

impl OpenAiEmbedder {
    /// Create a new embedder with the given configuration.
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = config.build_client()?;
        Ok(Self { client, config })
    }

    /// Create an embedder for the default model, configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(ApiConfig::from_env(DEFAULT_EMBEDDING_MODEL))
    }

    /// Get the configuration.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f64>>> {
        let body = EmbeddingRequest {
            input: inputs,
            model: &self.config.model,
        };
        let response = self
            .config
            .add_headers(self.client.post(self.config.endpoint("embeddings")))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let text = response.text().await?;
        let parsed: EmbeddingResponse = serde_json::from_str(&text)?;
        order_by_index(parsed.data)
    }
}

/// Put response vectors back into request order.
///
/// Entries without an index keep their position in the response.
fn order_by_index(data: Vec<EmbeddingData>) -> Result<Vec<Vec<f64>>> {
    let len = data.len();
    let mut slots: Vec<Option<Vec<f64>>> = vec![None; len];
    for (position, item) in data.into_iter().enumerate() {
        let index = item.index.unwrap_or(position);
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(item.embedding),
            _ => {
                return Err(PipelineError::Backend(format!(
                    "embedding index {} is out of range or repeated",
                    index
                )));
            }
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f64>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            model = %self.config.model,
            inputs = inputs.len(),
            "Requesting embeddings"
        );

        let start = std::time::Instant::now();
        let vectors = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            move || self.request(inputs),
        )
        .await?;

        tracing::debug!(
            vectors = vectors.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Embeddings received"
        );
        Ok(vectors)
    }

    fn name(&self) -> &str {
        "openai-embeddings"
    }
}

/// A deterministic embedder for tests.
///
/// Each keyword maps to a fixed vector derived from its bytes unless an
/// explicit vector was registered. Every call is recorded.
#[derive(Debug)]
pub struct MockEmbedder {
    dimension: usize,
    vectors: HashMap<String, Vec<f64>>,
    fail_on_call: Option<usize>,
    drop_last: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockEmbedder {
    /// Create a mock producing vectors of `dimension` elements.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
            fail_on_call: None,
            drop_last: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Return `vector` for `keyword` instead of the derived one.
    pub fn with_vector(mut self, keyword: impl Into<String>, vector: Vec<f64>) -> Self {
        self.vectors.insert(keyword.into(), vector);
        self
    }

    /// Fail the `n`-th call (1-based) with a backend error.
    pub fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// Return one vector too few on every call.
    pub fn dropping_last(mut self) -> Self {
        self.drop_last = true;
        self
    }

    /// Stop failing; calls keep being recorded.
    pub fn heal(&mut self) {
        self.fail_on_call = None;
        self.drop_last = false;
    }

    /// The vector this mock returns for `keyword`.
    pub fn vector_for(&self, keyword: &str) -> Vec<f64> {
        if let Some(vector) = self.vectors.get(keyword) {
            return vector.clone();
        }

        // FNV-1a over the keyword bytes, then one value per element
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in keyword.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (0..self.dimension)
            .map(|i| {
                let bits = hash.rotate_left((i as u32 * 7) % 64);
                // Multiples of 1/256 survive narrowing to f32 exactly
                (bits % 512) as f64 / 256.0 - 1.0
            })
            .collect()
    }

    /// Inputs of every call made so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f64>>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(inputs.to_vec());
            calls.len()
        };

        if self.fail_on_call == Some(call) {
            return Err(PipelineError::Backend(format!(
                "MockEmbedder: failing call {}",
                call
            )));
        }

        let mut vectors: Vec<_> = inputs.iter().map(|k| self.vector_for(k)).collect();
        if self.drop_last {
            vectors.pop();
        }
        Ok(vectors)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_order_by_index() {
        let data = vec![
            EmbeddingData {
                embedding: vec![2.0],
                index: Some(1),
            },
            EmbeddingData {
                embedding: vec![1.0],
                index: Some(0),
            },
        ];
        assert_eq!(order_by_index(data).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_order_without_index_keeps_position() {
        let data = vec![
            EmbeddingData {
                embedding: vec![1.0],
                index: None,
            },
            EmbeddingData {
                embedding: vec![2.0],
                index: None,
            },
        ];
        assert_eq!(order_by_index(data).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_order_rejects_repeated_index() {
        let data = vec![
            EmbeddingData {
                embedding: vec![1.0],
                index: Some(0),
            },
            EmbeddingData {
                embedding: vec![2.0],
                index: Some(0),
            },
        ];
        assert!(matches!(
            order_by_index(data),
            Err(PipelineError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let mock = MockEmbedder::new(8);
        let first = mock.embed(&strings(&["rust", "llm"])).await.unwrap();
        let second = mock.embed(&strings(&["rust"])).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].len(), 8);
        assert_eq!(first[0], second[0]);
        assert_ne!(first[0], first[1]);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.calls()[1], strings(&["rust"]));
    }

    #[tokio::test]
    async fn test_mock_registered_vector() {
        let mock = MockEmbedder::new(3).with_vector("ai", vec![0.5, 0.25, 0.125]);
        let vectors = mock.embed(&strings(&["ai"])).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.25, 0.125]]);
    }

    #[tokio::test]
    async fn test_mock_fails_on_nth_call() {
        let mut mock = MockEmbedder::new(2).failing_on_call(2);
        assert!(mock.embed(&strings(&["a"])).await.is_ok());
        assert!(mock.embed(&strings(&["b"])).await.is_err());
        assert!(mock.embed(&strings(&["c"])).await.is_ok());

        mock.heal();
        assert!(mock.embed(&strings(&["b"])).await.is_ok());
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn test_mock_dropping_last() {
        let mock = MockEmbedder::new(2).dropping_last();
        let vectors = mock.embed(&strings(&["a", "b"])).await.unwrap();
        assert_eq!(vectors.len(), 1);
    }
}
