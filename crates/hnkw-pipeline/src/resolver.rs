//! Batch resolution of keyword embeddings.
//!
//! The resolver splits a keyword list into chunks, looks each chunk up in the
//! [`EmbeddingStore`], computes only the missing keywords through an
//! [`Embedder`], and writes the new vectors back before moving on. A failure
//! in one chunk leaves every earlier chunk committed, so re-running resumes
//! where the previous run stopped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hnkw_store::{EmbeddingStore, StoreError, codec};
use serde::Serialize;

use crate::embedder::Embedder;
use crate::error::{PipelineError, Result};

/// Default number of keywords per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Configuration for the batch resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Maximum number of keywords looked up and computed together.
    pub batch_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ResolverConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Counters for one resolve call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    /// Chunks processed.
    pub chunks: usize,
    /// Keywords served from the store.
    pub cached: usize,
    /// Keywords computed and stored.
    pub computed: usize,
    /// Calls made to the embedder.
    pub compute_calls: usize,
}

/// Result of a resolve call.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Every distinct requested keyword mapped to its vector.
    pub embeddings: HashMap<String, Vec<f32>>,
    pub stats: ResolveStats,
}

/// Resolves keywords to vectors, computing only what the store lacks.
pub struct BatchResolver {
    store: EmbeddingStore,
    embedder: Arc<dyn Embedder>,
    config: ResolverConfig,
}

impl BatchResolver {
    /// Create a resolver. A batch size of zero is rejected.
    pub fn new(
        store: EmbeddingStore,
        embedder: Arc<dyn Embedder>,
        config: ResolverConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(PipelineError::Config(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            embedder,
            config,
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    /// Give the store back, e.g. to close it explicitly.
    pub fn into_store(self) -> EmbeddingStore {
        self.store
    }

    /// Resolve `keywords` to vectors.
    pub async fn resolve(&mut self, keywords: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        Ok(self.resolve_with_stats(keywords).await?.embeddings)
    }

    /// Resolve `keywords` and report what was cached and what was computed.
    pub async fn resolve_with_stats(&mut self, keywords: &[String]) -> Result<Resolution> {
        let mut resolution = Resolution::default();
        if keywords.is_empty() {
            return Ok(resolution);
        }
        // Nothing is looked up or computed for a list the store would reject
        if let Some(blank) = keywords.iter().find(|k| k.trim().is_empty()) {
            return Err(StoreError::Encoding {
                keyword: blank.clone(),
                reason: "keyword is empty".to_string(),
            }
            .into());
        }

        let total_chunks = keywords.len().div_ceil(self.config.batch_size);
        for (index, chunk) in keywords.chunks(self.config.batch_size).enumerate() {
            let existing = self.store.get_embeddings(chunk)?;

            let mut pending = HashSet::new();
            let missing: Vec<String> = chunk
                .iter()
                .filter(|k| !existing.contains_key(k.as_str()) && pending.insert(k.as_str()))
                .cloned()
                .collect();

            tracing::debug!(
                chunk = index,
                total_chunks,
                size = chunk.len(),
                cached = existing.len(),
                missing = missing.len(),
                "Resolving chunk"
            );

            resolution.stats.chunks += 1;
            resolution.stats.cached += existing.len();
            resolution.embeddings.extend(existing);

            if missing.is_empty() {
                continue;
            }

            let computed = self.compute(index, &missing).await?;
            resolution.stats.compute_calls += 1;
            resolution.stats.computed += computed.len();

            self.store.add_embeddings(&computed)?;
            resolution.embeddings.extend(computed);
        }

        tracing::info!(
            keywords = keywords.len(),
            distinct = resolution.embeddings.len(),
            chunks = resolution.stats.chunks,
            cached = resolution.stats.cached,
            computed = resolution.stats.computed,
            compute_calls = resolution.stats.compute_calls,
            embedder = self.embedder.name(),
            "Resolved embeddings"
        );
        Ok(resolution)
    }

    /// Call the embedder once for `missing` and pair each keyword with its vector.
    async fn compute(&self, chunk: usize, missing: &[String]) -> Result<Vec<(String, Vec<f32>)>> {
        let vectors = self
            .embedder
            .embed(missing)
            .await
            .map_err(|e| PipelineError::compute(chunk, e))?;

        if vectors.len() != missing.len() {
            return Err(PipelineError::compute(
                chunk,
                PipelineError::Backend(format!(
                    "embedder returned {} vectors for {} keywords",
                    vectors.len(),
                    missing.len()
                )),
            ));
        }

        Ok(missing
            .iter()
            .cloned()
            .zip(vectors.iter().map(|v| codec::coerce(v)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::MockEmbedder;
    use hnkw_store::StoreConfig;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn resolver(embedder: Arc<MockEmbedder>, batch_size: usize) -> BatchResolver {
        let store = EmbeddingStore::open_in_memory(StoreConfig::default()).unwrap();
        BatchResolver::new(
            store,
            embedder,
            ResolverConfig::default().with_batch_size(batch_size),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let store = EmbeddingStore::open_in_memory(StoreConfig::default()).unwrap();
        let result = BatchResolver::new(
            store,
            Arc::new(MockEmbedder::new(2)),
            ResolverConfig::default().with_batch_size(0),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_duplicate_keyword_in_chunk() {
        let embedder = Arc::new(
            MockEmbedder::new(2)
                .with_vector("ai", vec![1.0, 0.5])
                .with_vector("rust", vec![0.25, -2.0]),
        );
        let mut resolver = resolver(embedder.clone(), 2);

        let resolution = resolver
            .resolve_with_stats(&strings(&["ai", "rust", "ai"]))
            .await
            .unwrap();

        assert_eq!(embedder.calls(), vec![strings(&["ai", "rust"])]);
        assert_eq!(resolution.embeddings.len(), 2);
        assert_eq!(resolution.embeddings["ai"], vec![1.0f32, 0.5]);
        assert_eq!(resolution.embeddings["rust"], vec![0.25f32, -2.0]);
        assert_eq!(
            resolution.stats,
            ResolveStats {
                chunks: 2,
                cached: 1,
                computed: 2,
                compute_calls: 1,
            }
        );
        assert_eq!(resolver.store().len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stored_keywords_not_recomputed() {
        let embedder = Arc::new(MockEmbedder::new(4));
        let mut resolver = resolver(embedder.clone(), 10);

        let first = resolver.resolve(&strings(&["llm", "rag"])).await.unwrap();
        let second = resolver
            .resolve_with_stats(&strings(&["rag", "llm"]))
            .await
            .unwrap();

        assert_eq!(embedder.call_count(), 1);
        assert_eq!(second.stats.compute_calls, 0);
        assert_eq!(second.stats.cached, 2);
        assert_eq!(second.embeddings, first);
    }

    #[tokio::test]
    async fn test_only_missing_keywords_computed() {
        let embedder = Arc::new(MockEmbedder::new(4));
        let mut resolver = resolver(embedder.clone(), 10);

        resolver.resolve(&strings(&["a", "b"])).await.unwrap();
        resolver.resolve(&strings(&["b", "c", "a", "d"])).await.unwrap();

        assert_eq!(embedder.calls()[1], strings(&["c", "d"]));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let embedder = Arc::new(MockEmbedder::new(2));
        let mut resolver = resolver(embedder.clone(), 3);

        let resolution = resolver.resolve_with_stats(&[]).await.unwrap();
        assert!(resolution.embeddings.is_empty());
        assert_eq!(resolution.stats, ResolveStats::default());
        assert_eq!(embedder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_earlier_chunks() {
        let embedder = Arc::new(MockEmbedder::new(2).failing_on_call(2));
        let mut resolver = resolver(embedder.clone(), 2);
        let keywords = strings(&["a", "b", "c", "d", "e", "f"]);

        let err = resolver.resolve(&keywords).await.unwrap_err();
        assert!(matches!(err, PipelineError::Compute { chunk: 1, .. }));

        // Chunk 0 committed, chunk 2 never attempted
        assert_eq!(embedder.call_count(), 2);
        let stored = resolver.store().get_embeddings(&keywords).unwrap();
        let mut stored: Vec<_> = stored.into_keys().collect();
        stored.sort();
        assert_eq!(stored, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_compute_failure() {
        let embedder = Arc::new(MockEmbedder::new(2).dropping_last());
        let mut resolver = resolver(embedder, 5);

        let err = resolver.resolve(&strings(&["x", "y"])).await.unwrap_err();
        match err {
            PipelineError::Compute { chunk, source } => {
                assert_eq!(chunk, 0);
                assert!(source.to_string().contains("1 vectors for 2 keywords"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(resolver.store().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_vectors_coerced_to_f32() {
        let embedder = Arc::new(MockEmbedder::new(1).with_vector("pi", vec![std::f64::consts::PI]));
        let mut resolver = resolver(embedder, 1);

        let resolved = resolver.resolve(&strings(&["pi"])).await.unwrap();
        assert_eq!(resolved["pi"], vec![std::f32::consts::PI]);

        let stored = resolver.store().get_embeddings(&["pi"]).unwrap();
        assert_eq!(stored["pi"][0].to_bits(), std::f32::consts::PI.to_bits());
    }

    #[tokio::test]
    async fn test_blank_keyword_rejected_before_compute() {
        let embedder = Arc::new(MockEmbedder::new(3));
        let mut resolver = resolver(embedder.clone(), 2);

        let err = resolver
            .resolve(&strings(&["rust", "go", "  "]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Store(StoreError::Encoding { ref keyword, .. }) if keyword == "  "
        ));
        assert_eq!(embedder.call_count(), 0);
        assert!(resolver.store().is_empty().unwrap());
    }
}
