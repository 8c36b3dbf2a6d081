//! Cross-crate integration and E2E tests
//!
//! These tests run the whole keyword pipeline over on-disk ledgers and
//! stores, reopening them between steps the way separate process runs would.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hnkw_ledger::Ledger;
use hnkw_pipeline::testing::{MockApiServer, sample_replies, sample_stories, stories_jsonl};
use hnkw_pipeline::{
    ApiConfig, BatchResolver, ChatKeywordExtractor, ChatOptions, ItemState, KeywordExtractor,
    MockEmbedder, MockExtractor, OpenAiEmbedder, PipelineError, ResolverConfig, RunDriver, Story,
    collect_keywords, read_stories,
};
use hnkw_store::{EmbeddingStore, StoreConfig};
use tempfile::tempdir;

/// Run extraction once with a fresh driver, as a new process would.
async fn extract_run(
    ledger_path: &Path,
    extractor: Arc<dyn KeywordExtractor>,
    stories: &[Story],
) -> hnkw_pipeline::RunReport {
    let ledger = Ledger::open(ledger_path).unwrap();
    let mut driver = RunDriver::new(ledger, extractor).unwrap();
    driver.run(stories).await.unwrap()
}

fn ledger_keywords(ledger_path: &Path) -> Vec<String> {
    let ledger = Ledger::open(ledger_path).unwrap();
    collect_keywords(&ledger.read_markers().unwrap())
}

fn open_resolver(db: &Path, embedder: Arc<MockEmbedder>, batch_size: usize) -> BatchResolver {
    let store = EmbeddingStore::open(db, StoreConfig::default().with_dimension(8)).unwrap();
    BatchResolver::new(
        store,
        embedder,
        ResolverConfig::default().with_batch_size(batch_size),
    )
    .unwrap()
}

/// E2E Test: extraction, embedding, then a repeat run that computes nothing
#[tokio::test]
async fn test_e2e_pipeline_is_idempotent() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("keywords.csv");
    let db = dir.path().join("embeddings.db");

    let stories = vec![
        Story::new("1", "Fine-tuning Llama in Rust"),
        Story::new("2", "A new RAG benchmark"),
        Story::new("3", "Postgres 17 released"),
    ];
    let extractor = Arc::new(
        MockExtractor::new()
            .with_keywords("1", &["llama", "fine-tuning"], &["rust"])
            .with_keywords("2", &["rag", "llama"], &[])
            .with_keywords("3", &[], &["postgres"]),
    );

    let report = extract_run(&ledger_path, extractor.clone(), &stories).await;
    assert_eq!(report.done, 3);

    let keywords = ledger_keywords(&ledger_path);
    assert_eq!(keywords, vec!["llama", "fine-tuning", "rust", "rag", "postgres"]);

    let embedder = Arc::new(MockEmbedder::new(8));
    let first = {
        let mut resolver = open_resolver(&db, embedder.clone(), 2);
        let resolution = resolver.resolve_with_stats(&keywords).await.unwrap();
        resolver.into_store().close().unwrap();
        resolution
    };
    assert_eq!(first.stats.computed, 5);
    assert_eq!(first.stats.compute_calls, 3);

    // Second "process": nothing left to extract or embed
    let report = extract_run(&ledger_path, extractor.clone(), &stories).await;
    assert_eq!(report.skipped, 3);
    assert_eq!(extractor.seen().len(), 3);

    let mut resolver = open_resolver(&db, embedder.clone(), 2);
    let second = resolver.resolve_with_stats(&keywords).await.unwrap();
    assert_eq!(second.stats.compute_calls, 0);
    assert_eq!(second.embeddings, first.embeddings);
    assert_eq!(embedder.call_count(), 3);
}

/// E2E Test: an interrupted embedding run resumes with only the missing keywords
#[tokio::test]
async fn test_e2e_interrupted_resolve_resumes() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("embeddings.db");
    let keywords: Vec<String> = ["a", "b", "c", "d", "e", "f"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let failing = Arc::new(MockEmbedder::new(8).failing_on_call(2));
    {
        let mut resolver = open_resolver(&db, failing.clone(), 2);
        let err = resolver.resolve(&keywords).await.unwrap_err();
        assert!(matches!(err, PipelineError::Compute { chunk: 1, .. }));
    }
    assert_eq!(failing.call_count(), 2);

    let healthy = Arc::new(MockEmbedder::new(8));
    let mut resolver = open_resolver(&db, healthy.clone(), 2);
    let resolution = resolver.resolve_with_stats(&keywords).await.unwrap();

    assert_eq!(
        healthy.calls(),
        vec![
            vec!["c".to_string(), "d".to_string()],
            vec!["e".to_string(), "f".to_string()],
        ]
    );
    assert_eq!(resolution.stats.cached, 2);
    assert_eq!(resolution.embeddings.len(), 6);

    // Both embedders derive the same vector for "a"
    let expected = hnkw_store::codec::coerce(&healthy.vector_for("a"));
    assert_eq!(resolution.embeddings["a"], expected);
}

/// E2E Test: a crash mid-append leaves a torn row that the next run redoes
#[tokio::test]
async fn test_e2e_torn_ledger_row_is_reprocessed() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("keywords.csv");
    let stories = vec![Story::new("A", "a"), Story::new("B", "b"), Story::new("C", "c")];

    let extractor = Arc::new(MockExtractor::new().with_keywords("A", &["llm"], &[]));
    extract_run(&ledger_path, extractor, &stories[..1]).await;

    {
        let mut file = OpenOptions::new().append(true).open(&ledger_path).unwrap();
        file.write_all(b"B,\"[\"\"half").unwrap();
    }

    let extractor = Arc::new(MockExtractor::new().with_keywords("B", &[], &["go"]));
    let report = extract_run(&ledger_path, extractor.clone(), &stories).await;

    assert_eq!(extractor.seen(), vec!["B", "C"]);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.state("B"), Some(ItemState::Done));
    assert_eq!(ledger_keywords(&ledger_path), vec!["llm", "go"]);
}

/// E2E Test: the full flow over HTTP, from a JSON Lines dump to cached vectors
#[tokio::test]
async fn test_e2e_over_http() {
    let server = MockApiServer::start(8).await;
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("keywords.csv");
    let db = dir.path().join("embeddings.db");

    let stories = read_stories(stories_jsonl(&sample_stories()).as_bytes()).unwrap();
    assert_eq!(stories.len(), 4);

    let replies: HashMap<String, String> = sample_replies().into_iter().collect();
    for story in &stories {
        server.queue_reply(replies[&story.id].clone());
    }

    let api = ApiConfig::new("test-model")
        .with_base_url(server.url())
        .with_retry_backoff(Duration::from_millis(1));
    let extractor = Arc::new(ChatKeywordExtractor::new(api.clone(), ChatOptions::default()).unwrap());
    let report = extract_run(&ledger_path, extractor, &stories).await;
    assert_eq!(report.done, 4);
    assert_eq!(server.chat_requests().len(), 4);

    let keywords = ledger_keywords(&ledger_path);
    assert_eq!(keywords.len(), 7);

    let store = EmbeddingStore::open(&db, StoreConfig::default().with_dimension(8)).unwrap();
    let embedder = Arc::new(OpenAiEmbedder::new(api).unwrap());
    let mut resolver =
        BatchResolver::new(store, embedder, ResolverConfig::default().with_batch_size(3)).unwrap();
    let resolution = resolver.resolve_with_stats(&keywords).await.unwrap();

    assert_eq!(resolution.stats.compute_calls, 3);
    assert_eq!(server.embedding_requests().len(), 3);
    assert_eq!(
        resolution.embeddings["pgvector"],
        hnkw_store::codec::coerce(&server.vector_for("pgvector"))
    );
    assert_eq!(resolver.store().len().unwrap(), 7);

    server.shutdown().await;
}
