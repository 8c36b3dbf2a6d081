//! Test fixtures for common pipeline scenarios.

use crate::story::Story;

// ============================================================================
// Stories
// ============================================================================

/// A small front page: two AI stories, one dev story, one off-topic.
pub fn sample_stories() -> Vec<Story> {
    vec![
        Story::new("39000001", "Show HN: Running Llama 3 on a Raspberry Pi")
            .with_url("https://example.com/llama-pi"),
        Story::new("39000002", "Ask HN: How do you evaluate RAG pipelines?")
            .with_text("We use embeddings with pgvector and want better recall metrics."),
        Story::new("39000003", "Rust 1.80 released").with_url("https://blog.rust-lang.org"),
        Story::new("39000004", "The history of the paperclip"),
    ]
}

/// Serialize stories as JSON Lines.
pub fn stories_jsonl(stories: &[Story]) -> String {
    stories
        .iter()
        .map(|s| serde_json::to_string(s).unwrap() + "\n")
        .collect()
}

// ============================================================================
// Model replies
// ============================================================================

/// A chat reply carrying the two keyword lists.
pub fn keyword_reply(llm: &[&str], dev: &[&str]) -> String {
    serde_json::json!({
        "llm_keywords": llm,
        "dev_keywords": dev,
    })
    .to_string()
}

/// Keywords a reasonable model would return for [`sample_stories`].
pub fn sample_replies() -> Vec<(String, String)> {
    vec![
        (
            "39000001".to_string(),
            keyword_reply(&["llama 3", "local inference"], &["raspberry pi"]),
        ),
        (
            "39000002".to_string(),
            keyword_reply(&["rag", "embeddings"], &["pgvector"]),
        ),
        ("39000003".to_string(), keyword_reply(&[], &["rust"])),
        ("39000004".to_string(), keyword_reply(&[], &[])),
    ]
}
