//! Ledger row types.

use serde::{Deserialize, Serialize};

/// Completion marker for one processed story.
///
/// Written once when keyword extraction succeeds and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    /// Story identifier; the dedup key of the ledger.
    pub story_id: String,

    /// Keywords about language models and AI.
    #[serde(default)]
    pub llm_keywords: Vec<String>,

    /// Keywords about software development.
    #[serde(default)]
    pub dev_keywords: Vec<String>,
}

impl ProcessedMarker {
    /// Create a marker for a story.
    pub fn new(
        story_id: impl Into<String>,
        llm_keywords: Vec<String>,
        dev_keywords: Vec<String>,
    ) -> Self {
        Self {
            story_id: story_id.into(),
            llm_keywords,
            dev_keywords,
        }
    }

    /// All keywords of the marker, LLM keywords first.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.llm_keywords
            .iter()
            .chain(self.dev_keywords.iter())
            .map(String::as_str)
    }
}
