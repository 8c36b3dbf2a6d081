//! Resumable keyword-extraction runs.
//!
//! The driver checkpoints every story it finishes to the [`Ledger`]. On start
//! it reloads the ledger, so a run interrupted at any point resumes with only
//! the stories that never got a marker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hnkw_ledger::Ledger;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::extractor::KeywordExtractor;
use crate::story::Story;

/// Per-story state within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Processing,
    Done,
    Failed,
}

/// Outcome of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Final state of every story handled in this run.
    pub states: HashMap<String, ItemState>,
    /// Stories extracted and checkpointed.
    pub done: usize,
    /// Stories whose extraction failed. They are retried by the next run.
    pub failed: usize,
    /// Stories skipped because the ledger already had them.
    pub skipped: usize,
    /// One `ItemProcessing` error per failed story.
    pub failures: Vec<PipelineError>,
}

impl RunReport {
    pub fn state(&self, story_id: &str) -> Option<ItemState> {
        self.states.get(story_id).copied()
    }
}

/// Drives keyword extraction over a list of stories with a durable checkpoint.
pub struct RunDriver {
    ledger: Ledger,
    extractor: Arc<dyn KeywordExtractor>,
    completed: HashSet<String>,
}

impl RunDriver {
    /// Create a driver, loading the completed set from the ledger.
    pub fn new(ledger: Ledger, extractor: Arc<dyn KeywordExtractor>) -> Result<Self> {
        let completed = ledger.completed_ids()?;
        tracing::info!(
            ledger = %ledger.path().display(),
            completed = completed.len(),
            "Loaded extraction checkpoint"
        );
        Ok(Self {
            ledger,
            extractor,
            completed,
        })
    }

    /// Ids already recorded in the ledger.
    pub fn completed(&self) -> &HashSet<String> {
        &self.completed
    }

    pub fn is_completed(&self, story_id: &str) -> bool {
        self.completed.contains(story_id)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Process every story not yet completed.
    ///
    /// Extraction failures are recorded and the run continues. A failed
    /// ledger append stops the run, since the checkpoint could no longer be
    /// trusted.
    pub async fn run(&mut self, stories: &[Story]) -> Result<RunReport> {
        let mut report = RunReport::default();

        let mut queue = Vec::new();
        for story in stories {
            // Ledger rows carry trimmed ids
            let id = story.id.trim();
            if self.completed.contains(id) {
                report.skipped += 1;
                continue;
            }
            if report.states.contains_key(id) {
                tracing::debug!(story_id = %id, "Duplicate story in input, ignoring");
                continue;
            }
            if id.is_empty() {
                tracing::warn!(title = %story.title, "Story without an id, not extracting");
                report.states.insert(String::new(), ItemState::Failed);
                report.failed += 1;
                report.failures.push(PipelineError::ItemProcessing {
                    story_id: String::new(),
                    message: "story id is empty".to_string(),
                });
                continue;
            }
            report.states.insert(id.to_string(), ItemState::Pending);
            queue.push((id, story));
        }

        tracing::info!(
            candidates = stories.len(),
            pending = queue.len(),
            skipped = report.skipped,
            extractor = self.extractor.name(),
            "Starting extraction run"
        );

        for (position, (id, story)) in queue.into_iter().enumerate() {
            report.states.insert(id.to_string(), ItemState::Processing);

            match self.extractor.extract(story).await {
                Ok(keywords) => {
                    let marker = keywords.into_marker(id);
                    self.ledger.append(&marker)?;
                    self.completed.insert(id.to_string());
                    report.states.insert(id.to_string(), ItemState::Done);
                    report.done += 1;
                    tracing::debug!(
                        story_id = %id,
                        position,
                        llm_keywords = marker.llm_keywords.len(),
                        dev_keywords = marker.dev_keywords.len(),
                        "Story done"
                    );
                }
                Err(e) => {
                    tracing::warn!(story_id = %id, error = %e, "Keyword extraction failed");
                    report.states.insert(id.to_string(), ItemState::Failed);
                    report.failed += 1;
                    report.failures.push(PipelineError::ItemProcessing {
                        story_id: id.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            done = report.done,
            failed = report.failed,
            skipped = report.skipped,
            "Extraction run finished"
        );
        Ok(report)
    }
}
