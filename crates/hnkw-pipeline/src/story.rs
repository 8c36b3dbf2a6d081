//! Stories fed to keyword extraction and the keywords extracted from them.

use std::io::BufRead;

use hnkw_ledger::ProcessedMarker;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PipelineError, Result};

/// A Hacker News story, as already fetched and cleaned upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    /// HN item id. Accepted as a string or an integer.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Body text for self posts.
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(u64),
    Str(String),
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match RawId::deserialize(deserializer)? {
        RawId::Int(id) => Ok(id.to_string()),
        RawId::Str(id) => Ok(id.trim().to_string()),
    }
}

impl Story {
    /// Create a story with a title only.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: None,
            url: None,
        }
    }

    /// Set the body text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set the link.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Text handed to the extractor: title, then body when present.
    pub fn prompt_input(&self) -> String {
        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => format!("{}\n\n{}", self.title, text),
            _ => self.title.clone(),
        }
    }
}

/// Read stories from JSON Lines, one object per line. Blank lines are ignored.
pub fn read_stories(reader: impl BufRead) -> Result<Vec<Story>> {
    let mut stories = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| PipelineError::Serialization(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let story: Story = serde_json::from_str(&line).map_err(|e| {
            PipelineError::Serialization(format!("line {}: {}", idx + 1, e))
        })?;
        if story.id.is_empty() {
            return Err(PipelineError::Serialization(format!(
                "line {}: story id is empty",
                idx + 1
            )));
        }
        stories.push(story);
    }
    Ok(stories)
}

/// Keywords extracted from one story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedKeywords {
    #[serde(default)]
    pub llm_keywords: Vec<String>,

    #[serde(default)]
    pub dev_keywords: Vec<String>,
}

impl ExtractedKeywords {
    pub fn new(llm_keywords: Vec<String>, dev_keywords: Vec<String>) -> Self {
        Self {
            llm_keywords,
            dev_keywords,
        }
    }

    /// Turn the keywords into the ledger row for `story_id`.
    pub fn into_marker(self, story_id: impl Into<String>) -> ProcessedMarker {
        ProcessedMarker::new(story_id, self.llm_keywords, self.dev_keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_as_int_or_string() {
        let a: Story = serde_json::from_str(r#"{"id": 8863, "title": "Dropbox"}"#).unwrap();
        let b: Story = serde_json::from_str(r#"{"id": "8863", "title": "Dropbox"}"#).unwrap();
        assert_eq!(a.id, "8863");
        assert_eq!(a, b);
    }

    #[test]
    fn test_prompt_input() {
        let story = Story::new("1", "Show HN: a Rust LLM router");
        assert_eq!(story.prompt_input(), "Show HN: a Rust LLM router");

        let story = story.with_text("Routes prompts to local models.");
        assert_eq!(
            story.prompt_input(),
            "Show HN: a Rust LLM router\n\nRoutes prompts to local models."
        );

        let blank = Story::new("2", "Title").with_text("  ");
        assert_eq!(blank.prompt_input(), "Title");
    }

    #[test]
    fn test_read_stories_skips_blank_lines() {
        let input = "{\"id\": 1, \"title\": \"a\"}\n\n{\"id\": \"2\", \"title\": \"b\", \"url\": \"https://x.dev\"}\n";
        let stories = read_stories(input.as_bytes()).unwrap();
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[1].url.as_deref(), Some("https://x.dev"));
    }

    #[test]
    fn test_read_stories_reports_line() {
        let input = "{\"id\": 1, \"title\": \"a\"}\nnot json\n";
        let err = read_stories(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_extracted_keywords_defaults() {
        let parsed: ExtractedKeywords =
            serde_json::from_str(r#"{"dev_keywords": ["rust"]}"#).unwrap();
        assert!(parsed.llm_keywords.is_empty());

        let marker = parsed.into_marker("5");
        assert_eq!(marker.story_id, "5");
        assert_eq!(marker.dev_keywords, vec!["rust"]);
    }
}
