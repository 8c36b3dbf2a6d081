//! Keyword extraction seam.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::client::{ApiConfig, error_from_response, with_retry};
use crate::error::{PipelineError, Result};
use crate::prompts::KEYWORD_EXTRACTION_INSTRUCTIONS;
use crate::story::{ExtractedKeywords, Story};

/// Default chat model for extraction.
pub const DEFAULT_EXTRACTION_MODEL: &str = "gemini-2.0-flash";

/// Extracts keywords from a story.
#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    async fn extract(&self, story: &Story) -> Result<ExtractedKeywords>;

    /// Get the extractor name (for logging).
    fn name(&self) -> &str;
}

/// Settings of a chat completion call beyond the connection.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// System instructions.
    pub instructions: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Ask the endpoint for a JSON object response.
    pub json_mode: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            instructions: KEYWORD_EXTRACTION_INSTRUCTIONS.to_string(),
            temperature: 0.0,
            json_mode: true,
        }
    }
}

impl ChatOptions {
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Extractor backed by an OpenAI-compatible chat completions endpoint.
pub struct ChatKeywordExtractor {
    client: Client,
    config: ApiConfig,
    options: ChatOptions,
}

impl ChatKeywordExtractor {
    pub fn new(config: ApiConfig, options: ChatOptions) -> Result<Self> {
        let client = config.build_client()?;
        Ok(Self {
            client,
            config,
            options,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn complete(&self, input: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.options.instructions,
                },
                ChatMessage {
                    role: "user",
                    content: input,
                },
            ],
            temperature: self.options.temperature,
            response_format: self.options.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = self
            .config
            .add_headers(self.client.post(self.config.endpoint("chat/completions")))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let text = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| PipelineError::Backend("response has no message content".to_string()))
    }
}

/// Parse the model reply into keyword lists.
///
/// Tolerates a surrounding Markdown code fence. Missing lists are empty.
pub fn parse_keyword_reply(reply: &str) -> Result<ExtractedKeywords> {
    let mut body = reply.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    if body.is_empty() {
        return Err(PipelineError::Serialization(
            "empty keyword reply".to_string(),
        ));
    }
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl KeywordExtractor for ChatKeywordExtractor {
    async fn extract(&self, story: &Story) -> Result<ExtractedKeywords> {
        let prompt = story.prompt_input();
        let input = prompt.as_str();
        tracing::debug!(
            story_id = %story.id,
            model = %self.config.model,
            input_chars = input.len(),
            "Requesting keyword extraction"
        );

        let reply = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            move || self.complete(input),
        )
        .await?;

        parse_keyword_reply(&reply)
    }

    fn name(&self) -> &str {
        "chat-extractor"
    }
}

/// A canned extractor for tests.
///
/// Returns registered keywords per story id, empty lists for unknown ids, and
/// an error for ids marked as failing. Every story it sees is recorded.
#[derive(Debug, Default)]
pub struct MockExtractor {
    keywords: HashMap<String, ExtractedKeywords>,
    failing: HashSet<String>,
    seen: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return these keywords for `story_id`.
    pub fn with_keywords(
        mut self,
        story_id: impl Into<String>,
        llm: &[&str],
        dev: &[&str],
    ) -> Self {
        self.keywords.insert(
            story_id.into(),
            ExtractedKeywords::new(
                llm.iter().map(|s| s.to_string()).collect(),
                dev.iter().map(|s| s.to_string()).collect(),
            ),
        );
        self
    }

    /// Fail every extraction for `story_id`.
    pub fn failing_for(mut self, story_id: impl Into<String>) -> Self {
        self.failing.insert(story_id.into());
        self
    }

    /// Ids of every story passed to `extract`, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeywordExtractor for MockExtractor {
    async fn extract(&self, story: &Story) -> Result<ExtractedKeywords> {
        self.seen.lock().unwrap().push(story.id.clone());

        if self.failing.contains(&story.id) {
            return Err(PipelineError::Backend(format!(
                "MockExtractor: failing story {}",
                story.id
            )));
        }
        Ok(self.keywords.get(&story.id).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
