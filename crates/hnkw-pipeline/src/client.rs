//! Shared plumbing for the OpenAI-compatible model API.
//!
//! Both the embeddings client and the chat extractor talk to the same kind of
//! endpoint: a base URL, an optional bearer token, a model name, and a retry
//! policy for transient network failures.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, header};
use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "LLM_API_KEY";

/// Environment variable holding the API base URL.
pub const BASE_URL_ENV: &str = "LLM_BASE_URL";

/// Default API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Connection settings for a model API endpoint.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL for the API, without the endpoint path.
    pub base_url: String,

    /// Bearer token, if the endpoint needs one.
    pub api_key: Option<String>,

    /// Model name sent with every request.
    pub model: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl ApiConfig {
    /// Create a config for `model` against the default base URL.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: model.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Fill base URL and API key from `LLM_BASE_URL` / `LLM_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Self {
        Self::from_lookup(model, |name| std::env::var(name).ok())
    }

    /// Like [`ApiConfig::from_env`] with a custom variable lookup.
    pub fn from_lookup(
        model: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut config = Self::new(model);
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            config.base_url = url;
        }
        config.api_key = lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty());
        config
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set max retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the initial retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Full URL of an endpoint below the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub(crate) fn build_client(&self) -> Result<Client> {
        if self.base_url.trim().is_empty() {
            return Err(PipelineError::Config("API base URL is empty".to_string()));
        }
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {}", e)))
    }

    pub(crate) fn add_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(header::CONTENT_TYPE, "application/json");
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Map a non-success HTTP response to a pipeline error.
pub(crate) async fn error_from_response(response: Response) -> PipelineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

    match status.as_u16() {
        401 | 403 => PipelineError::Config(format!("Authentication failed: {}", message)),
        429 => PipelineError::Backend(format!("Rate limit exceeded: {}", message)),
        500..=599 => PipelineError::Backend(format!("Server error: {}", message)),
        _ => PipelineError::Backend(message),
    }
}

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures). Non-retryable errors
/// are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    client_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_retryable(&e) || attempt >= max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                tracing::warn!(
                    client = client_name,
                    attempt,
                    max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

/// Check if an error is retryable.
///
/// Only network errors are retried. Rate limits and server errors surface to
/// the caller, which recovers by re-running.
pub fn is_retryable(error: &PipelineError) -> bool {
    matches!(error, PipelineError::Network(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_endpoint_joins_slashes() {
        let config = ApiConfig::new("m").with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            config.endpoint("/embeddings"),
            "http://localhost:8080/v1/embeddings"
        );
    }

    #[test]
    fn test_from_lookup() {
        let vars = HashMap::from([
            (BASE_URL_ENV, "http://proxy.local/v1".to_string()),
            (API_KEY_ENV, "sk-test".to_string()),
        ]);
        let config = ApiConfig::from_lookup("m", |name| vars.get(name).cloned());
        assert_eq!(config.base_url, "http://proxy.local/v1");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));

        let config = ApiConfig::from_lookup("m", |_| Some(String::new()));
        assert_eq!(config.base_url, DEFAULT_API_BASE);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = ApiConfig::new("m").with_api_key("sk-secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&PipelineError::Network("reset".into())));
        assert!(!is_retryable(&PipelineError::Backend("429".into())));
        assert!(!is_retryable(&PipelineError::Config("bad key".into())));
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_network_error() {
        let attempts = &AtomicU32::new(0);
        let result = with_retry(3, Duration::from_millis(1), "test", move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PipelineError::Network("reset".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up() {
        let attempts = &AtomicU32::new(0);
        let result: Result<()> = with_retry(2, Duration::from_millis(1), "test", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::Network("down".to_string()))
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Network(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_backend_errors() {
        let attempts = &AtomicU32::new(0);
        let result: Result<()> = with_retry(5, Duration::from_millis(1), "test", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::Backend("bad request".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
