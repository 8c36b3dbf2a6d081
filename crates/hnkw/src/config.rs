//! Configuration file support for hnkw.
//!
//! All hnkw data is stored in a `.hnkw/` directory:
//! - `.hnkw/config.toml` - Configuration file
//! - `.hnkw/embeddings.db` - Embedding cache
//! - `.hnkw/keywords.csv` - Extraction ledger
//! - `.hnkw/logs/` - Log files (with `--log-file`)
//!
//! Config discovery searches for `.hnkw/config.toml` starting from the current
//! directory and walking up to parent directories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hnkw_pipeline::{
    ApiConfig, ChatOptions, DEFAULT_BATCH_SIZE, DEFAULT_EMBEDDING_MODEL, DEFAULT_EXTRACTION_MODEL,
    KEYWORD_EXTRACTION_INSTRUCTIONS,
};
use hnkw_store::StoreConfig;
use serde::{Deserialize, Serialize};

/// The hnkw data directory name.
pub const HNKW_DIR: &str = ".hnkw";
/// The config file name within the hnkw directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Embedding cache settings.
    pub store: StoreSection,
    /// Extraction ledger settings.
    pub ledger: LedgerSection,
    /// Embedding API settings.
    pub embedding: EmbeddingSection,
    /// Keyword extraction API settings.
    pub extraction: ExtractionSection,
}

/// Embedding cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSection {
    /// Path to the SQLite database.
    pub path: PathBuf,
    /// Expected vector dimension. Unchecked when absent.
    pub dimension: Option<usize>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            // Relative to .hnkw/ directory
            path: PathBuf::from("embeddings.db"),
            dimension: None,
        }
    }
}

/// Ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerSection {
    /// Path to the CSV ledger.
    pub path: PathBuf,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("keywords.csv"),
        }
    }
}

/// Embedding API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingSection {
    /// API base URL. Falls back to `LLM_BASE_URL`.
    pub base_url: Option<String>,
    pub model: String,
    /// API key. Falls back to `LLM_API_KEY`.
    pub api_key: Option<String>,
    /// Keywords per resolver chunk.
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key: None,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: 120,
            max_retries: 3,
        }
    }
}

/// Keyword extraction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractionSection {
    /// API base URL. Falls back to `LLM_BASE_URL`.
    pub base_url: Option<String>,
    pub model: String,
    /// API key. Falls back to `LLM_API_KEY`.
    pub api_key: Option<String>,
    pub temperature: f32,
    pub json_mode: bool,
    /// System instructions. The built-in prompt when absent.
    pub instructions: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: DEFAULT_EXTRACTION_MODEL.to_string(),
            api_key: None,
            temperature: 0.0,
            json_mode: true,
            instructions: None,
            timeout_secs: 120,
            max_retries: 3,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Looks for `.hnkw/config.toml` in the directory and its parents and
    /// returns the config with its `.hnkw` directory.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let hnkw_dir = dir.join(HNKW_DIR);
            let config_path = hnkw_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, hnkw_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    fn resolve(path: &Path, hnkw_dir: Option<&Path>) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(dir) = hnkw_dir {
            dir.join(path)
        } else {
            PathBuf::from(HNKW_DIR).join(path)
        }
    }

    /// Resolve the store path relative to the .hnkw directory.
    pub fn resolve_store_path(&self, hnkw_dir: Option<&Path>) -> PathBuf {
        Self::resolve(&self.store.path, hnkw_dir)
    }

    /// Resolve the ledger path relative to the .hnkw directory.
    pub fn resolve_ledger_path(&self, hnkw_dir: Option<&Path>) -> PathBuf {
        Self::resolve(&self.ledger.path, hnkw_dir)
    }

    pub fn store_config(&self) -> StoreConfig {
        match self.store.dimension {
            Some(dimension) => StoreConfig::default().with_dimension(dimension),
            None => StoreConfig::default(),
        }
    }

    /// Connection settings for the embedding API.
    pub fn embedding_api(&self, env: impl Fn(&str) -> Option<String>) -> ApiConfig {
        api_config(
            &self.embedding.model,
            self.embedding.base_url.as_deref(),
            self.embedding.api_key.as_deref(),
            self.embedding.timeout_secs,
            self.embedding.max_retries,
            env,
        )
    }

    /// Connection settings for the extraction API.
    pub fn extraction_api(&self, env: impl Fn(&str) -> Option<String>) -> ApiConfig {
        api_config(
            &self.extraction.model,
            self.extraction.base_url.as_deref(),
            self.extraction.api_key.as_deref(),
            self.extraction.timeout_secs,
            self.extraction.max_retries,
            env,
        )
    }

    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions::default()
            .with_instructions(
                self.extraction
                    .instructions
                    .clone()
                    .unwrap_or_else(|| KEYWORD_EXTRACTION_INSTRUCTIONS.to_string()),
            )
            .with_temperature(self.extraction.temperature)
            .with_json_mode(self.extraction.json_mode)
    }
}

/// Config values win over environment variables.
fn api_config(
    model: &str,
    base_url: Option<&str>,
    api_key: Option<&str>,
    timeout_secs: u64,
    max_retries: u32,
    env: impl Fn(&str) -> Option<String>,
) -> ApiConfig {
    let mut config = ApiConfig::from_lookup(model, &env)
        .with_timeout(Duration::from_secs(timeout_secs))
        .with_max_retries(max_retries);
    if let Some(url) = base_url {
        config = config.with_base_url(url);
    }
    if let Some(key) = api_key {
        config = config.with_api_key(key);
    }
    config
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ConfigValidationError {
                field: field.to_string(),
                message,
            })
        };

        if self.store.path.as_os_str().is_empty() {
            push("store.path", "Store path cannot be empty.".to_string());
        }
        if self.store.dimension == Some(0) {
            push("store.dimension", "Dimension must be at least 1.".to_string());
        }
        if self.ledger.path.as_os_str().is_empty() {
            push("ledger.path", "Ledger path cannot be empty.".to_string());
        }

        if self.embedding.model.trim().is_empty() {
            push("embedding.model", "Embedding model cannot be empty.".to_string());
        }
        if self.embedding.batch_size == 0 {
            push("embedding.batch_size", "Batch size must be at least 1.".to_string());
        }
        if self.embedding.timeout_secs == 0 {
            push("embedding.timeout_secs", "Timeout must be at least 1 second.".to_string());
        }

        if self.extraction.model.trim().is_empty() {
            push("extraction.model", "Extraction model cannot be empty.".to_string());
        }
        if !(0.0..=2.0).contains(&self.extraction.temperature) {
            push(
                "extraction.temperature",
                format!(
                    "Invalid temperature {}. Expected a value between 0 and 2.",
                    self.extraction.temperature
                ),
            );
        }
        if self.extraction.timeout_secs == 0 {
            push("extraction.timeout_secs", "Timeout must be at least 1 second.".to_string());
        }

        for (field, url) in [
            ("embedding.base_url", &self.embedding.base_url),
            ("extraction.base_url", &self.extraction.base_url),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    push(field, format!("Invalid URL '{}'. Expected http:// or https://.", url));
                }
            }
        }

        errors
    }
}

/// Template written by `hnkw init`.
pub const DEFAULT_CONFIG: &str = r#"# hnkw configuration
# All paths are relative to this .hnkw/ directory unless absolute

[store]
path = "embeddings.db"
# dimension = 3072  # Reject vectors of any other length

[ledger]
path = "keywords.csv"

[embedding]
model = "gemini-embedding-exp-03-07"
batch_size = 100
timeout_secs = 120
max_retries = 3
# base_url = "https://proxy.example.com/v1"  # Or use LLM_BASE_URL env var
# api_key = "sk-..."  # Or use LLM_API_KEY env var

[extraction]
model = "gemini-2.0-flash"
temperature = 0.0
json_mode = true
timeout_secs = 120
max_retries = 3
# instructions = "..."  # Replaces the built-in extraction prompt
"#;
