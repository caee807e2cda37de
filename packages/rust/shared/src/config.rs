//! Application configuration for docmodern.
//!
//! User config lives at `~/.docmodern/docmodern.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocModernError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docmodern.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docmodern";

// ---------------------------------------------------------------------------
// Config structs (matching docmodern.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion-service settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Timeouts and retry policy.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Prompt size limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of an OpenAI-compatible chat-completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Completion token cap per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.2
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Upper bound for a single document fetch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Upper bound for a single completion-service call.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Extra attempts after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on each further retry.
    #[serde(default = "default_backoff")]
    pub retry_backoff_ms: u64,

    /// Backoff cap.
    #[serde(default = "default_backoff_max")]
    pub retry_backoff_max_ms: u64,

    /// Finding categories researched per completion call.
    #[serde(default = "default_research_batch")]
    pub research_batch_size: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            stage_timeout_secs: default_stage_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_backoff(),
            retry_backoff_max_ms: default_backoff_max(),
            research_batch_size: default_research_batch(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_stage_timeout() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff() -> u64 {
    500
}
fn default_backoff_max() -> u64 {
    8_000
}
fn default_research_batch() -> usize {
    8
}

/// `[limits]` section: characters of each document embedded in prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_analysis_chars")]
    pub analysis_chars: usize,
    #[serde(default = "default_generation_chars")]
    pub generation_chars: usize,
    #[serde(default = "default_quality_chars")]
    pub quality_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            analysis_chars: default_analysis_chars(),
            generation_chars: default_generation_chars(),
            quality_chars: default_quality_chars(),
        }
    }
}

fn default_analysis_chars() -> usize {
    8_000
}
fn default_generation_chars() -> usize {
    12_000
}
fn default_quality_chars() -> usize {
    2_000
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Read-only runtime configuration handed to the orchestrator at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch_timeout: Duration,
    pub stage_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
    pub research_batch_size: usize,
    pub analysis_chars: usize,
    pub generation_chars: usize,
    pub quality_chars: usize,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.pipeline.fetch_timeout_secs),
            stage_timeout: Duration::from_secs(config.pipeline.stage_timeout_secs),
            max_retries: config.pipeline.max_retries,
            retry_backoff: Duration::from_millis(config.pipeline.retry_backoff_ms),
            retry_backoff_max: Duration::from_millis(config.pipeline.retry_backoff_max_ms),
            research_batch_size: config.pipeline.research_batch_size.max(1),
            analysis_chars: config.limits.analysis_chars,
            generation_chars: config.limits.generation_chars,
            quality_chars: config.limits.quality_chars,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docmodern/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocModernError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docmodern/docmodern.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocModernError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DocModernError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocModernError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocModernError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocModernError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the completion-service API key from the configured env var.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DocModernError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    resolve_api_key(config).map(|_| ())
}
