//! Application configuration for OpenCraft.
//!
//! User config lives at `~/.opencraft/opencraft.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OpenCraftError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "opencraft.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".opencraft";

// ---------------------------------------------------------------------------
// Config structs (matching opencraft.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Persistent store location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Chat-completions service used to invent new materials.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Background enrichment queue.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the libSQL database file. A leading `~/` expands to home.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.opencraft/opencraft.db".into()
}

/// `[generator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended).
    #[serde(default = "default_generator_url")]
    pub base_url: String,

    /// Model identifier sent with every request.
    #[serde(default = "default_generator_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Resubmissions allowed after the first rejected candidate.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound on few-shot exemplars included in a prompt.
    #[serde(default = "default_max_exemplars")]
    pub max_exemplars: usize,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_generator_url(),
            model: default_generator_model(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            max_exemplars: default_max_exemplars(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_generator_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_generator_model() -> String {
    "meta-llama/llama-3.2-3b-instruct".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_max_retries() -> u32 {
    2
}
fn default_max_exemplars() -> usize {
    6
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.7
}

/// Which embedding implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Deterministic local hash embedder; no network.
    #[default]
    Hash,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// Base URL for the `http` backend (`/embeddings` is appended).
    #[serde(default = "default_embedding_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Name of the env var holding the API key for the `http` backend.
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    /// Fixed vector length; responses of any other length are rejected.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            base_url: default_embedding_url(),
            model: default_embedding_model(),
            api_key_env: default_embedding_key_env(),
            dimensions: default_dimensions(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_embedding_model() -> String {
    "all-minilm".into()
}
fn default_embedding_key_env() -> String {
    "OPENCRAFT_EMBEDDING_API_KEY".into()
}
fn default_dimensions() -> usize {
    384
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Parallel enrichment lanes. Each user is pinned to one lane.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum jobs waiting in the queue before submitters wait.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    256
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.opencraft/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| OpenCraftError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.opencraft/opencraft.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| OpenCraftError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        OpenCraftError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| OpenCraftError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| OpenCraftError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| OpenCraftError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the database path, expanding a leading `~/`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    let raw = config.database.path.as_str();
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| OpenCraftError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

/// Read an API key from the named env var; `None` when unset or empty.
pub fn api_key_from_env(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}

/// Whether `base_url` points at a loopback host (local Ollama etc.).
fn is_local_endpoint(base_url: &str) -> Result<bool> {
    let url = Url::parse(base_url)
        .map_err(|e| OpenCraftError::config(format!("invalid base_url '{base_url}': {e}")))?;
    Ok(matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("::1") | Some("[::1]")
    ))
}

/// Check that the generator API key env var is set when a remote endpoint
/// is configured. Local endpoints are allowed to run keyless.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    if is_local_endpoint(&config.generator.base_url)? {
        return Ok(());
    }
    let var_name = &config.generator.api_key_env;
    match api_key_from_env(var_name) {
        Some(_) => Ok(()),
        None => Err(OpenCraftError::config(format!(
            "generator API key not found. Set the {var_name} environment variable \
             or point [generator] base_url at a local endpoint."
        ))),
    }
}
