//! TOML configuration and environment credentials.
//!
//! Every section has built-in defaults, so a config file only needs to list
//! what it overrides. Secrets never live in the TOML file: they are read from
//! the environment (optionally seeded from a `.env` file by the binary) and
//! validated up front by the commands that need them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the API key for the answer model.
pub const ENV_ANSWER_API_KEY: &str = "GROQ_API_KEY";
/// Environment variable holding the API key for the translation model.
pub const ENV_TRANSLATE_API_KEY: &str = "GROQ_TRANSLATE_API_KEY";
/// Environment variable holding the WhatsApp Cloud API access token.
pub const ENV_ACCESS_TOKEN: &str = "ACCESS_TOKEN";
/// Optional override for `whatsapp.verify_token`.
pub const ENV_VERIFY_TOKEN: &str = "VERIFY_TOKEN";
/// Optional Meta app secret used to check `X-Hub-Signature-256`.
pub const ENV_APP_SECRET: &str = "APP_SECRET";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Flat directory of source documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// JSON fingerprint ledger (file name → content hash).
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,
    /// SQLite file backing the vector index.
    #[serde(default = "default_index_db")]
    pub index_db: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ledger: default_ledger(),
            index_db: default_index_db(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_ledger() -> PathBuf {
    PathBuf::from("processed_files.json")
}
fn default_index_db() -> PathBuf {
    PathBuf::from("vector_store/index.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1500
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local` (fastembed) or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// L2-normalize every vector before it is stored or compared.
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_true")]
    pub show_download_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            normalize: true,
            show_download_progress: true,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the answer model.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Size of the nearest-neighbour pool MMR selects from.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// 1.0 = pure similarity, 0.0 = pure diversity.
    #[serde(default = "default_lambda_mult")]
    pub lambda_mult: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            lambda_mult: default_lambda_mult(),
        }
    }
}

fn default_k() -> usize {
    10
}
fn default_fetch_k() -> usize {
    20
}
fn default_lambda_mult() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub answer_model: String,
    #[serde(default = "default_llm_model")]
    pub translate_model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            answer_model: default_llm_model(),
            translate_model: default_llm_model(),
            temperature: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "meta-llama/llama-4-maverick-17b-128e-instruct".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct WhatsAppConfig {
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    #[serde(default = "default_graph_api_version")]
    pub api_version: String,
    /// Shared secret echoed back by Meta during webhook verification.
    #[serde(default = "default_verify_token")]
    pub verify_token: String,
    #[serde(default = "default_whatsapp_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            graph_base_url: default_graph_base_url(),
            api_version: default_graph_api_version(),
            verify_token: default_verify_token(),
            timeout_secs: default_whatsapp_timeout_secs(),
        }
    }
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com".to_string()
}
fn default_graph_api_version() -> String {
    "v24.0".to_string()
}
fn default_verify_token() -> String {
    "my_verify_token".to_string()
}
fn default_whatsapp_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Background tasks draining the webhook delivery queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Deliveries that may wait for a worker before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    /// Remove a modified file's previously indexed chunks before appending
    /// the new ones. Off by default: the index is append-only.
    #[serde(default)]
    pub retract_modified: bool,
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load `path` if given; otherwise fall back to built-in defaults when the
/// conventional location does not exist.
pub fn load_or_default(path: Option<&Path>, default_path: &Path) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None if default_path.exists() => load_config(default_path),
        None => {
            tracing::debug!(
                "no config file at {}, using defaults",
                default_path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chars == 0 {
            bail!("chunking.max_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
        }

        if self.retrieval.k == 0 {
            bail!("retrieval.k must be >= 1");
        }
        if self.retrieval.fetch_k < self.retrieval.k {
            bail!("retrieval.fetch_k must be >= retrieval.k");
        }
        if !(0.0..=1.0).contains(&self.retrieval.lambda_mult) {
            bail!("retrieval.lambda_mult must be in [0.0, 1.0]");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled or local.",
                other
            ),
        }
        if self.embedding.is_enabled() && self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        if self.server.workers == 0 {
            bail!("server.workers must be >= 1");
        }
        if self.server.queue_capacity == 0 {
            bail!("server.queue_capacity must be >= 1");
        }

        Ok(())
    }
}

// ============ Credentials ============

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set (add it to the environment or a .env file)")]
    MissingEnv(&'static str),
}

/// API keys for the two chat models. They may point at the same account but
/// are configured independently.
#[derive(Clone)]
pub struct LlmCredentials {
    pub answer_api_key: String,
    pub translate_api_key: String,
}

impl std::fmt::Debug for LlmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCredentials").finish_non_exhaustive()
    }
}

impl LlmCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            answer_api_key: require(&lookup, ENV_ANSWER_API_KEY)?,
            translate_api_key: require(&lookup, ENV_TRANSLATE_API_KEY)?,
        })
    }
}

/// Credentials and secrets for the WhatsApp front end.
#[derive(Clone)]
pub struct WhatsAppCredentials {
    pub access_token: String,
    pub verify_token: String,
    pub app_secret: Option<String>,
}

impl std::fmt::Debug for WhatsAppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppCredentials")
            .field("app_secret_set", &self.app_secret.is_some())
            .finish_non_exhaustive()
    }
}

impl WhatsAppCredentials {
    pub fn from_env(config: &WhatsAppConfig) -> Result<Self, ConfigError> {
        Self::from_lookup(config, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        config: &WhatsAppConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            access_token: require(&lookup, ENV_ACCESS_TOKEN)?,
            verify_token: non_empty(lookup(ENV_VERIFY_TOKEN))
                .unwrap_or_else(|| config.verify_token.clone()),
            app_secret: non_empty(lookup(ENV_APP_SECRET)),
        })
    }
}

fn require(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    non_empty(lookup(key)).ok_or(ConfigError::MissingEnv(key))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
