//! Environment-driven configuration for the search service.
//!
//! This module loads and validates settings once at startup (via `init_settings`) and exposes
//! a global, read-only view through `get_settings`. The configuration powers both the HTTP
//! service and the export CLI and includes:
//!
//! - Service binding and logging (`APP_HOST`, `APP_PORT`, `APP_LOG_LEVEL`).
//! - Chroma connectivity (`CHROMA_HOST`, `CHROMA_PORT`, `CHROMA_SSL`, `CHROMA_API_KEY?`,
//!   `CHROMA_COLLECTION`, `CHROMA_ANONYMIZED_TELEMETRY`).
//! - Embedding provider/model (`EMBEDDING_PROVIDER`, `EMBEDDING_MODEL`, `EMBEDDING_DEVICE?`,
//!   `OPENAI_API_KEY?`, `GEMINI_API_KEY?`).
//! - Cache connectivity (`REDIS_URL` or `REDIS_HOST`/`REDIS_PORT`/`REDIS_DB`/`REDIS_PASSWORD`).
//! - Response composition (`ENABLE_TOTAL_DOCUMENTS`, `ENABLE_ESTIMATED_RESULTS`,
//!   `ENABLE_PAGINATION`, `MAX_ESTIMATED_RESULTS`).
//! - Approved-query publication (`SHOW_APPROVED_QUERIES`, `APPROVED_QUERIES_MIN_COUNT`,
//!   `APPROVED_QUERIES_LIMIT`).
//! - Authentication (`ENABLE_API_AUTH`, `DEFAULT_RATE_LIMIT_PER_DAY`).
//! - Response caching (`DEFAULT_USE_CACHE`, `SEARCH_CACHE_TTL`).
//!
//! Most fields are optional with sensible defaults; invalid combinations are flagged early
//! with descriptive errors so misconfiguration is easy to diagnose. Unknown environment
//! variables are ignored, and an unsupported `APP_LOG_LEVEL` falls back to `info`.
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the search service.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Interface the HTTP server binds to.
    pub app_host: String,
    /// Port the HTTP server binds to.
    pub app_port: u16,
    /// Log level applied when `RUST_LOG` is absent.
    pub log_level: String,

    /// Hostname of the Chroma server.
    pub chroma_host: String,
    /// Port of the Chroma server.
    pub chroma_port: u16,
    /// Whether to reach Chroma over HTTPS.
    pub chroma_ssl: bool,
    /// Optional `Authorization` header value for secured Chroma instances.
    pub chroma_api_key: Option<String>,
    /// Default collection queried when no model override is supplied.
    pub chroma_collection: String,
    /// Recognized for compatibility; embedded persistent mode is rejected at startup.
    pub chroma_persist_directory: Option<String>,
    /// Telemetry opt-in flag forwarded to the store.
    pub chroma_anonymized_telemetry: bool,

    /// Embedding provider used for the default collection.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Optional device override for the local transformer backend (`cpu`/`cuda`).
    pub embedding_device: Option<String>,
    /// API key for the OpenAI embeddings endpoint.
    pub openai_api_key: Option<String>,
    /// API key for the Gemini embeddings endpoint.
    pub gemini_api_key: Option<String>,

    /// Full Redis URL; overrides the host/port/db/password fields when set.
    pub redis_url: Option<String>,
    /// Redis hostname used when `REDIS_URL` is absent.
    pub redis_host: String,
    /// Redis port used when `REDIS_URL` is absent.
    pub redis_port: u16,
    /// Redis logical database index.
    pub redis_db: u32,
    /// Optional Redis password.
    pub redis_password: Option<String>,

    /// Include the collection document count in search responses.
    pub enable_total_documents: bool,
    /// Include the estimated-total string in pagination info.
    pub enable_estimated_results: bool,
    /// Enable server-side pagination of search results.
    pub enable_pagination: bool,
    /// Upper bound on results fetched from the store per query.
    pub max_estimated_results: usize,

    /// Expose approved queries on the public endpoint.
    pub show_approved_queries: bool,
    /// Minimum search count before an approved query is surfaced.
    pub approved_queries_min_count: i64,
    /// Maximum number of approved queries returned.
    pub approved_queries_limit: i64,

    /// Require bearer tokens on non-public paths.
    pub enable_api_auth: bool,
    /// Daily request allowance assigned to newly created tokens.
    pub default_rate_limit_per_day: i64,

    /// Default for the `use_cache` request flag.
    pub default_use_cache: bool,
    /// TTL in seconds for cached single-model search responses.
    pub search_cache_ttl: u64,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Local transformer model executed in-process.
    HuggingFace,
    /// Hosted Gemini embeddings API.
    Gemini,
    /// No embedder; the collection must own an embedding function.
    None,
}

impl EmbeddingProvider {
    /// Wire name used in metadata, cache keys, and persistence rows.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::HuggingFace => "huggingface",
            Self::Gemini => "gemini",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "huggingface" => Ok(Self::HuggingFace),
            "gemini" => Ok(Self::Gemini),
            "none" => Ok(Self::None),
            _ => Err(()),
        }
    }
}

impl Settings {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_estimated_results = load_usize_with_default("MAX_ESTIMATED_RESULTS", 1000)?;
        if max_estimated_results == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ESTIMATED_RESULTS must be at least 1".into(),
            ));
        }

        let search_cache_ttl = load_u64_with_default("SEARCH_CACHE_TTL", 3600)?;
        if search_cache_ttl == 0 {
            return Err(ConfigError::InvalidValue(
                "SEARCH_CACHE_TTL must be at least 1 second".into(),
            ));
        }

        Ok(Self {
            app_host: load_env_with_default("APP_HOST", "0.0.0.0"),
            app_port: load_u16_with_default("APP_PORT", 8080)?,
            log_level: normalize_log_level(&load_env_with_default("APP_LOG_LEVEL", "info")),
            chroma_host: load_env_with_default("CHROMA_HOST", "localhost"),
            chroma_port: load_u16_with_default("CHROMA_PORT", 8000)?,
            chroma_ssl: load_bool_with_default("CHROMA_SSL", false)?,
            chroma_api_key: load_env_optional("CHROMA_API_KEY"),
            chroma_collection: load_env_with_default("CHROMA_COLLECTION", "book_pages"),
            chroma_persist_directory: load_env_optional("CHROMA_PERSIST_DIR"),
            chroma_anonymized_telemetry: load_bool_with_default(
                "CHROMA_ANONYMIZED_TELEMETRY",
                false,
            )?,
            embedding_provider: load_env_with_default("EMBEDDING_PROVIDER", "openai")
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env_with_default("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_device: load_env_optional("EMBEDDING_DEVICE"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            gemini_api_key: load_env_optional("GEMINI_API_KEY"),
            redis_url: load_env_optional("REDIS_URL"),
            redis_host: load_env_with_default("REDIS_HOST", "localhost"),
            redis_port: load_u16_with_default("REDIS_PORT", 6379)?,
            redis_db: load_u32_with_default("REDIS_DB", 0)?,
            redis_password: load_env_optional("REDIS_PASSWORD"),
            enable_total_documents: load_bool_with_default("ENABLE_TOTAL_DOCUMENTS", true)?,
            enable_estimated_results: load_bool_with_default("ENABLE_ESTIMATED_RESULTS", true)?,
            enable_pagination: load_bool_with_default("ENABLE_PAGINATION", true)?,
            max_estimated_results,
            show_approved_queries: load_bool_with_default("SHOW_APPROVED_QUERIES", true)?,
            approved_queries_min_count: load_i64_with_default("APPROVED_QUERIES_MIN_COUNT", 1)?,
            approved_queries_limit: load_i64_with_default("APPROVED_QUERIES_LIMIT", 50)?,
            enable_api_auth: load_bool_with_default("ENABLE_API_AUTH", false)?,
            default_rate_limit_per_day: load_i64_with_default("DEFAULT_RATE_LIMIT_PER_DAY", 1000)?,
            default_use_cache: load_bool_with_default("DEFAULT_USE_CACHE", true)?,
            search_cache_ttl,
        })
    }

    /// Compose the Redis connection string from the discrete fields.
    ///
    /// `REDIS_URL` wins when present; otherwise host/port/db and the optional password are
    /// assembled into a `redis://` DSN.
    pub fn redis_dsn(&self) -> String {
        if let Some(url) = &self.redis_url {
            return url.clone();
        }
        let auth_segment = self
            .redis_password
            .as_deref()
            .map(|password| format!(":{password}@"))
            .unwrap_or_default();
        format!(
            "redis://{auth_segment}{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }

    /// Base URL of the Chroma REST API derived from host/port/ssl.
    pub fn chroma_base_url(&self) -> String {
        let scheme = if self.chroma_ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.chroma_host, self.chroma_port)
    }
}

fn normalize_log_level(value: &str) -> String {
    let normalized = value.to_lowercase();
    match normalized.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => normalized,
        _ => {
            tracing::warn!(level = value, "Unsupported APP_LOG_LEVEL; falling back to info");
            "info".to_string()
        }
    }
}

fn load_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_i64_with_default(key: &str, default: i64) -> Result<i64, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_bool_with_default(key: &str, default: bool) -> Result<bool, ConfigError> {
    match load_env_optional(key) {
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
        None => Ok(default),
    }
}

fn load_env_with_default(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Global configuration cache populated during process start.
pub static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_settings() -> &'static Settings {
    SETTINGS.get().expect("Settings not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_settings() {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env().expect("Failed to load settings from environment");
    tracing::debug!(
        chroma = %settings.chroma_base_url(),
        collection = %settings.chroma_collection,
        redis = %settings.redis_dsn(),
        embedding_provider = %settings.embedding_provider,
        embedding_model = %settings.embedding_model,
        pagination = settings.enable_pagination,
        api_auth = settings.enable_api_auth,
        "Loaded settings"
    );
    SETTINGS.set(settings).expect("Failed to set settings");
}
