use std::env;
use std::path::PathBuf;
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

/// Runtime configuration for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Name of the Qdrant collection used for book storage.
    pub qdrant_collection_name: String,
    /// Dimensionality of the dense vectors stored per chunk.
    pub dense_vector_size: usize,
    /// Endpoint of the hosted batch embedding API.
    pub embedding_api_url: String,
    /// Optional API key for the embedding service.
    pub embedding_api_key: Option<String>,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Number of chunks embedded per request.
    pub embed_batch_size: usize,
    /// Number of points upserted to Qdrant per request.
    pub qdrant_batch_size: usize,
    /// Byte budget for a single split part.
    pub max_split_bytes: u64,
    /// Page budget for a single split part.
    pub max_split_pages: usize,
    /// Request quota per minute for each external service.
    pub max_requests_per_minute: usize,
    /// Token budget per text chunk.
    pub chunk_size: usize,
    /// Token overlap between adjacent chunks.
    pub chunk_overlap: usize,
    /// Optional API key for listing and downloading Google Drive folders.
    pub drive_api_key: Option<String>,
    /// Optional endpoint of the OCR service.
    pub ocr_api_url: Option<String>,
    /// Optional API key for the OCR service.
    pub ocr_api_key: Option<String>,
    /// Root directory for pipeline artifacts (raw/splitted/parsed/logs).
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            qdrant_collection_name: load_env("QDRANT_COLLECTION_NAME")?,
            dense_vector_size: load_env_or("DENSE_VECTOR_SIZE", 1536)?,
            embedding_api_url: load_env("EMBEDDING_API_URL")?,
            embedding_api_key: load_env_optional("EMBEDDING_API_KEY"),
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "gemini-embedding-001".to_string()),
            embed_batch_size: load_env_or("EMBED_BATCH_SIZE", 100)?,
            qdrant_batch_size: load_env_or("QDRANT_BATCH_SIZE", 100)?,
            max_split_bytes: load_env_or::<u64>("MAX_SPLIT_MB", 50)? * 1024 * 1024,
            max_split_pages: load_env_or("MAX_SPLIT_PAGES", 500)?,
            max_requests_per_minute: load_env_or("MAX_REQUESTS_PER_MINUTE", 20)?,
            chunk_size: load_env_or("CHUNK_SIZE", 1000)?,
            chunk_overlap: load_env_or("CHUNK_OVERLAP", 200)?,
            drive_api_key: load_env_optional("DRIVE_API_KEY"),
            ocr_api_url: load_env_optional("OCR_API_URL"),
            ocr_api_key: load_env_optional("OCR_API_KEY"),
            data_dir: load_env_optional("BOOKDEX_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("database")),
        })
    }

    /// Directory holding original source files and metadata artifacts.
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    /// Directory holding split part files.
    pub fn splitted_dir(&self) -> PathBuf {
        self.data_dir.join("splitted")
    }

    /// Directory holding parsed markdown, page, and chunk artifacts.
    pub fn parsed_dir(&self) -> PathBuf {
        self.data_dir.join("parsed")
    }

    /// Directory holding the append-only status log.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Create the artifact directory tree if it does not exist yet.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.raw_dir(),
            self.splitted_dir(),
            self.parsed_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        dense_vector_size = config.dense_vector_size,
        data_dir = %config.data_dir.display(),
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
