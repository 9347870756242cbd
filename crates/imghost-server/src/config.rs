//! Configuration management

use imghost_common::media::MAX_IMAGE_BYTES;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/imghost";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Default base URL prepended to blob keys in API payloads.
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://127.0.0.1:8000/api/v1/files";

// ============================================================================
// Deletion Queue Constants
// ============================================================================

/// Deliveries before a deletion message is dead-lettered.
pub const DEFAULT_QUEUE_MAX_ATTEMPTS: u32 = 5;

/// Messages claimed per poll.
pub const DEFAULT_QUEUE_BATCH_SIZE: usize = 10;

/// Idle wait between polls when the queue is empty.
pub const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 1000;

/// Base retry delay; doubled on every further attempt.
pub const DEFAULT_QUEUE_RETRY_BACKOFF_SECS: u64 = 5;

/// Messages processed concurrently by one consumer.
pub const DEFAULT_QUEUE_CONCURRENCY: usize = 4;

/// How long a claimed message stays invisible before it is redelivered.
pub const DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 60;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub backends: BackendConfig,
    pub queue: QueueConfig,
    pub upload: UploadConfig,
    pub public_base_url: String,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Which implementation backs a store that can live in Postgres
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(BackendKind::Postgres),
            "memory" | "in-memory" => Ok(BackendKind::Memory),
            other => Err(anyhow::anyhow!("Unknown backend '{}', expected postgres or memory", other)),
        }
    }
}

/// Which implementation backs blob storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    S3,
    Memory,
}

impl FromStr for StorageBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s3" | "minio" => Ok(StorageBackendKind::S3),
            "memory" | "in-memory" => Ok(StorageBackendKind::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend '{}', expected s3 or memory", other)),
        }
    }
}

/// Backend selection for every collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub metadata: BackendKind,
    pub storage: StorageBackendKind,
    pub cache: BackendKind,
    pub queue: BackendKind,
}

impl BackendConfig {
    /// Whether any backend needs a database pool
    pub fn needs_database(&self) -> bool {
        [self.metadata, self.cache, self.queue].contains(&BackendKind::Postgres)
    }
}

/// Deletion queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub retry_backoff_secs: u64,
    pub concurrency: usize,
    pub visibility_timeout_secs: u64,
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Delay before redelivering a message that has been delivered `attempts` times
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(10);
        Duration::from_secs(self.retry_backoff_secs.saturating_mul(1u64 << exponent))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_QUEUE_MAX_ATTEMPTS,
            batch_size: DEFAULT_QUEUE_BATCH_SIZE,
            poll_interval_ms: DEFAULT_QUEUE_POLL_INTERVAL_MS,
            retry_backoff_secs: DEFAULT_QUEUE_RETRY_BACKOFF_SECS,
            concurrency: DEFAULT_QUEUE_CONCURRENCY,
            visibility_timeout_secs: DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS,
        }
    }
}

/// Upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: MAX_IMAGE_BYTES,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("IMGHOST_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("IMGHOST_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "IMGHOST_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true),
            },
            backends: BackendConfig {
                metadata: env_parse("METADATA_BACKEND")?.unwrap_or(defaults.backends.metadata),
                storage: env_parse("STORAGE_BACKEND")?.unwrap_or(defaults.backends.storage),
                cache: env_parse("CACHE_BACKEND")?.unwrap_or(defaults.backends.cache),
                queue: env_parse("QUEUE_BACKEND")?.unwrap_or(defaults.backends.queue),
            },
            queue: QueueConfig {
                max_attempts: env_or("DELETION_QUEUE_MAX_ATTEMPTS", DEFAULT_QUEUE_MAX_ATTEMPTS),
                batch_size: env_or("DELETION_QUEUE_BATCH_SIZE", DEFAULT_QUEUE_BATCH_SIZE),
                poll_interval_ms: env_or(
                    "DELETION_QUEUE_POLL_INTERVAL_MS",
                    DEFAULT_QUEUE_POLL_INTERVAL_MS,
                ),
                retry_backoff_secs: env_or(
                    "DELETION_QUEUE_RETRY_BACKOFF_SECS",
                    DEFAULT_QUEUE_RETRY_BACKOFF_SECS,
                ),
                concurrency: env_or("DELETION_QUEUE_CONCURRENCY", DEFAULT_QUEUE_CONCURRENCY),
                visibility_timeout_secs: env_or(
                    "DELETION_QUEUE_VISIBILITY_TIMEOUT_SECS",
                    DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS,
                ),
            },
            upload: UploadConfig {
                max_bytes: env_or("UPLOAD_MAX_BYTES", MAX_IMAGE_BYTES),
            },
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PUBLIC_BASE_URL.to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.backends.needs_database() {
            if self.database.url.is_empty() {
                anyhow::bail!("Database URL cannot be empty");
            }

            if self.database.max_connections == 0 {
                anyhow::bail!("Database max_connections must be greater than 0");
            }

            if self.database.min_connections > self.database.max_connections {
                anyhow::bail!(
                    "Database min_connections ({}) cannot be greater than max_connections ({})",
                    self.database.min_connections,
                    self.database.max_connections
                );
            }
        }

        if self.queue.max_attempts == 0 {
            anyhow::bail!("DELETION_QUEUE_MAX_ATTEMPTS must be at least 1");
        }

        if self.queue.batch_size == 0 || self.queue.concurrency == 0 {
            anyhow::bail!("Deletion queue batch size and concurrency must be greater than 0");
        }

        if self.upload.max_bytes == 0 {
            anyhow::bail!("UPLOAD_MAX_BYTES must be greater than 0");
        }

        if !self.public_base_url.starts_with("http://") && !self.public_base_url.starts_with("https://") {
            anyhow::bail!("PUBLIC_BASE_URL must be an http(s) URL, got '{}'", self.public_base_url);
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            backends: BackendConfig {
                metadata: BackendKind::Postgres,
                storage: StorageBackendKind::S3,
                cache: BackendKind::Postgres,
                queue: BackendKind::Postgres,
            },
            queue: QueueConfig::default(),
            upload: UploadConfig::default(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr<Err = anyhow::Error>,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: anyhow::Error| e.context(format!("Invalid value for {}", key))),
        Err(_) => Ok(None),
    }
}
