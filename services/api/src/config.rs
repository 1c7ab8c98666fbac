//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;

use reader_core::ReaderSettings;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which store the service reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local maps; everything is lost on restart.
    Memory,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    /// Required when `store_backend` is `Postgres`.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub cors_origin: String,
    pub preview_page_limit: u32,
    pub persist_retry_attempts: u32,
    pub persist_retry_base_delay: Duration,
    /// Open reading sessions untouched for this long are closed.
    pub session_idle_timeout: Duration,
    pub max_sessions_per_reader: usize,
    pub max_open_sessions: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Store Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let store_backend = match var("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("'{}' is not one of postgres, memory", other),
                ))
            }
        };

        let database_url = var("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Reader Settings ---
        let preview_page_limit: u32 = parse_or(&var, "PREVIEW_PAGE_LIMIT", 10)?;
        if preview_page_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "PREVIEW_PAGE_LIMIT".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let persist_retry_attempts: u32 = parse_or(&var, "PERSIST_RETRY_ATTEMPTS", 3)?;
        let persist_retry_base_ms: u64 = parse_or(&var, "PERSIST_RETRY_BASE_MS", 100)?;

        // --- Open Session Limits ---
        let session_idle_secs: u64 = parse_or(&var, "SESSION_IDLE_TIMEOUT_SECS", 1800)?;
        let max_sessions_per_reader: usize = parse_or(&var, "MAX_SESSIONS_PER_READER", 5)?;
        let max_open_sessions: usize = parse_or(&var, "MAX_OPEN_SESSIONS", 10_000)?;
        for (key, value) in [
            ("MAX_SESSIONS_PER_READER", max_sessions_per_reader),
            ("MAX_OPEN_SESSIONS", max_open_sessions),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must be at least 1".to_string(),
                ));
            }
        }

        Ok(Self {
            bind_address,
            store_backend,
            database_url,
            log_level,
            cors_origin,
            preview_page_limit,
            persist_retry_attempts,
            persist_retry_base_delay: Duration::from_millis(persist_retry_base_ms),
            session_idle_timeout: Duration::from_secs(session_idle_secs),
            max_sessions_per_reader,
            max_open_sessions,
        })
    }

    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            preview_page_limit: self.preview_page_limit,
            persist_retry_attempts: self.persist_retry_attempts,
            persist_retry_base_delay: self.persist_retry_base_delay,
        }
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
