// Store configuration, read from the environment

use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_URI: &str = "mongodb://localhost:27017/admin";
pub const DEFAULT_DATABASE: &str = "test1";
pub const DEFAULT_COLLECTION: &str = "submission3";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

pub const ENV_STORE_URI: &str = "TALLY_STORE_URI";
pub const ENV_MONGODB_URI: &str = "MONGODB_URI";
pub const ENV_COLLECTION: &str = "TALLY_COLLECTION";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "TALLY_CONNECT_TIMEOUT_MS";
pub const ENV_OP_TIMEOUT_MS: &str = "TALLY_OP_TIMEOUT_MS";
pub const ENV_STRICT_UPDATE: &str = "TALLY_STRICT_UPDATE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: expected a number of milliseconds, got {value:?}")]
    BadDuration { var: &'static str, value: String },
    #[error("{var}: expected true or false, got {value:?}")]
    BadFlag { var: &'static str, value: String },
    #[error("unsupported store scheme in {0:?} (use mongodb://, redis:// or memory://)")]
    UnknownScheme(String),
}

/// Which backend a connection string selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Mongo,
    Redis,
    Memory,
}

impl Backend {
    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        let scheme = uri.split_once("://").map(|(s, _)| s).unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "mongodb" | "mongodb+srv" => Ok(Backend::Mongo),
            "redis" | "rediss" => Ok(Backend::Redis),
            "memory" => Ok(Backend::Memory),
            _ => Err(ConfigError::UnknownScheme(uri.to_string())),
        }
    }
}

/// What Update does when no record carries the target identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Report success and write nothing.
    #[default]
    Permissive,
    /// Fail with `NotFound`.
    RequireExisting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub uri: String,
    pub backend: Backend,
    pub database: String,
    pub collection: String,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
    pub update_mode: UpdateMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            backend: Backend::Mongo,
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            op_timeout: DEFAULT_OP_TIMEOUT,
            update_mode: UpdateMode::Permissive,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(uri) = get(ENV_STORE_URI).or_else(|| get(ENV_MONGODB_URI)) {
            config.backend = Backend::from_uri(&uri)?;
            // A supplied URI names its own database; fall back when it has none
            config.database =
                database_from_uri(&uri).unwrap_or_else(|| DEFAULT_DATABASE.to_string());
            config.uri = uri;
        }
        if let Some(collection) = get(ENV_COLLECTION) {
            config.collection = collection;
        }
        if let Some(raw) = get(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout = parse_millis(ENV_CONNECT_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_OP_TIMEOUT_MS) {
            config.op_timeout = parse_millis(ENV_OP_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_STRICT_UPDATE) {
            config.update_mode = if parse_flag(ENV_STRICT_UPDATE, &raw)? {
                UpdateMode::RequireExisting
            } else {
                UpdateMode::Permissive
            };
        }
        Ok(config)
    }

    /// In-process store, no external service.
    pub fn memory() -> Self {
        Self {
            uri: "memory://".to_string(),
            backend: Backend::Memory,
            ..Self::default()
        }
    }
}

/// Path segment of a connection string, e.g. `judge` in
/// `mongodb://user:pw@host:27017/judge?authSource=admin`.
pub fn database_from_uri(uri: &str) -> Option<String> {
    let (_, rest) = uri.split_once("://")?;
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let (_, path) = rest.split_once('/')?;
    let name = path.trim_matches('/');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn parse_millis(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::BadDuration {
            var,
            value: raw.to_string(),
        })
}

fn parse_flag(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::BadFlag {
            var,
            value: raw.to_string(),
        }),
    }
}
