//! Configuration for the localbucket server

use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Prefix of every configuration environment variable.
const ENV_PREFIX: &str = "LB_";

/// Server configuration
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Directory holding one subdirectory per bucket
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Access key ID every request must be signed with.
    #[serde(default)]
    pub access_key_id: String,

    /// Secret access key matching `access_key_id`.
    #[serde(default)]
    pub secret_access_key: Zeroizing<String>,

    /// Region used in the string to sign. When unset the region from the
    /// request's credential scope is used; set it to `us-east-1` for clients
    /// that always sign for that region.
    #[serde(default)]
    pub signing_region: Option<String>,

    /// Largest body buffered in memory to compute its SHA-256
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Longest accepted chunk-size or trailer line in aws-chunked uploads
    #[serde(default = "default_max_chunk_header_bytes")]
    pub max_chunk_header_bytes: usize,

    /// Log level filter string. Overridden by RUST_LOG.
    /// Default: "localbucket=debug,tower_http=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Install a log subscriber at all.
    #[serde(default = "default_log_enabled")]
    pub log_enabled: bool,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_object_size() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_max_chunk_header_bytes() -> usize {
    4096
}

fn default_log_level() -> String {
    "localbucket=debug,tower_http=debug".to_string()
}

fn default_log_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            storage_root: default_storage_root(),
            access_key_id: String::new(),
            secret_access_key: Zeroizing::default(),
            signing_region: None,
            max_object_size: default_max_object_size(),
            max_chunk_header_bytes: default_max_chunk_header_bytes(),
            log_level: default_log_level(),
            log_enabled: default_log_enabled(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("storage_root", &self.storage_root)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("signing_region", &self.signing_region)
            .field("max_object_size", &self.max_object_size)
            .field("max_chunk_header_bytes", &self.max_chunk_header_bytes)
            .field("log_level", &self.log_level)
            .field("log_enabled", &self.log_enabled)
            .finish()
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {}", path, e)))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Overlay `LB_*` environment variables onto this config.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overlay variables resolved by `lookup` (called with full `LB_*` names).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(addr) = var("LISTEN_ADDR") {
            self.listen_addr = parse_var("LISTEN_ADDR", &addr)?;
        }
        if let Some(root) = var("STORAGE_ROOT") {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(key) = var("ACCESS_KEY_ID") {
            self.access_key_id = key;
        }
        if let Some(secret) = var("SECRET_ACCESS_KEY") {
            self.secret_access_key = Zeroizing::new(secret);
        }
        if let Some(region) = var("SIGNING_REGION") {
            self.signing_region = Some(region).filter(|r| !r.is_empty());
        }
        if let Some(size) = var("MAX_OBJECT_SIZE") {
            self.max_object_size = parse_var("MAX_OBJECT_SIZE", &size)?;
        }
        if let Some(size) = var("MAX_CHUNK_HEADER_BYTES") {
            self.max_chunk_header_bytes = parse_var("MAX_CHUNK_HEADER_BYTES", &size)?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(enabled) = var("LOG_ENABLED") {
            self.log_enabled = matches!(enabled.as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(())
    }

    /// Load configuration: an explicit file, else `LB_CONFIG`, else the
    /// first default location that exists, else defaults; then environment
    /// overrides, then validation.
    pub fn load(explicit_path: Option<&str>) -> Result<Self, ConfigError> {
        let path = explicit_path
            .map(str::to_string)
            .or_else(|| std::env::var(format!("{}CONFIG", ENV_PREFIX)).ok())
            .or_else(|| {
                ["localbucket.toml", "/etc/localbucket/config.toml"]
                    .iter()
                    .find(|p| std::path::Path::new(p).exists())
                    .map(|p| p.to_string())
            });

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "access_key_id must be set (LB_ACCESS_KEY_ID)".to_string(),
            ));
        }
        if self.secret_access_key.is_empty() {
            return Err(ConfigError::Invalid(
                "secret_access_key must be set (LB_SECRET_ACCESS_KEY)".to_string(),
            ));
        }
        if self.max_chunk_header_bytes < 16 {
            return Err(ConfigError::Invalid(
                "max_chunk_header_bytes must be at least 16".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{}{}={:?}: {}", ENV_PREFIX, name, value, e)))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
