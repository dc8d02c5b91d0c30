use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use common::tuf::KeyAlgorithm;

use crate::http_server::{CacheSettings, CACHE_MAX_AGE_LIMIT};
use crate::storage::valid_gun_prefix;

/// Service configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerSection,
    pub trust_service: TrustServiceSection,
    pub storage: StorageSection,
    pub root_storage: RootStorageSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub repositories: RepositoriesSection,
    #[serde(default)]
    pub caching: CachingSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub http_addr: SocketAddr,
    pub admin_http_addr: SocketAddr,
    #[serde(default)]
    pub tls_cert_file: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustServiceType {
    Local,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrustServiceSection {
    #[serde(rename = "type")]
    pub service_type: TrustServiceType,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub key_algorithm: Option<KeyAlgorithm>,
    #[serde(default)]
    pub tls_ca_file: Option<PathBuf>,
    #[serde(default)]
    pub tls_client_cert_file: Option<PathBuf>,
    #[serde(default)]
    pub tls_client_key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite3,
    Mysql,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub backend: StorageBackend,
    #[serde(default)]
    pub db_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootStorageSection {
    pub backend: StorageBackend,
    #[serde(default)]
    pub db_url: Option<String>,
    /// `"generate"` creates the organizational root on first start.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default = "default_root_gun")]
    pub root_gun: String,
}

fn default_root_gun() -> String {
    "quay".to_string()
}

impl RootStorageSection {
    pub fn generate_root(&self) -> bool {
        self.root.as_deref() == Some("generate")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Quaytoken,
    Admin,
    Testing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl AuthSection {
    fn required_option(&self, key: &str) -> Result<String, ConfigError> {
        self.options.get(key).cloned().ok_or_else(|| {
            ConfigError::Invalid(format!("token auth requires a valid option string: {key:?}"))
        })
    }

    /// Options for the keyserver access controller; only meaningful when
    /// `type = "quaytoken"`.
    pub fn keyserver_options(&self) -> Result<crate::auth::KeyserverOptions, ConfigError> {
        let interval = self.required_option("updateKeyInterval")?;
        let update_key_interval = parse_duration(&interval).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "invalid duration specified for key refresh interval: {interval:?}"
            ))
        })?;
        Ok(crate::auth::KeyserverOptions {
            realm: self.required_option("realm")?,
            issuer: self.required_option("issuer")?,
            service: self.required_option("service")?,
            keyserver: self.required_option("keyserver")?,
            update_key_interval,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoriesSection {
    #[serde(default)]
    pub gun_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CachingSection {
    #[serde(default)]
    pub max_age: MaxAgeSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaxAgeSection {
    #[serde(default = "default_current_max_age")]
    pub current_metadata: i64,
    #[serde(default = "default_consistent_max_age")]
    pub consistent_metadata: i64,
}

fn default_current_max_age() -> i64 {
    300
}

fn default_consistent_max_age() -> i64 {
    CACHE_MAX_AGE_LIMIT as i64
}

impl Default for MaxAgeSection {
    fn default() -> Self {
        MaxAgeSection {
            current_metadata: default_current_max_age(),
            consistent_metadata: default_consistent_max_age(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for prefix in &self.repositories.gun_prefixes {
            if !valid_gun_prefix(prefix) {
                return Err(ConfigError::Invalid(format!("invalid GUN prefix {prefix}")));
            }
        }
        for (name, seconds) in [
            ("current_metadata", self.caching.max_age.current_metadata),
            (
                "consistent_metadata",
                self.caching.max_age.consistent_metadata,
            ),
        ] {
            if !(0..=CACHE_MAX_AGE_LIMIT as i64).contains(&seconds) {
                return Err(ConfigError::Invalid(format!(
                    "caching.max_age.{name} must specify a cache-control max-age between 0 and {CACHE_MAX_AGE_LIMIT}"
                )));
            }
        }
        if self.trust_service.service_type == TrustServiceType::Remote {
            if self.trust_service.hostname.is_none() || self.trust_service.port.is_none() {
                return Err(ConfigError::Invalid(
                    "remote trust service requires hostname and port".to_string(),
                ));
            }
            let cert = self.trust_service.tls_client_cert_file.is_some();
            let key = self.trust_service.tls_client_key_file.is_some();
            if cert != key {
                return Err(ConfigError::Invalid(
                    "either pass both client key and cert, or neither".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            current_max_age: self.caching.max_age.current_metadata as u32,
            consistent_max_age: self.caching.max_age.consistent_metadata as u32,
        }
    }
}

/// Parse a duration string like `"300ms"`, `"60s"`, `"5m"`, `"1h"`, or a
/// bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(index) => value.split_at(index),
        None => (value, "s"),
    };
    let number: u64 = number.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(number)),
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        "h" => Some(Duration::from_secs(number * 3600)),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("unable to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
