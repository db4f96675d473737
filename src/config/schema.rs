//! Configuration schema for ipxd
//!
//! Configuration is read from `./config.yml` unless another path is given.
//! Keys are camelCase to stay compatible with existing IPX deployments.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Image source and cache settings
    pub ipx_settings: IpxSettings,

    /// HTTP listener settings
    pub server: ServerConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

/// Image source and cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IpxSettings {
    /// Root directory for filesystem sources
    pub fs_dir: PathBuf,

    /// Remote source settings
    pub http_storage: HttpStorageConfig,

    /// Browser and CDN cache lifetime for served images
    #[serde(rename = "imageCacheTTLSeconds")]
    pub image_cache_ttl_seconds: u64,

    /// Root directory of the transformed-image cache
    pub disk_cache_dir: PathBuf,
}

impl Default for IpxSettings {
    fn default() -> Self {
        Self {
            fs_dir: PathBuf::from("./public"),
            http_storage: HttpStorageConfig::default(),
            image_cache_ttl_seconds: 30 * 24 * 3600,
            disk_cache_dir: PathBuf::from("./.cache/ipx"),
        }
    }
}

/// Remote source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpStorageConfig {
    /// Hostnames remote sources may be fetched from
    #[serde(deserialize_with = "lenient_domains")]
    pub domains: Vec<String>,

    /// Timeout for a single remote fetch
    pub timeout_seconds: u64,

    /// Largest remote body accepted
    pub max_bytes: u64,
}

impl Default for HttpStorageConfig {
    fn default() -> Self {
        Self {
            domains: default_domains(),
            timeout_seconds: 30,
            max_bytes: 25 * 1024 * 1024,
        }
    }
}

fn default_domains() -> Vec<String> {
    vec!["storage.agrego.id".to_string()]
}

/// Accept only a sequence of strings; anything else falls back to the defaults.
fn lenient_domains<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDomains {
        List(Vec<String>),
        Other(serde::de::IgnoredAny),
    }

    match RawDomains::deserialize(deserializer)? {
        RawDomains::List(domains) => Ok(domains),
        RawDomains::Other(_) => {
            let fallback = default_domains();
            warn!(
                "httpStorage.domains is not a list of hostnames, using default {:?}",
                fallback
            );
            Ok(fallback)
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Listen port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4321,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log format: "text" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
        }
    }
}
