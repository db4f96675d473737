//! Error types for ipxd
//!
//! All modules use `IpxResult<T>` as their return type. Request-path
//! errors carry the HTTP status they map to via [`IpxError::status_code`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ipxd operations
pub type IpxResult<T> = Result<T, IpxError>;

/// All errors that can occur in ipxd
#[derive(Error, Debug)]
pub enum IpxError {
    // Request errors
    #[error("Malformed source: {0}")]
    MalformedSource(String),

    #[error("Forbidden host: {0}")]
    ForbiddenDomain(String),

    #[error("Path traversal denied: {0}")]
    PathTraversalDenied(String),

    #[error("Invalid request: {0}")]
    InvalidRequestShape(String),

    // Cache errors
    #[error("Cache directory unavailable: {path}")]
    CacheDirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Transform errors
    #[error("{message}")]
    Backend { status: Option<u16>, message: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IpxError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a backend error with an explicit status
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status: Some(status),
            message: message.into(),
        }
    }

    /// HTTP status code this error maps to
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedSource(_) | Self::InvalidRequestShape(_) => 400,
            Self::ForbiddenDomain(_) | Self::PathTraversalDenied(_) => 403,
            Self::Backend { status, .. } => status.unwrap_or(500),
            Self::CacheDirectoryUnavailable { .. }
            | Self::ConfigInvalid { .. }
            | Self::ConfigNotFound(_)
            | Self::Io { .. }
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::TomlParse(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Whether the failure was caused by the request rather than the server
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Message safe to return to HTTP clients
    ///
    /// Server-side failures are reduced to a generic message so that
    /// filesystem layout never leaks into responses.
    pub fn public_message(&self) -> String {
        match self {
            Self::Backend { message, .. } => message.clone(),
            Self::CacheDirectoryUnavailable { .. } | Self::Io { .. } => {
                "Cache storage unavailable".to_string()
            }
            Self::ConfigInvalid { .. }
            | Self::ConfigNotFound(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::TomlParse(_)
            | Self::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Check the YAML syntax of your config file"),
            Self::ConfigNotFound(_) => Some("Pass --config or create ./config.yml"),
            Self::CacheDirectoryUnavailable { .. } => {
                Some("Check that ipxSettings.diskCacheDir is writable")
            }
            _ => None,
        }
    }
}
