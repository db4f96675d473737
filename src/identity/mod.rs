//! Source identity resolution
//!
//! Classifies the source part of a request as either a path below the
//! filesystem root or a remote URL on an allow-listed host. Resolution
//! fails closed: anything that could escape the root or reach an
//! unlisted host is rejected here, before any I/O happens.

pub mod modifiers;

pub use modifiers::Modifiers;

use crate::error::{IpxError, IpxResult};
use crate::paths;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// Kind of source an identity points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Filesystem,
    Remote,
}

impl SourceKind {
    /// Stable tag mixed into cache keys
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Filesystem => "fs",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Resolved, typed source of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceIdentity {
    /// File below the configured source root
    Filesystem {
        /// Cleaned relative path (no empty, `.` or `..` segments)
        relative_path: String,
        /// `relative_path` joined onto the source root
        absolute_path: PathBuf,
    },
    /// URL on an allow-listed host
    Remote {
        /// The URL as requested, used for keys and fingerprints
        url: String,
        /// Hostname the allow-list was checked against
        domain: String,
    },
}

impl SourceIdentity {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Filesystem { .. } => SourceKind::Filesystem,
            Self::Remote { .. } => SourceKind::Remote,
        }
    }

    /// Source string mixed into the cache key
    pub fn key_source(&self) -> &str {
        match self {
            Self::Filesystem { relative_path, .. } => relative_path,
            Self::Remote { url, .. } => url,
        }
    }

    /// Source string handed to the transform backend
    pub fn effective_source(&self) -> &str {
        self.key_source()
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.key_source())
    }
}

/// Resolves raw request segments into [`SourceIdentity`] values
#[derive(Debug, Clone)]
pub struct SourceResolver {
    fs_root: PathBuf,
    domains: Vec<String>,
}

impl SourceResolver {
    /// Create a resolver for a source root and remote allow-list
    pub fn new(fs_dir: &Path, domains: &[String]) -> IpxResult<Self> {
        Ok(Self {
            fs_root: paths::absolute_root(fs_dir)?,
            domains: domains.iter().map(|d| d.trim().to_ascii_lowercase()).collect(),
        })
    }

    /// Normalized absolute source root
    pub fn fs_root(&self) -> &Path {
        &self.fs_root
    }

    /// Whether remote fetches from `host` are allowed
    pub fn is_allowed_domain(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.domains.iter().any(|d| *d == host)
    }

    /// Resolve a raw source segment
    pub fn resolve(&self, raw: &str) -> IpxResult<SourceIdentity> {
        let raw = raw.trim_start_matches('/');
        if raw.is_empty() {
            return Err(IpxError::InvalidRequestShape(
                "missing source path".to_string(),
            ));
        }

        if has_http_scheme(raw) {
            self.resolve_remote(raw)
        } else {
            self.resolve_filesystem(raw)
        }
    }

    fn resolve_remote(&self, raw: &str) -> IpxResult<SourceIdentity> {
        let url_str = repair_scheme_slashes(raw);
        let url = Url::parse(&url_str)
            .map_err(|e| IpxError::MalformedSource(format!("{}: {}", raw, e)))?;
        let domain = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| IpxError::MalformedSource(format!("{}: missing host", raw)))?
            .to_string();

        if !self.is_allowed_domain(&domain) {
            warn!(domain = %domain, "Rejected remote source on unlisted host");
            return Err(IpxError::ForbiddenDomain(domain));
        }

        debug!(url = %url_str, "Resolved remote source");
        Ok(SourceIdentity::Remote {
            url: url_str,
            domain,
        })
    }

    fn resolve_filesystem(&self, raw: &str) -> IpxResult<SourceIdentity> {
        let relative_path = clean_relative_path(raw)?;
        let absolute_path = self.fs_root.join(&relative_path);

        if !paths::is_strict_descendant(&self.fs_root, &absolute_path) {
            warn!(source = %raw, "Source path escapes the source root");
            return Err(IpxError::PathTraversalDenied(raw.to_string()));
        }

        debug!(path = %relative_path, "Resolved filesystem source");
        Ok(SourceIdentity::Filesystem {
            relative_path,
            absolute_path,
        })
    }
}

/// Clean a client-supplied relative path, rejecting traversal outright.
///
/// Empty and `.` segments are dropped so `a//./b` and `a/b` share a key.
pub(crate) fn clean_relative_path(raw: &str) -> IpxResult<String> {
    if raw.contains('\0') {
        return Err(IpxError::MalformedSource(
            "source contains a NUL byte".to_string(),
        ));
    }

    let mut segments = Vec::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                warn!(source = %raw, "Rejected source containing '..'");
                return Err(IpxError::PathTraversalDenied(raw.to_string()));
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(IpxError::InvalidRequestShape(
            "missing source path".to_string(),
        ));
    }
    Ok(segments.join("/"))
}

fn has_http_scheme(raw: &str) -> bool {
    let lower = raw
        .get(..8)
        .unwrap_or(raw)
        .to_ascii_lowercase();
    lower.starts_with("http:/") || lower.starts_with("https:/")
}

/// Proxies often collapse `//` in paths, turning `https://h/x` into `https:/h/x`.
fn repair_scheme_slashes(raw: &str) -> String {
    let (scheme, rest) = match raw.split_once(':') {
        Some(parts) => parts,
        None => return raw.to_string(),
    };
    let rest = rest.trim_start_matches('/');
    format!("{}://{}", scheme.to_ascii_lowercase(), rest)
}
