//! Source fingerprinting
//!
//! A fingerprint is the SHA-256 of a filesystem source's bytes, or of the
//! literal URL for remote sources. Remote content changing behind a stable
//! URL is therefore not detected.

use crate::identity::SourceIdentity;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

const READ_CHUNK: usize = 64 * 1024;

/// Hex-encoded SHA-256 fingerprint of a source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of an in-memory byte string
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a stored fingerprint record; `None` unless it is 64 hex digits.
    pub fn parse(record: &str) -> Option<Self> {
        let trimmed = record.trim();
        let valid = trimmed.len() == 64 && trimmed.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the current fingerprint of a source.
///
/// Returns `None` when a filesystem source cannot be read (missing,
/// permission denied); callers treat that as "source unknown".
pub async fn fingerprint(identity: &SourceIdentity) -> Option<Fingerprint> {
    match identity {
        SourceIdentity::Filesystem { absolute_path, .. } => hash_file(absolute_path).await,
        SourceIdentity::Remote { url, .. } => Some(Fingerprint::of_bytes(url.as_bytes())),
    }
}

async fn hash_file(path: &Path) -> Option<Fingerprint> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            debug!("Cannot fingerprint {}: {}", path.display(), e);
            return None;
        }
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) => {
                debug!("Read failed while fingerprinting {}: {}", path.display(), e);
                return None;
            }
        }
    }

    Some(Fingerprint(hex::encode(hasher.finalize())))
}
