//! Source storage for the image backend
//!
//! Fetches original image bytes from the filesystem root or an
//! allow-listed remote host. Both paths go through [`SourceResolver`], so
//! the backend enforces the same traversal and domain rules as the cache
//! layer even when called directly.

use crate::config::schema::IpxSettings;
use crate::error::{IpxError, IpxResult};
use crate::identity::{SourceIdentity, SourceResolver};
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, warn};

/// Filesystem and HTTP source storage
#[derive(Clone)]
pub struct SourceStorage {
    resolver: SourceResolver,
    agent: ureq::Agent,
    max_bytes: u64,
}

impl SourceStorage {
    /// Create storage from the IPX settings section
    pub fn new(settings: &IpxSettings) -> IpxResult<Self> {
        let resolver = SourceResolver::new(&settings.fs_dir, &settings.http_storage.domains)?;
        let timeout = Duration::from_secs(settings.http_storage.timeout_seconds.max(1));
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(true)
            .build()
            .into();

        Ok(Self {
            resolver,
            agent,
            max_bytes: settings.http_storage.max_bytes,
        })
    }

    /// Read the original bytes of `source`
    pub async fn fetch(&self, source: &str) -> IpxResult<Vec<u8>> {
        match self.resolver.resolve(source)? {
            SourceIdentity::Filesystem {
                relative_path,
                absolute_path,
            } => match tokio::fs::read(&absolute_path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Source not found: {}", absolute_path.display());
                    Err(IpxError::backend(
                        404,
                        format!("File not found: {}", relative_path),
                    ))
                }
                Err(e) => {
                    warn!("Cannot read source {}: {}", absolute_path.display(), e);
                    Err(IpxError::backend(
                        403,
                        format!("File not readable: {}", relative_path),
                    ))
                }
            },
            SourceIdentity::Remote { url, .. } => self.fetch_remote(url).await,
        }
    }

    async fn fetch_remote(&self, url: String) -> IpxResult<Vec<u8>> {
        let agent = self.agent.clone();
        let limit = self.max_bytes;

        tokio::task::spawn_blocking(move || fetch_blocking(&agent, &url, limit))
            .await
            .map_err(|e| IpxError::Internal(format!("remote fetch task failed: {}", e)))?
    }
}

fn fetch_blocking(agent: &ureq::Agent, url: &str, limit: u64) -> IpxResult<Vec<u8>> {
    debug!(url = %url, "Fetching remote source");

    let mut response = agent.get(url).call().map_err(|e| map_fetch_error(url, e))?;
    response
        .body_mut()
        .with_config()
        .limit(limit)
        .read_to_vec()
        .map_err(|e| map_fetch_error(url, e))
}

fn map_fetch_error(url: &str, err: ureq::Error) -> IpxError {
    match err {
        ureq::Error::StatusCode(status) => {
            debug!(url = %url, status, "Remote source returned an error status");
            IpxError::backend(status, format!("Remote source responded with {}", status))
        }
        ureq::Error::BodyExceedsLimit(limit) => IpxError::backend(
            413,
            format!("Remote source exceeds {} bytes", limit),
        ),
        other => {
            warn!(url = %url, "Remote fetch failed: {}", other);
            IpxError::backend(502, "Failed to fetch remote source")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> SourceStorage {
        let mut settings = IpxSettings::default();
        settings.fs_dir = dir.path().to_path_buf();
        settings.http_storage.domains = vec!["good.example.com".to_string()];
        SourceStorage::new(&settings).unwrap()
    }

    #[tokio::test]
    async fn reads_filesystem_source() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("photos")).unwrap();
        std::fs::write(dir.path().join("photos/cat.jpg"), b"bytes").unwrap();

        let bytes = storage(&dir).fetch("photos/cat.jpg").await.unwrap();
        assert_eq!(bytes, b"bytes");
    }

    #[tokio::test]
    async fn missing_file_is_404() {
        let dir = TempDir::new().unwrap();
        let err = storage(&dir).fetch("nope.png").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn unlisted_host_is_refused_without_fetching() {
        let dir = TempDir::new().unwrap();
        let err = storage(&dir)
            .fetch("https://evil.example.com/x.png")
            .await
            .unwrap_err();
        assert!(matches!(err, IpxError::ForbiddenDomain(_)));
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let dir = TempDir::new().unwrap();
        let err = storage(&dir).fetch("../secret.png").await.unwrap_err();
        assert!(matches!(err, IpxError::PathTraversalDenied(_)));
    }

    #[test]
    fn status_errors_keep_upstream_status() {
        let err = map_fetch_error("https://good.example.com/x", ureq::Error::StatusCode(404));
        assert_eq!(err.status_code(), 404);
    }
}
