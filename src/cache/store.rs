//! Disk cache store
//!
//! Sole reader and writer of cache entries. Each entry is an artifact file
//! and a fingerprint record next to it. Writes go artifact first, then the
//! record, each through a temp file and rename, so a reader never sees a
//! half-written file and a crash between the two leaves the entry stale.

use crate::cache::fingerprint::Fingerprint;
use crate::cache::key::CacheLocation;
use crate::error::{IpxError, IpxResult};
use crate::paths;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Stream of cached artifact bytes
pub type ArtifactStream = ReaderStream<File>;

/// An existing cache entry as found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub artifact_path: PathBuf,
    /// `None` when the record is missing or unreadable
    pub fingerprint: Option<Fingerprint>,
}

/// Disk-backed store rooted at the configured cache directory
#[derive(Debug, Clone)]
pub struct DiskCacheStore {
    root: PathBuf,
}

impl DiskCacheStore {
    /// Create a store for `root`, made absolute and normalized.
    pub fn new(root: &Path) -> IpxResult<Self> {
        Ok(Self {
            root: paths::absolute_root(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the entry at `location` without reading the artifact.
    pub async fn lookup(&self, location: &CacheLocation) -> Option<CacheEntry> {
        match fs::metadata(&location.artifact_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return None,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    debug!(
                        "Cache lookup for {} failed: {}",
                        location.artifact_path.display(),
                        e
                    );
                }
                return None;
            }
        }

        let fingerprint = match fs::read_to_string(&location.fingerprint_path).await {
            Ok(record) => Fingerprint::parse(&record),
            Err(e) => {
                debug!(
                    "No fingerprint record at {}: {}",
                    location.fingerprint_path.display(),
                    e
                );
                None
            }
        };

        Some(CacheEntry {
            artifact_path: location.artifact_path.clone(),
            fingerprint,
        })
    }

    /// An entry is valid iff both fingerprints are known and equal.
    pub fn is_valid(stored: Option<&Fingerprint>, current: Option<&Fingerprint>) -> bool {
        matches!((stored, current), (Some(s), Some(c)) if s == c)
    }

    /// Open a cached artifact as a byte stream.
    pub async fn serve(&self, artifact_path: &Path) -> IpxResult<ArtifactStream> {
        let file = File::open(artifact_path).await.map_err(|e| {
            IpxError::io(format!("opening cached {}", artifact_path.display()), e)
        })?;
        Ok(ReaderStream::new(file))
    }

    /// Read up to `len` leading bytes of an artifact (for format sniffing).
    pub async fn read_header(&self, artifact_path: &Path, len: usize) -> IpxResult<Vec<u8>> {
        let file = File::open(artifact_path).await.map_err(|e| {
            IpxError::io(format!("opening cached {}", artifact_path.display()), e)
        })?;
        let mut header = Vec::with_capacity(len);
        file.take(len as u64)
            .read_to_end(&mut header)
            .await
            .map_err(|e| IpxError::io(format!("reading cached {}", artifact_path.display()), e))?;
        Ok(header)
    }

    /// Persist an artifact and the fingerprint of the source it came from.
    pub async fn write(
        &self,
        location: &CacheLocation,
        artifact: &[u8],
        fingerprint: &Fingerprint,
    ) -> IpxResult<()> {
        for path in [
            &location.dir,
            &location.artifact_path,
            &location.fingerprint_path,
        ] {
            self.ensure_within_root(path)?;
        }

        match fs::create_dir_all(&location.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(IpxError::CacheDirectoryUnavailable {
                    path: location.dir.clone(),
                    source: e,
                })
            }
        }

        // An old record must not vouch for the new artifact if we crash mid-write.
        if let Err(e) = fs::remove_file(&location.fingerprint_path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(
                    "Could not remove stale record {}: {}",
                    location.fingerprint_path.display(),
                    e
                );
            }
        }

        write_atomic(&location.artifact_path, artifact).await?;
        write_atomic(&location.fingerprint_path, fingerprint.as_str().as_bytes()).await?;

        debug!(
            "Cached {} bytes at {}",
            artifact.len(),
            location.artifact_path.display()
        );
        Ok(())
    }

    fn ensure_within_root(&self, path: &Path) -> IpxResult<()> {
        if paths::is_strict_descendant(&self.root, path) {
            Ok(())
        } else {
            warn!("Refusing cache write outside root: {}", path.display());
            Err(IpxError::PathTraversalDenied("cache location".to_string()))
        }
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> IpxResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Err(e) = fs::write(&tmp, contents).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(IpxError::io(format!("writing {}", tmp.display()), e));
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(IpxError::io(format!("renaming into {}", path.display()), e));
    }
    Ok(())
}
