//! Request orchestration
//!
//! Drives one image request through the cache:
//!
//! ```text
//! RESOLVING ──► DENIED
//!     │
//!     ▼
//! VALIDATING_CACHE ──► HIT ──► SERVED
//!     │
//!     ▼
//! TRANSFORMING ──► SERVED | FAILED
//! ```
//!
//! Resolution and key derivation happen before any filesystem access.
//! Cache read problems count as misses. On a miss the backend runs once
//! per cache digest however many requests are waiting on it, and the
//! result is written to disk before it is returned.

use crate::cache::{self, CacheKeyBuilder, CacheLocation, DiskCacheStore, Fingerprint};
use crate::cache::{ArtifactStream, CoalescerStats, Flight, RequestCoalescer};
use crate::config::Config;
use crate::error::{IpxError, IpxResult};
use crate::identity::{Modifiers, SourceIdentity, SourceResolver};
use crate::transform::{self, TransformBackend, Transformed};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bytes read from a cached artifact to detect its format
const SNIFF_LEN: usize = 32;

/// How a response was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a valid cache entry
    Hit,
    /// Transformed and written to the cache
    Miss,
    /// Transformed but not cacheable (source fingerprint unknown)
    Bypass,
}

impl CacheStatus {
    pub fn as_header(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_header())
    }
}

/// Response body of an image request
pub enum ImageBody {
    /// Streamed from the cache file
    Cached(ArtifactStream),
    /// Freshly transformed bytes
    Rendered(Bytes),
}

impl fmt::Debug for ImageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached(_) => write!(f, "Cached(..)"),
            Self::Rendered(data) => write!(f, "Rendered({} bytes)", data.len()),
        }
    }
}

/// A served image with the metadata needed for response headers
#[derive(Debug)]
pub struct ImageResponse {
    pub body: ImageBody,
    pub content_type: &'static str,
    pub cache_status: CacheStatus,
    /// Entity tag, present when the source fingerprint is known
    pub etag: Option<String>,
}

/// Result shared with coalesced followers
#[derive(Debug, Clone)]
enum FlightOutcome {
    Done {
        image: Transformed,
        status: CacheStatus,
    },
    Failed {
        status: u16,
        message: String,
    },
}

/// Top-level request handler tying resolver, key builder, store and backend together
pub struct Orchestrator {
    resolver: SourceResolver,
    keys: CacheKeyBuilder,
    store: DiskCacheStore,
    backend: Arc<dyn TransformBackend>,
    flights: RequestCoalescer<FlightOutcome>,
}

impl Orchestrator {
    /// Build an orchestrator from configuration and a transform backend
    pub fn new(config: &Config, backend: Arc<dyn TransformBackend>) -> IpxResult<Self> {
        let settings = &config.ipx_settings;
        Ok(Self {
            resolver: SourceResolver::new(&settings.fs_dir, &settings.http_storage.domains)?,
            keys: CacheKeyBuilder::new(&settings.disk_cache_dir)?,
            store: DiskCacheStore::new(&settings.disk_cache_dir)?,
            backend,
            flights: RequestCoalescer::new(),
        })
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    pub fn keys(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    pub fn store(&self) -> &DiskCacheStore {
        &self.store
    }

    /// Coalescing counters since startup
    pub fn coalescer_stats(&self) -> CoalescerStats {
        self.flights.stats()
    }

    /// Serve `/_ipx/{modifiers}/{source}`.
    pub async fn handle(&self, modifiers: &str, raw_source: &str) -> IpxResult<ImageResponse> {
        if modifiers.is_empty() {
            return Err(IpxError::InvalidRequestShape(
                "missing modifiers segment".to_string(),
            ));
        }

        // RESOLVING
        let identity = self.resolver.resolve(raw_source)?;
        let location = self.keys.build(modifiers, &identity)?;

        // VALIDATING_CACHE
        let current = cache::fingerprint(&identity).await;
        let etag = current.as_ref().map(|fp| entity_tag(&location, fp));

        if let Some(entry) = self.store.lookup(&location).await {
            if DiskCacheStore::is_valid(entry.fingerprint.as_ref(), current.as_ref()) {
                match self.serve_hit(&entry.artifact_path).await {
                    Ok((body, content_type)) => {
                        debug!(source = %identity, "Cache hit");
                        return Ok(ImageResponse {
                            body,
                            content_type,
                            cache_status: CacheStatus::Hit,
                            etag,
                        });
                    }
                    Err(e) => warn!(
                        source = %identity,
                        path = %entry.artifact_path.display(),
                        "Cached artifact unreadable, re-transforming: {}",
                        e
                    ),
                }
            } else {
                debug!(source = %identity, "Cache entry stale");
            }
        }

        if current.is_none() {
            if let SourceIdentity::Filesystem { absolute_path, .. } = &identity {
                debug!(
                    "Source {} not readable, result will not be cached",
                    absolute_path.display()
                );
            }
        }

        // TRANSFORMING
        let parsed = Modifiers::parse(modifiers);
        let (image, cache_status) = self
            .transform_coalesced(&identity, &location, &parsed, current.as_ref())
            .await?;

        Ok(ImageResponse {
            content_type: transform::content_type(image.format.as_deref()),
            body: ImageBody::Rendered(image.data),
            cache_status,
            etag: etag.filter(|_| cache_status != CacheStatus::Bypass),
        })
    }

    async fn serve_hit(&self, artifact_path: &std::path::Path) -> IpxResult<(ImageBody, &'static str)> {
        let header = self.store.read_header(artifact_path, SNIFF_LEN).await?;
        let content_type = transform::content_type(transform::sniff_format(&header));
        let stream = self.store.serve(artifact_path).await?;
        Ok((ImageBody::Cached(stream), content_type))
    }

    async fn transform_coalesced(
        &self,
        identity: &SourceIdentity,
        location: &CacheLocation,
        modifiers: &Modifiers,
        fingerprint: Option<&Fingerprint>,
    ) -> IpxResult<(Transformed, CacheStatus)> {
        match self.flights.register(&location.digest) {
            Flight::Leader(guard) => {
                let result = self
                    .transform_and_store(identity, location, modifiers, fingerprint)
                    .await;
                guard.complete(match &result {
                    Ok((image, status)) => FlightOutcome::Done {
                        image: image.clone(),
                        status: *status,
                    },
                    Err(e) => FlightOutcome::Failed {
                        status: e.status_code(),
                        message: e.public_message(),
                    },
                });
                result
            }
            Flight::Follower(mut rx) => match rx.recv().await {
                Ok(FlightOutcome::Done { image, status }) => Ok((image, status)),
                Ok(FlightOutcome::Failed { status, message }) => {
                    Err(IpxError::backend(status, message))
                }
                Err(_) => {
                    // Leader went away before finishing; do the work ourselves.
                    debug!(source = %identity, "Coalesced leader abandoned, transforming");
                    self.transform_and_store(identity, location, modifiers, fingerprint)
                        .await
                }
            },
        }
    }

    async fn transform_and_store(
        &self,
        identity: &SourceIdentity,
        location: &CacheLocation,
        modifiers: &Modifiers,
        fingerprint: Option<&Fingerprint>,
    ) -> IpxResult<(Transformed, CacheStatus)> {
        let image = self
            .backend
            .process(identity.effective_source(), modifiers)
            .await
            .map_err(|e| {
                let e = match e {
                    err @ IpxError::Backend { .. } => err,
                    other => IpxError::Backend {
                        status: Some(other.status_code()),
                        message: other.public_message(),
                    },
                };
                if e.is_client_error() {
                    warn!(
                        source = %identity,
                        modifiers = %modifiers,
                        backend = self.backend.backend_name(),
                        path = %location.artifact_path.display(),
                        "Transform rejected: {}",
                        e
                    );
                } else {
                    tracing::error!(
                        source = %identity,
                        modifiers = %modifiers,
                        backend = self.backend.backend_name(),
                        path = %location.artifact_path.display(),
                        "Transform failed: {}",
                        e
                    );
                }
                e
            })?;

        let status = match fingerprint {
            Some(fp) => {
                self.store
                    .write(location, &image.data, fp)
                    .await
                    .inspect_err(|e| {
                        tracing::error!(
                            source = %identity,
                            path = %location.artifact_path.display(),
                            "Cache write failed: {}",
                            e
                        )
                    })?;
                info!(
                    source = %identity,
                    modifiers = %modifiers,
                    bytes = image.data.len(),
                    "Transformed and cached"
                );
                CacheStatus::Miss
            }
            None => {
                info!(source = %identity, "Transformed without caching");
                CacheStatus::Bypass
            }
        };

        Ok((image, status))
    }
}

/// Strong entity tag tied to both the cache key and the source version
fn entity_tag(location: &CacheLocation, fingerprint: &Fingerprint) -> String {
    format!("\"{}-{}\"", location.digest, &fingerprint.as_str()[..16])
}
