//! Cache key derivation
//!
//! Maps `(modifiers, source)` to `cacheRoot/<sanitized modifiers>/<digest>.img`
//! plus a sibling `<digest>.img.sourcehash`. The digest covers the
//! modifiers, the source kind and the source string, length-prefixed so
//! that no two distinct triples share key material.

use crate::error::{IpxError, IpxResult};
use crate::identity::SourceIdentity;
use crate::paths;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Bytes of the SHA-256 digest kept in file names (128 bits)
const DIGEST_PREFIX_BYTES: usize = 16;

/// Extension of cached artifacts
pub const ARTIFACT_EXTENSION: &str = "img";

/// Suffix appended to the artifact name for the fingerprint record
pub const FINGERPRINT_SUFFIX: &str = ".sourcehash";

/// On-disk location of one cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocation {
    /// Hex digest prefix identifying the entry
    pub digest: String,
    /// Directory holding the entry (`cacheRoot/<sanitized modifiers>`)
    pub dir: PathBuf,
    /// Transformed image bytes
    pub artifact_path: PathBuf,
    /// Source fingerprint recorded when the artifact was written
    pub fingerprint_path: PathBuf,
}

/// Builds [`CacheLocation`]s below a fixed cache root
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    root: PathBuf,
}

impl CacheKeyBuilder {
    /// Create a builder for `root`, made absolute and normalized.
    pub fn new(root: &Path) -> IpxResult<Self> {
        Ok(Self {
            root: paths::absolute_root(root)?,
        })
    }

    /// Normalized absolute cache root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the cache location for a request.
    ///
    /// Fails with `PathTraversalDenied` if the modifiers contain a path
    /// separator or the composed path is not strictly below the cache
    /// root. Never touches the filesystem.
    pub fn build(&self, modifiers: &str, identity: &SourceIdentity) -> IpxResult<CacheLocation> {
        if modifiers.contains(['/', '\\']) {
            warn!(
                modifiers = %modifiers,
                source = %identity,
                "Path separator in modifiers"
            );
            return Err(IpxError::PathTraversalDenied(format!(
                "modifiers '{}'",
                modifiers
            )));
        }

        let digest = digest_key(modifiers, identity);
        let dir = self.root.join(sanitize(modifiers));
        let artifact_name = format!("{}.{}", digest, ARTIFACT_EXTENSION);
        let artifact_path = dir.join(&artifact_name);
        let fingerprint_path = dir.join(format!("{}{}", artifact_name, FINGERPRINT_SUFFIX));

        if !paths::is_strict_descendant(&self.root, &dir)
            || !paths::is_strict_descendant(&self.root, &artifact_path)
        {
            warn!(
                modifiers = %modifiers,
                source = %identity,
                "Cache location escapes the cache root"
            );
            return Err(IpxError::PathTraversalDenied(format!(
                "modifiers '{}'",
                modifiers
            )));
        }

        Ok(CacheLocation {
            digest,
            dir,
            artifact_path,
            fingerprint_path,
        })
    }
}

/// Canonical key material: each field length-prefixed, so the encoding is injective.
fn canonical_key(modifiers: &str, identity: &SourceIdentity) -> String {
    let source = identity.key_source();
    let tag = identity.kind().tag();
    format!(
        "{}:{}|{}:{}|{}:{}",
        modifiers.len(),
        modifiers,
        tag.len(),
        tag,
        source.len(),
        source
    )
}

/// SHA-256 of the canonical key, truncated to `DIGEST_PREFIX_BYTES`
fn digest_key(modifiers: &str, identity: &SourceIdentity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_key(modifiers, identity).as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..DIGEST_PREFIX_BYTES])
}

/// Make a modifier string safe as a single directory name.
///
/// Strips a leading URL scheme, then replaces every character outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize(modifiers: &str) -> String {
    let stripped = strip_scheme(modifiers);
    let sanitized: String = stripped
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

fn strip_scheme(s: &str) -> &str {
    match s.find("://") {
        Some(idx)
            if idx > 0
                && s[..idx]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-')) =>
        {
            &s[idx + 3..]
        }
        _ => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fs_identity(rel: &str) -> SourceIdentity {
        SourceIdentity::Filesystem {
            relative_path: rel.to_string(),
            absolute_path: PathBuf::from("/srv/public").join(rel),
        }
    }

    fn remote_identity(url: &str) -> SourceIdentity {
        SourceIdentity::Remote {
            url: url.to_string(),
            domain: "good.example.com".to_string(),
        }
    }

    #[test]
    fn key_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let keys = CacheKeyBuilder::new(dir.path()).unwrap();

        let a = keys.build("w_100", &fs_identity("photos/cat.jpg")).unwrap();
        let b = keys.build("w_100", &fs_identity("photos/cat.jpg")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest.len(), DIGEST_PREFIX_BYTES * 2);
    }

    #[test]
    fn layout_matches_contract() {
        let dir = TempDir::new().unwrap();
        let keys = CacheKeyBuilder::new(dir.path()).unwrap();

        let loc = keys.build("w_100,h_50", &fs_identity("cat.jpg")).unwrap();
        assert_eq!(loc.dir, keys.root().join("w_100_h_50"));
        assert_eq!(
            loc.artifact_path,
            loc.dir.join(format!("{}.img", loc.digest))
        );
        assert_eq!(
            loc.fingerprint_path,
            loc.dir.join(format!("{}.img.sourcehash", loc.digest))
        );
    }

    #[test]
    fn kind_boundary_never_collides() {
        let dir = TempDir::new().unwrap();
        let keys = CacheKeyBuilder::new(dir.path()).unwrap();

        let text = "https://good.example.com/x.png";
        let fs = keys.build("w_1", &fs_identity(text)).unwrap();
        let remote = keys.build("w_1", &remote_identity(text)).unwrap();
        assert_ne!(fs.digest, remote.digest);
    }

    #[test]
    fn shifted_field_boundaries_differ() {
        let a = canonical_key("w_1|fs", &fs_identity("x"));
        let b = canonical_key("w_1", &fs_identity("fs|x"));
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_modifiers_sharing_a_directory_differ() {
        let dir = TempDir::new().unwrap();
        let keys = CacheKeyBuilder::new(dir.path()).unwrap();

        let a = keys.build("w_100,h_5", &fs_identity("a.png")).unwrap();
        let b = keys.build("w_100&h_5", &fs_identity("a.png")).unwrap();
        assert_eq!(a.dir, b.dir);
        assert_ne!(a.artifact_path, b.artifact_path);
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("w_200,h_100"), "w_200_h_100");
        assert_eq!(sanitize("a/b\\c"), "a_b_c");
        assert_eq!(sanitize("https://x/y"), "x_y");
        assert_eq!(sanitize("f_webp"), "f_webp");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn separators_in_modifiers_are_denied() {
        let dir = TempDir::new().unwrap();
        let keys = CacheKeyBuilder::new(dir.path()).unwrap();

        for modifiers in ["../../etc", "..\\..\\x", "w_10/h_5", "w_10\\"] {
            let err = keys.build(modifiers, &fs_identity("x.png")).unwrap_err();
            assert!(matches!(err, IpxError::PathTraversalDenied(_)));
        }
    }

    #[test]
    fn other_unsafe_characters_share_one_directory() {
        let dir = TempDir::new().unwrap();
        let keys = CacheKeyBuilder::new(dir.path()).unwrap();

        let loc = keys.build("w_10 h:5", &fs_identity("x.png")).unwrap();
        assert_eq!(loc.dir.parent(), Some(keys.root()));
        assert!(loc.dir.ends_with("w_10_h_5"));
    }

    #[test]
    fn dot_dot_modifiers_are_denied() {
        let dir = TempDir::new().unwrap();
        let keys = CacheKeyBuilder::new(dir.path()).unwrap();

        for modifiers in ["..", "."] {
            let err = keys.build(modifiers, &fs_identity("x.png")).unwrap_err();
            assert!(matches!(err, IpxError::PathTraversalDenied(_)));
        }
    }
}
