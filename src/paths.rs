//! Lexical path normalization and containment checks
//!
//! None of these functions touch the filesystem, so they can run
//! before anything under a root is read or created.

use crate::error::{IpxError, IpxResult};
use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` components without resolving symlinks.
///
/// `..` at the root is kept, so an escaping path stays detectable.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Make `path` absolute (against the working directory) and normalize it.
pub fn absolute_root(path: &Path) -> IpxResult<PathBuf> {
    let absolute = std::path::absolute(path)
        .map_err(|e| IpxError::io(format!("resolving {}", path.display()), e))?;
    Ok(normalize(&absolute))
}

/// Whether `candidate` normalizes to a path strictly below `root`.
///
/// `root` must already be normalized.
pub fn is_strict_descendant(root: &Path, candidate: &Path) -> bool {
    let normalized = normalize(candidate);
    normalized != root && normalized.starts_with(root)
}
