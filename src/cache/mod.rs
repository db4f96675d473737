//! Disk cache for transformed images
//!
//! Entries are keyed by modifiers plus source identity and validated
//! against a fingerprint of the source they were produced from.
//!
//! # Layout
//!
//! ```text
//! {diskCacheDir}/{sanitized modifiers}/{digest}.img
//! {diskCacheDir}/{sanitized modifiers}/{digest}.img.sourcehash
//! ```
//!
//! # Entry States
//!
//! | State | Condition | Action |
//! |-------|-----------|--------|
//! | Missing | no artifact file | transform, write |
//! | Stale | record missing or fingerprint differs | transform, overwrite |
//! | Hit | record equals current source fingerprint | stream artifact |
//!
//! There is no eviction; entries are only ever overwritten.

pub mod fingerprint;
pub mod flight;
pub mod key;
pub mod store;

pub use fingerprint::{fingerprint, Fingerprint};
pub use flight::{CoalescerStats, Flight, RequestCoalescer};
pub use key::{sanitize, CacheKeyBuilder, CacheLocation};
pub use store::{ArtifactStream, CacheEntry, DiskCacheStore};
