//! ipxd - image transform server with a source-validated disk cache
//!
//! Requests name a modifier string and a source (a path under the
//! configured directory or an allow-listed URL). Transformed images are
//! cached on disk and served again only while the source fingerprint
//! recorded next to them still matches.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod paths;
pub mod server;
pub mod transform;

pub use error::{IpxError, IpxResult};
