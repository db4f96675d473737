//! Image transform backend abstraction
//!
//! The cache layer only needs `process(source, modifiers)`; the concrete
//! backend decides how sources are fetched and pixels are produced.

pub mod image_backend;
pub mod storage;

pub use image_backend::ImageBackend;
pub use storage::SourceStorage;

use crate::error::IpxResult;
use crate::identity::Modifiers;
use async_trait::async_trait;
use bytes::Bytes;

/// Fallback content type when the output format is unknown
pub const GENERIC_CONTENT_TYPE: &str = "application/octet-stream";

/// Output of a successful transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    /// Encoded image bytes
    pub data: Bytes,
    /// Output format name (`jpeg`, `png`, ...), if the backend reports one
    pub format: Option<String>,
}

/// A backend able to fetch a source and apply modifiers to it
#[async_trait]
pub trait TransformBackend: Send + Sync {
    /// Produce the transformed image for `source`.
    ///
    /// `source` is a path relative to the source root or an absolute
    /// `http(s)` URL.
    async fn process(&self, source: &str, modifiers: &Modifiers) -> IpxResult<Transformed>;

    /// Human-readable backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Content type for a format name
pub fn content_type(format: Option<&str>) -> &'static str {
    match format.map(|f| f.to_ascii_lowercase()).as_deref() {
        Some("jpeg" | "jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("avif") => "image/avif",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("tiff") => "image/tiff",
        _ => GENERIC_CONTENT_TYPE,
    }
}

/// Detect a format name from the leading bytes of an encoded image
pub fn sniff_format(header: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(header).ok()?;
    let name = match format {
        image::ImageFormat::Jpeg => "jpeg",
        image::ImageFormat::Png => "png",
        image::ImageFormat::WebP => "webp",
        image::ImageFormat::Gif => "gif",
        image::ImageFormat::Avif => "avif",
        image::ImageFormat::Bmp => "bmp",
        image::ImageFormat::Tiff => "tiff",
        _ => return None,
    };
    Some(name)
}
