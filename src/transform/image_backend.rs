//! Transform backend built on the `image` crate
//!
//! Supported modifiers:
//!
//! | Modifier | Aliases | Value |
//! |----------|---------|-------|
//! | `width` | `w` | pixels |
//! | `height` | `h` | pixels |
//! | `resize` | `s` | `WxH` |
//! | `fit` | | `cover`, `contain`, `fill`, `inside`, `outside` |
//! | `format` | `f` | `jpeg`, `jpg`, `png`, `webp`, `gif`, `auto` |
//! | `quality` | `q` | 1-100 (jpeg) |
//! | `rotate` | | multiple of 90 |
//! | `flip`, `flop`, `grayscale` | | flag |
//! | `blur` | | sigma, or flag for 1.0 |
//!
//! Decoding, pixel work and encoding run on the blocking pool.

use crate::config::schema::IpxSettings;
use crate::error::{IpxError, IpxResult};
use crate::identity::Modifiers;
use crate::transform::{SourceStorage, TransformBackend, Transformed};
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::debug;

/// Largest output edge accepted
pub const MAX_DIMENSION: u32 = 8192;

const DEFAULT_QUALITY: u8 = 80;
const FILTER: FilterType = FilterType::Lanczos3;

const KNOWN_MODIFIERS: &[&str] = &[
    "w", "width", "h", "height", "s", "resize", "fit", "f", "format", "q", "quality", "rotate",
    "flip", "flop", "grayscale", "blur",
];

/// How an image is fitted into a `width x height` box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Fit {
    /// Fill the box, cropping overflow
    #[default]
    Cover,
    /// Fit inside the box and pad to its exact size
    Contain,
    /// Stretch to the box
    Fill,
    /// Fit inside the box, keeping aspect ratio
    Inside,
    /// Cover the box without cropping
    Outside,
}

/// Encodable output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
}

impl OutputFormat {
    fn parse(value: &str) -> IpxResult<Option<Self>> {
        match value.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Some(Self::Jpeg)),
            "png" => Ok(Some(Self::Png)),
            "webp" => Ok(Some(Self::WebP)),
            "gif" => Ok(Some(Self::Gif)),
            "auto" => Ok(None),
            other => Err(IpxError::backend(
                400,
                format!("Unsupported output format: {}", other),
            )),
        }
    }

    /// Keep the input format when it can be encoded, else fall back to PNG.
    fn from_input(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Jpeg => Self::Jpeg,
            ImageFormat::WebP => Self::WebP,
            ImageFormat::Gif => Self::Gif,
            _ => Self::Png,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
        }
    }
}

/// Operations derived from a modifier map
#[derive(Debug, Clone, PartialEq)]
struct TransformOps {
    width: Option<u32>,
    height: Option<u32>,
    fit: Fit,
    format: Option<OutputFormat>,
    quality: u8,
    rotate: u32,
    flip: bool,
    flop: bool,
    grayscale: bool,
    blur: Option<f32>,
}

impl TransformOps {
    fn from_modifiers(modifiers: &Modifiers) -> IpxResult<Self> {
        for (name, _) in modifiers.iter() {
            if !KNOWN_MODIFIERS.contains(&name) {
                debug!(modifier = %name, "Ignoring unsupported modifier");
            }
        }

        let mut width = modifiers
            .get_any(&["w", "width"])
            .map(|v| parse_dimension("width", v))
            .transpose()?;
        let mut height = modifiers
            .get_any(&["h", "height"])
            .map(|v| parse_dimension("height", v))
            .transpose()?;

        if let Some(size) = modifiers.get_any(&["s", "resize"]) {
            let (w, h) = size
                .split_once('x')
                .ok_or_else(|| invalid("resize", size))?;
            width = Some(parse_dimension("resize", w)?);
            height = Some(parse_dimension("resize", h)?);
        }

        let fit = match modifiers.get("fit") {
            None => Fit::default(),
            Some("cover") => Fit::Cover,
            Some("contain") => Fit::Contain,
            Some("fill") => Fit::Fill,
            Some("inside") => Fit::Inside,
            Some("outside") => Fit::Outside,
            Some(other) => return Err(invalid("fit", other)),
        };

        let format = match modifiers.get_any(&["f", "format"]) {
            Some(value) => OutputFormat::parse(value)?,
            None => None,
        };

        let quality = match modifiers.get_any(&["q", "quality"]) {
            Some(value) => value
                .parse::<u8>()
                .ok()
                .filter(|q| (1..=100).contains(q))
                .ok_or_else(|| invalid("quality", value))?,
            None => DEFAULT_QUALITY,
        };

        let rotate = match modifiers.get("rotate") {
            Some(value) => {
                let degrees: i64 = value.parse().map_err(|_| invalid("rotate", value))?;
                if degrees % 90 != 0 {
                    return Err(invalid("rotate", value));
                }
                degrees.rem_euclid(360) as u32
            }
            None => 0,
        };

        let blur = match modifiers.get("blur") {
            Some(crate::identity::modifiers::FLAG_VALUE) => Some(1.0),
            Some(value) => Some(
                value
                    .parse::<f32>()
                    .ok()
                    .filter(|s| *s > 0.0 && *s <= 100.0)
                    .ok_or_else(|| invalid("blur", value))?,
            ),
            None => None,
        };

        Ok(Self {
            width,
            height,
            fit,
            format,
            quality,
            rotate,
            flip: flag(modifiers, "flip"),
            flop: flag(modifiers, "flop"),
            grayscale: flag(modifiers, "grayscale"),
            blur,
        })
    }
}

fn flag(modifiers: &Modifiers, name: &str) -> bool {
    matches!(modifiers.get(name), Some(v) if v != "false" && v != "0")
}

fn invalid(name: &str, value: &str) -> IpxError {
    IpxError::backend(400, format!("Invalid value for {}: {}", name, value))
}

fn parse_dimension(name: &str, value: &str) -> IpxResult<u32> {
    value
        .parse::<u32>()
        .ok()
        .filter(|v| (1..=MAX_DIMENSION).contains(v))
        .ok_or_else(|| invalid(name, value))
}

/// Backend that fetches sources through [`SourceStorage`] and renders with `image`
#[derive(Clone)]
pub struct ImageBackend {
    storage: SourceStorage,
}

impl ImageBackend {
    pub fn new(storage: SourceStorage) -> Self {
        Self { storage }
    }

    /// Create a backend from the IPX settings section
    pub fn from_settings(settings: &IpxSettings) -> IpxResult<Self> {
        Ok(Self::new(SourceStorage::new(settings)?))
    }
}

#[async_trait]
impl TransformBackend for ImageBackend {
    async fn process(&self, source: &str, modifiers: &Modifiers) -> IpxResult<Transformed> {
        let ops = TransformOps::from_modifiers(modifiers)?;
        let original = self.storage.fetch(source).await?;

        tokio::task::spawn_blocking(move || render(&original, &ops))
            .await
            .map_err(|e| IpxError::Internal(format!("transform task failed: {}", e)))?
    }

    fn backend_name(&self) -> &'static str {
        "image"
    }
}

fn render(original: &[u8], ops: &TransformOps) -> IpxResult<Transformed> {
    let input_format = image::guess_format(original)
        .map_err(|_| IpxError::backend(415, "Unsupported source image format"))?;
    let mut img = image::load_from_memory_with_format(original, input_format)
        .map_err(|e| IpxError::backend(415, format!("Cannot decode source image: {}", e)))?;

    img = match ops.rotate {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    };
    img = resize(img, ops)?;
    if ops.flip {
        img = img.flipv();
    }
    if ops.flop {
        img = img.fliph();
    }
    if ops.grayscale {
        img = img.grayscale();
    }
    if let Some(sigma) = ops.blur {
        img = img.blur(sigma);
    }

    let output = ops
        .format
        .unwrap_or_else(|| OutputFormat::from_input(input_format));
    let data = encode(&img, output, ops.quality)?;

    Ok(Transformed {
        data: Bytes::from(data),
        format: Some(output.name().to_string()),
    })
}

fn scaled(value: u32, target: u32, base: u32) -> u32 {
    ((f64::from(value) * f64::from(target)) / f64::from(base.max(1)))
        .round()
        .max(1.0) as u32
}

fn checked_dimension(value: u32) -> IpxResult<u32> {
    if value > MAX_DIMENSION {
        return Err(IpxError::backend(400, "Requested size is too large"));
    }
    Ok(value)
}

/// Center `img` on an opaque black canvas of `width x height`
fn letterbox(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    let x = i64::from(width.saturating_sub(img.width()) / 2);
    let y = i64::from(height.saturating_sub(img.height()) / 2);
    image::imageops::overlay(&mut canvas, &img.to_rgba8(), x, y);
    DynamicImage::ImageRgba8(canvas)
}

fn resize(img: DynamicImage, ops: &TransformOps) -> IpxResult<DynamicImage> {
    let (src_w, src_h) = (img.width(), img.height());

    let resized = match (ops.width, ops.height) {
        (None, None) => return Ok(img),
        (Some(w), None) => {
            let h = checked_dimension(scaled(src_h, w, src_w))?;
            img.resize_exact(w, h, FILTER)
        }
        (None, Some(h)) => {
            let w = checked_dimension(scaled(src_w, h, src_h))?;
            img.resize_exact(w, h, FILTER)
        }
        (Some(w), Some(h)) => match ops.fit {
            Fit::Cover => img.resize_to_fill(w, h, FILTER),
            Fit::Contain => letterbox(img.resize(w, h, FILTER), w, h),
            Fit::Inside => img.resize(w, h, FILTER),
            Fit::Fill => img.resize_exact(w, h, FILTER),
            Fit::Outside => {
                let scale = f64::max(
                    f64::from(w) / f64::from(src_w.max(1)),
                    f64::from(h) / f64::from(src_h.max(1)),
                );
                let out_w = checked_dimension((f64::from(src_w) * scale).round().max(1.0) as u32)?;
                let out_h = checked_dimension((f64::from(src_h) * scale).round().max(1.0) as u32)?;
                img.resize_exact(out_w, out_h, FILTER)
            }
        },
    };

    Ok(resized)
}

fn encode(img: &DynamicImage, format: OutputFormat, quality: u8) -> IpxResult<Vec<u8>> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            img.to_rgb8().write_with_encoder(encoder)
        }
        OutputFormat::Png => img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png),
        OutputFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP),
        OutputFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Gif),
    };

    result.map_err(|e| IpxError::Backend {
        status: None,
        message: format!("Encoding {} failed: {}", format.name(), e),
    })?;
    Ok(buf)
}
