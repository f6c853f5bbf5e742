//! Image adaptation
//!
//! Turns one source image into an encoded image that satisfies a platform's
//! [`PlatformSpec`]: allowed format, maximum dimensions, maximum file size.
//! Adaptation is pure and deterministic, so the same source and spec always
//! produce the same bytes and different platforms can be adapted in parallel.
//!
//! [`ImageCache`] holds the per-draft results keyed by source identity (the
//! SHA-256 of the source bytes) and platform.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader, Rgb, RgbImage};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{ErrorCode, PlatformError};
use crate::specs::{ImageFormatKind, PlatformId, PlatformSpec};

const START_QUALITY: u8 = 95;
const MIN_QUALITY: u8 = 20;
const QUALITY_STEP: u8 = 5;
/// Scale steps in tenths of the fitted size: 1.0, 0.9, ... 0.3
const SCALE_TENTHS: std::ops::RangeInclusive<u32> = 3..=10;

/// A decoded source image plus its identity
#[derive(Clone)]
pub struct SourceImage {
    path: Option<PathBuf>,
    bytes: Arc<[u8]>,
    identity: String,
    format: Option<ImageFormatKind>,
    decoded: Arc<DynamicImage>,
    has_transparency: bool,
}

impl SourceImage {
    /// Reads and decodes an image file
    ///
    /// A missing file fails with `IMG-NOT-FOUND`; anything that cannot be
    /// read or decoded fails with `IMG-CORRUPT`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PlatformError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PlatformError::new(
                ErrorCode::ImgNotFound,
                format!("{} does not exist", path.display()),
            ));
        }

        let bytes = std::fs::read(path).map_err(|e| {
            let code = match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::ImgNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::SysPermission,
                _ => ErrorCode::ImgCorrupt,
            };
            PlatformError::new(code, format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut source = Self::from_bytes(bytes)?;
        source.path = Some(path.to_path_buf());
        Ok(source)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PlatformError> {
        let identity = hex_digest(&bytes);

        let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
            .with_guessed_format()
            .map_err(|e| PlatformError::new(ErrorCode::ImgCorrupt, e.to_string()))?;
        let format = reader.format().and_then(ImageFormatKind::from_image_format);
        let decoded = reader
            .decode()
            .map_err(|e| PlatformError::new(ErrorCode::ImgCorrupt, e.to_string()))?;

        let has_transparency =
            decoded.color().has_alpha() && decoded.to_rgba8().pixels().any(|p| p.0[3] < u8::MAX);

        Ok(Self {
            path: None,
            bytes: bytes.into(),
            identity,
            format,
            decoded: Arc::new(decoded),
            has_transparency,
        })
    }

    /// Hex SHA-256 of the source bytes
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn format(&self) -> Option<ImageFormatKind> {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.decoded.width(), self.decoded.height())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn conforms_to(&self, spec: &PlatformSpec) -> bool {
        let (w, h) = self.dimensions();
        let format_ok = self.format.is_some_and(|f| spec.allows(f));
        format_ok
            && w <= spec.max_dimensions.0
            && h <= spec.max_dimensions.1
            && self.bytes.len() as u64 <= spec.max_file_size
            && !self.has_transparency
    }
}

impl fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceImage")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .field("format", &self.format)
            .field("dimensions", &self.dimensions())
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Encoded image ready for one platform
#[derive(Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    bytes: Arc<[u8]>,
    pub format: ImageFormatKind,
    pub width: u32,
    pub height: u32,
    /// JPEG quality used, `None` for PNG or passthrough
    pub quality: Option<u8>,
    /// True when the source bytes were returned unchanged
    pub passthrough: bool,
}

impl ProcessedImage {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn file_name(&self) -> String {
        format!("image.{}", self.format.extension())
    }
}

impl fmt::Debug for ProcessedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessedImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("quality", &self.quality)
            .field("passthrough", &self.passthrough)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn output_format(
    source: Option<ImageFormatKind>,
    spec: &PlatformSpec,
) -> Result<ImageFormatKind, PlatformError> {
    if source == Some(ImageFormatKind::Png) && spec.allows(ImageFormatKind::Png) {
        return Ok(ImageFormatKind::Png);
    }
    if spec.allows(ImageFormatKind::Jpeg) {
        return Ok(ImageFormatKind::Jpeg);
    }
    if spec.allows(ImageFormatKind::Png) {
        return Ok(ImageFormatKind::Png);
    }
    Err(PlatformError::new(
        ErrorCode::ImgInvalidFormat,
        format!(
            "{} accepts none of the encodable formats (jpeg, png)",
            spec.display_name
        ),
    ))
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Largest size with the source's aspect ratio that fits `max`
fn fit_within((w, h): (u32, u32), (max_w, max_h): (u32, u32)) -> (u32, u32) {
    if w <= max_w && h <= max_h {
        return (w, h);
    }
    let ratio = f64::min(max_w as f64 / w as f64, max_h as f64 / h as f64);
    let fw = ((w as f64 * ratio).floor() as u32).clamp(1, max_w);
    let fh = ((h as f64 * ratio).floor() as u32).clamp(1, max_h);
    (fw, fh)
}

fn encode(
    pixels: &RgbImage,
    format: ImageFormatKind,
    quality: u8,
) -> Result<Vec<u8>, PlatformError> {
    let mut out = Vec::new();
    let (w, h) = pixels.dimensions();
    let result = match format {
        ImageFormatKind::Jpeg => JpegEncoder::new_with_quality(&mut out, quality).write_image(
            pixels.as_raw(),
            w,
            h,
            ExtendedColorType::Rgb8,
        ),
        _ => PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive)
            .write_image(pixels.as_raw(), w, h, ExtendedColorType::Rgb8),
    };
    result.map_err(|e| PlatformError::new(ErrorCode::ImgResizeFailed, e.to_string()))?;
    Ok(out)
}

/// Adapts `source` to `spec`
pub fn adapt(source: &SourceImage, spec: &PlatformSpec) -> Result<ProcessedImage, PlatformError> {
    if source.conforms_to(spec) {
        let (width, height) = source.dimensions();
        tracing::debug!(platform = %spec.display_name, "Source image already conforms");
        return Ok(ProcessedImage {
            bytes: Arc::clone(&source.bytes),
            // conforms_to guarantees a known format
            format: source.format.unwrap_or(ImageFormatKind::Jpeg),
            width,
            height,
            quality: None,
            passthrough: true,
        });
    }

    let format = output_format(source.format, spec)?;
    let flattened = flatten_onto_white(&source.decoded);
    let fitted = fit_within(flattened.dimensions(), spec.max_dimensions);
    let qualities: Vec<u8> = match format {
        ImageFormatKind::Jpeg => (MIN_QUALITY..=START_QUALITY)
            .rev()
            .step_by(QUALITY_STEP as usize)
            .collect(),
        _ => vec![START_QUALITY],
    };

    let mut attempts = 0usize;
    let mut smallest = u64::MAX;
    for tenths in SCALE_TENTHS.rev() {
        let w = (fitted.0 * tenths / 10).max(1);
        let h = (fitted.1 * tenths / 10).max(1);
        let pixels = if (w, h) == flattened.dimensions() {
            flattened.clone()
        } else {
            image::imageops::resize(&flattened, w, h, FilterType::Lanczos3)
        };

        for &quality in &qualities {
            attempts += 1;
            let bytes = encode(&pixels, format, quality)?;
            let size = bytes.len() as u64;
            smallest = smallest.min(size);
            tracing::debug!(
                platform = %spec.display_name,
                width = w,
                height = h,
                quality,
                bytes = size,
                max_bytes = spec.max_file_size,
                "Compression attempt"
            );

            if size <= spec.max_file_size {
                tracing::info!(
                    platform = %spec.display_name,
                    from = ?source.dimensions(),
                    to = ?(w, h),
                    bytes = size,
                    attempts,
                    "Adapted image"
                );
                return Ok(ProcessedImage {
                    bytes: bytes.into(),
                    format,
                    width: w,
                    height: h,
                    quality: (format == ImageFormatKind::Jpeg).then_some(quality),
                    passthrough: false,
                });
            }
        }
    }

    Err(PlatformError::new(
        ErrorCode::ImgResizeFailed,
        format!(
            "smallest encoding was {} bytes after {} attempts, limit is {}",
            smallest, attempts, spec.max_file_size
        ),
    ))
}

#[derive(Default)]
struct CacheState {
    source: Option<String>,
    entries: HashMap<PlatformId, ProcessedImage>,
}

/// Per-draft cache of adapted images
///
/// Entries belong to one source image. Handing the cache a different source
/// drops everything cached for the previous one. Failed adaptations are not
/// cached.
#[derive(Clone, Default)]
pub struct ImageCache {
    state: Arc<RwLock<CacheState>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, source: &SourceImage, platform: PlatformId) -> Option<ProcessedImage> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.source.as_deref() != Some(source.identity()) {
            return None;
        }
        state.entries.get(&platform).cloned()
    }

    fn store(&self, source: &SourceImage, platform: PlatformId, image: ProcessedImage) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.source.as_deref() != Some(source.identity()) {
            tracing::debug!(identity = %source.identity(), "Source image changed, clearing cache");
            state.entries.clear();
            state.source = Some(source.identity().to_string());
        }
        state.entries.insert(platform, image);
    }

    pub fn get_or_adapt(
        &self,
        source: &SourceImage,
        platform: PlatformId,
        spec: &PlatformSpec,
    ) -> Result<ProcessedImage, PlatformError> {
        if let Some(hit) = self.lookup(source, platform) {
            return Ok(hit);
        }
        let adapted = adapt(source, spec)?;
        self.store(source, platform, adapted.clone());
        Ok(adapted)
    }

    /// Adapts one source for several platforms in parallel
    pub fn adapt_all(
        &self,
        source: &SourceImage,
        targets: &[(PlatformId, &PlatformSpec)],
    ) -> HashMap<PlatformId, Result<ProcessedImage, PlatformError>> {
        targets
            .par_iter()
            .map(|(platform, spec)| (*platform, self.get_or_adapt(source, *platform, spec)))
            .collect()
    }

    /// Drops every cached entry (draft cleared)
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.entries.clear();
        state.source = None;
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
