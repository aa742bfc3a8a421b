//! Image format detection and handling

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Formats the codec can re-encode in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Tiff,
    Bmp,
}

impl ImageFormat {
    /// Whether an EXIF block survives a re-encode in this format
    pub fn carries_exif(self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }

    /// Whether a pixel density is written back in this format
    pub fn carries_dpi(self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }
}

/// Detect image format from file extension
pub fn detect_format_from_path<P: AsRef<Path>>(path: P) -> Option<ImageFormat> {
    let extension = path.as_ref().extension()?.to_str()?;

    match extension.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "webp" => Some(ImageFormat::WebP),
        "gif" => Some(ImageFormat::Gif),
        "tiff" | "tif" => Some(ImageFormat::Tiff),
        "bmp" => Some(ImageFormat::Bmp),
        _ => None,
    }
}

/// Detect image format from file header (magic bytes)
pub fn detect_format_from_header(data: &[u8]) -> Option<ImageFormat> {
    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageFormat::Jpeg);
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(ImageFormat::Png);
    }

    // GIF: GIF87a or GIF89a
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some(ImageFormat::Gif);
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some(ImageFormat::WebP);
    }

    // TIFF: II*. (little-endian) or MM.* (big-endian)
    if data.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || data.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
        return Some(ImageFormat::Tiff);
    }

    // BMP: BM
    if data.starts_with(b"BM") {
        return Some(ImageFormat::Bmp);
    }

    None
}

/// Content first, extension as a fallback
pub fn detect_format(path: &Path, header: &[u8]) -> Option<ImageFormat> {
    detect_format_from_header(header).or_else(|| detect_format_from_path(path))
}

/// Convert our ImageFormat to image crate format
impl From<ImageFormat> for image::ImageFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::WebP => image::ImageFormat::WebP,
            ImageFormat::Gif => image::ImageFormat::Gif,
            ImageFormat::Tiff => image::ImageFormat::Tiff,
            ImageFormat::Bmp => image::ImageFormat::Bmp,
        }
    }
}
