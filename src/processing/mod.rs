//! Core image processing functionality

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::io::Reader as ImageReader;
use image::{ColorType, DynamicImage, ImageOutputFormat};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::config::ENCODE_QUALITY;
use crate::error::{Result, ResizerError};

pub mod formats;
pub mod metadata;
pub mod resize;

pub use formats::*;
pub use metadata::*;
pub use resize::*;

/// Bytes read up front to sniff the container format
const HEADER_LEN: usize = 16;

/// Dimensions and metadata of a decodable image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub metadata: ImageMetadata,
}

/// The codec capability the pipeline is written against.
///
/// Implementations must be shareable across worker threads. The pipeline
/// never decodes or encodes pixels itself.
pub trait ImageCodec: Send + Sync {
    /// Whether `path` can be opened as an image. Never errors: anything
    /// unreadable is simply not an image.
    fn probe(&self, path: &Path) -> bool;

    /// Read dimensions and embedded metadata
    fn decode(&self, path: &Path) -> Result<ImageInfo>;

    /// Resample `source` to exactly `width`×`height`, re-encode it and
    /// replace `destination` atomically. Returns the number of bytes written.
    fn resize_and_encode(
        &self,
        source: &Path,
        destination: &Path,
        width: u32,
        height: u32,
        metadata: &ImageMetadata,
    ) -> Result<u64>;
}

/// Default codec built on the `image` crate: Lanczos3 resampling, fixed
/// quality, EXIF and density carried over for JPEG and PNG.
#[derive(Debug, Clone, Default)]
pub struct ProcessingEngine {
    dpi_ceiling: Option<u32>,
}

impl ProcessingEngine {
    /// Create a new processing engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp embedded DPI to `dpi` when the source exceeds it
    pub fn with_dpi_ceiling(dpi_ceiling: Option<u32>) -> Self {
        Self { dpi_ceiling }
    }

    /// Encode an image in `format` at the fixed quality
    fn encode(&self, image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
        let mut data = Vec::new();

        match format {
            ImageFormat::Jpeg => {
                let mut encoder = JpegEncoder::new_with_quality(&mut data, ENCODE_QUALITY);
                // JPEG has no alpha channel
                match image.color() {
                    ColorType::L8 | ColorType::L16 | ColorType::La8 | ColorType::La16 => {
                        let gray = image.to_luma8();
                        encoder.encode(gray.as_raw(), gray.width(), gray.height(), ColorType::L8)?;
                    }
                    _ => {
                        let rgb = image.to_rgb8();
                        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
                    }
                }
            }
            other => {
                let output: ImageOutputFormat = image::ImageFormat::from(other).into();
                image.write_to(&mut Cursor::new(&mut data), output)?;
            }
        }

        Ok(data)
    }
}

impl ImageCodec for ProcessingEngine {
    fn probe(&self, path: &Path) -> bool {
        let dimensions = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(ResizerError::from)
            .and_then(|reader| {
                if reader.format().is_none() {
                    return Err(ResizerError::invalid_parameters("unknown format"));
                }
                reader.into_dimensions().map_err(ResizerError::from)
            });

        match dimensions {
            Ok(_) => true,
            Err(e) => {
                trace!("Not an image {:?}: {}", path, e);
                false
            }
        }
    }

    fn decode(&self, path: &Path) -> Result<ImageInfo> {
        let data = fs::read(path)?;
        let format = detect_format(path, &data[..data.len().min(HEADER_LEN)]);

        let mut reader = ImageReader::new(Cursor::new(data.as_slice())).with_guessed_format()?;
        if reader.format().is_none() {
            // Formats without magic bytes are only known by extension
            if let Ok(by_extension) = image::ImageFormat::from_path(path) {
                reader.set_format(by_extension);
            }
        }
        let (width, height) = reader.into_dimensions()?;

        let metadata = read_metadata(format, data);

        debug!(
            "Decoded {:?}: {}x{} ({:?}, exif: {}, dpi: {:?})",
            path,
            width,
            height,
            metadata.format,
            metadata.has_exif(),
            metadata.dpi
        );

        Ok(ImageInfo {
            width,
            height,
            metadata,
        })
    }

    fn resize_and_encode(
        &self,
        source: &Path,
        destination: &Path,
        width: u32,
        height: u32,
        metadata: &ImageMetadata,
    ) -> Result<u64> {
        if width == 0 || height == 0 {
            return Err(ResizerError::invalid_parameters(format!(
                "target dimensions {}x{} are empty",
                width, height
            )));
        }

        let format = metadata
            .format
            .or_else(|| detect_format_from_path(source))
            .ok_or_else(|| ResizerError::invalid_parameters("cannot determine output format"))?;

        let image = ImageReader::open(source)?.with_guessed_format()?.decode()?;
        let resized = image.resize_exact(width, height, FilterType::Lanczos3);

        let encoded = self.encode(&resized, format)?;
        let dpi = target_dpi(metadata.dpi, self.dpi_ceiling);
        let encoded = apply_metadata(encoded, format, metadata.exif.as_deref(), dpi)?;

        write_atomically(destination, &encoded)
    }
}

/// Replace `destination` with `data` so that an interrupted write leaves
/// either the previous file or the complete new one, never a truncated file.
pub fn write_atomically(destination: &Path, data: &[u8]) -> Result<u64> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;

    // Keep the mode of a file being overwritten in place
    if let Ok(existing) = fs::metadata(destination) {
        fs::set_permissions(temp.path(), existing.permissions())?;
    }

    temp.persist(destination).map_err(|e| e.error)?;
    Ok(data.len() as u64)
}
