//! Embedded metadata carried across a re-encode
//!
//! The `image` encoders drop everything but pixels, so EXIF blocks and pixel
//! densities are lifted from the source container before decoding and spliced
//! back into the encoded output afterwards. Only JPEG (JFIF `APP0`, EXIF `APP1`)
//! and PNG (`pHYs`, `eXIf`) containers are handled.

use img_parts::jpeg::{markers, Jpeg, JpegSegment};
use img_parts::png::{Png, PngChunk};
use img_parts::{Bytes, ImageEXIF};
use tracing::debug;

use super::formats::ImageFormat;
use crate::error::{Result, ResizerError};

const JFIF_IDENTIFIER: &[u8] = b"JFIF\0";
const PHYS: [u8; 4] = *b"pHYs";
const INCHES_PER_METER: f64 = 39.370_078_740_157_48;

/// Metadata read from a source image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    /// Container format, detected from content
    pub format: Option<ImageFormat>,
    /// Raw EXIF payload (TIFF structure, without the `Exif\0\0` prefix)
    pub exif: Option<Vec<u8>>,
    /// Horizontal and vertical dots per inch
    pub dpi: Option<(u32, u32)>,
}

impl ImageMetadata {
    pub fn has_exif(&self) -> bool {
        self.exif.is_some()
    }
}

/// Read EXIF and density from raw file contents.
///
/// Containers that fail to parse yield empty metadata rather than an error:
/// missing metadata never stops a resize.
pub fn read_metadata(format: Option<ImageFormat>, data: Vec<u8>) -> ImageMetadata {
    let mut metadata = ImageMetadata {
        format,
        ..ImageMetadata::default()
    };

    match format {
        Some(ImageFormat::Jpeg) => match Jpeg::from_bytes(Bytes::from(data)) {
            Ok(jpeg) => {
                metadata.exif = jpeg.exif().map(|exif| exif.to_vec());
                metadata.dpi = jpeg
                    .segment_by_marker(markers::APP0)
                    .and_then(|segment| parse_jfif_density(segment.contents()));
            }
            Err(e) => debug!("Unreadable JPEG container: {}", e),
        },
        Some(ImageFormat::Png) => match Png::from_bytes(Bytes::from(data)) {
            Ok(png) => {
                metadata.exif = png.exif().map(|exif| exif.to_vec());
                metadata.dpi = png
                    .chunk_by_type(PHYS)
                    .and_then(|chunk| parse_phys_density(chunk.contents()));
            }
            Err(e) => debug!("Unreadable PNG container: {}", e),
        },
        _ => {}
    }

    metadata
}

/// Density to write into the output: the source density, clamped to the
/// ceiling when its horizontal value exceeds it.
pub fn target_dpi(source: Option<(u32, u32)>, ceiling: Option<u32>) -> Option<(u32, u32)> {
    let (x, y) = source?;
    match ceiling {
        Some(ceiling) if x > ceiling => Some((ceiling, ceiling)),
        _ => Some((x, y)),
    }
}

/// Splice EXIF and density into freshly encoded bytes
pub fn apply_metadata(
    encoded: Vec<u8>,
    format: ImageFormat,
    exif: Option<&[u8]>,
    dpi: Option<(u32, u32)>,
) -> Result<Vec<u8>> {
    let exif = exif.filter(|_| format.carries_exif());
    let dpi = dpi.filter(|_| format.carries_dpi());
    if exif.is_none() && dpi.is_none() {
        return Ok(encoded);
    }

    let mut output = Vec::with_capacity(encoded.len() + exif.map_or(0, <[u8]>::len) + 32);
    match format {
        ImageFormat::Jpeg => {
            let mut jpeg = Jpeg::from_bytes(Bytes::from(encoded))
                .map_err(|e| ResizerError::metadata(format!("Failed to parse encoded JPEG: {}", e)))?;
            if let Some(exif) = exif {
                jpeg.set_exif(Some(Bytes::copy_from_slice(exif)));
            }
            if let Some(dpi) = dpi {
                set_jfif_density(&mut jpeg, dpi);
            }
            jpeg.encoder().write_to(&mut output)?;
        }
        ImageFormat::Png => {
            let mut png = Png::from_bytes(Bytes::from(encoded))
                .map_err(|e| ResizerError::metadata(format!("Failed to parse encoded PNG: {}", e)))?;
            if let Some(exif) = exif {
                png.set_exif(Some(Bytes::copy_from_slice(exif)));
            }
            if let Some(dpi) = dpi {
                set_phys_density(&mut png, dpi);
            }
            png.encoder().write_to(&mut output)?;
        }
        _ => return Ok(encoded),
    }

    Ok(output)
}

fn parse_jfif_density(contents: &[u8]) -> Option<(u32, u32)> {
    if contents.len() < 12 || !contents.starts_with(JFIF_IDENTIFIER) {
        return None;
    }
    let unit = contents[7];
    let x = u32::from(u16::from_be_bytes([contents[8], contents[9]]));
    let y = u32::from(u16::from_be_bytes([contents[10], contents[11]]));
    match unit {
        1 => Some((x, y)),
        // dots per centimetre
        2 => Some((per_cm_to_dpi(x), per_cm_to_dpi(y))),
        _ => None,
    }
}

fn set_jfif_density(jpeg: &mut Jpeg, (x, y): (u32, u32)) {
    let x = u16::try_from(x).unwrap_or(u16::MAX).to_be_bytes();
    let y = u16::try_from(y).unwrap_or(u16::MAX).to_be_bytes();

    let mut contents = Vec::with_capacity(14);
    contents.extend_from_slice(JFIF_IDENTIFIER);
    contents.extend_from_slice(&[1, 1, 1]); // version 1.01, unit: dots per inch
    contents.extend_from_slice(&x);
    contents.extend_from_slice(&y);
    contents.extend_from_slice(&[0, 0]); // no thumbnail

    let segment = JpegSegment::new_with_contents(markers::APP0, Bytes::from(contents));
    let segments = jpeg.segments_mut();
    match segments
        .iter()
        .position(|s| s.marker() == markers::APP0 && s.contents().starts_with(JFIF_IDENTIFIER))
    {
        Some(index) => segments[index] = segment,
        None => segments.insert(0, segment),
    }
}

fn parse_phys_density(contents: &[u8]) -> Option<(u32, u32)> {
    if contents.len() < 9 || contents[8] != 1 {
        return None;
    }
    let x = u32::from_be_bytes([contents[0], contents[1], contents[2], contents[3]]);
    let y = u32::from_be_bytes([contents[4], contents[5], contents[6], contents[7]]);
    Some((per_meter_to_dpi(x), per_meter_to_dpi(y)))
}

fn set_phys_density(png: &mut Png, (x, y): (u32, u32)) {
    let mut contents = Vec::with_capacity(9);
    contents.extend_from_slice(&dpi_to_per_meter(x).to_be_bytes());
    contents.extend_from_slice(&dpi_to_per_meter(y).to_be_bytes());
    contents.push(1); // unit: metre

    png.remove_chunks_by_type(PHYS);
    // pHYs must precede IDAT; right after IHDR is always valid
    let chunks = png.chunks_mut();
    let index = chunks.len().min(1);
    chunks.insert(index, PngChunk::new(PHYS, Bytes::from(contents)));
}

fn per_cm_to_dpi(value: u32) -> u32 {
    (f64::from(value) * 2.54).round() as u32
}

fn per_meter_to_dpi(value: u32) -> u32 {
    (f64::from(value) / INCHES_PER_METER).round() as u32
}

fn dpi_to_per_meter(value: u32) -> u32 {
    (f64::from(value) * INCHES_PER_METER).round() as u32
}
