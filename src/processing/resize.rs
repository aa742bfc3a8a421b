//! Longest-edge resize and the per-item result it produces

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ImageCodec;
use crate::error::{ErrorKind, ResizerError};

/// Outcome of one work item, the only message workers send back.
///
/// Built through [`ProcessedResult::converted`], [`ProcessedResult::unchanged`]
/// and [`ProcessedResult::failed`] so that `processed` and `error` never
/// disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResult {
    /// Destination path of the item
    pub path: PathBuf,
    pub target_width: u32,
    pub target_height: u32,
    pub size_before: u64,
    pub size_after: u64,
    processed: bool,
    error: Option<ErrorKind>,
    detail: Option<String>,
}

impl ProcessedResult {
    /// The destination was rewritten at the new dimensions
    pub fn converted(path: PathBuf, (width, height): (u32, u32), size_before: u64, size_after: u64) -> Self {
        Self {
            path,
            target_width: width,
            target_height: height,
            size_before,
            size_after,
            processed: true,
            error: None,
            detail: None,
        }
    }

    /// The image already satisfied the bound
    pub fn unchanged(path: PathBuf, (width, height): (u32, u32), size: u64) -> Self {
        Self {
            path,
            target_width: width,
            target_height: height,
            size_before: size,
            size_after: size,
            processed: false,
            error: None,
            detail: None,
        }
    }

    /// Processing failed; sizes both report the best known source size
    pub fn failed(
        path: PathBuf,
        (width, height): (u32, u32),
        size: u64,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            path,
            target_width: width,
            target_height: height,
            size_before: size,
            size_after: size,
            processed: false,
            error: Some(kind),
            detail: Some(detail.into()),
        }
    }

    /// Build a failure from an error, classifying unknown errors as I/O
    pub fn from_error(path: PathBuf, dimensions: (u32, u32), size: u64, error: &ResizerError) -> Self {
        let kind = error.kind().unwrap_or(ErrorKind::Io);
        Self::failed(path, dimensions, size, kind, error.to_string())
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Neither converted nor failed
    pub fn is_noop(&self) -> bool {
        !self.processed && self.error.is_none()
    }
}

/// Target dimensions for a longest-edge bound, or `None` when the image
/// already fits.
///
/// The longer edge is clamped to `max_size` and the other edge scaled by the
/// same ratio, truncating. Width counts as the longer edge only when strictly
/// greater than height.
pub fn target_dimensions(width: u32, height: u32, max_size: u32) -> Option<(u32, u32)> {
    if width <= max_size && height <= max_size {
        return None;
    }

    let scale = |edge: u32, longest: u32| -> u32 {
        // max_size < longest here, so the result is below max_size
        (u64::from(edge) * u64::from(max_size) / u64::from(longest)) as u32
    };

    if width > height {
        Some((max_size, scale(height, width)))
    } else {
        Some((scale(width, height), max_size))
    }
}

/// Resize `source` into `destination` if it exceeds `max_size`.
///
/// Never returns an error: every failure becomes a failed
/// [`ProcessedResult`] so the caller always has something to report.
pub fn resize_image<C: ImageCodec + ?Sized>(
    codec: &C,
    source: &Path,
    destination: &Path,
    max_size: u32,
) -> ProcessedResult {
    let destination_path = destination.to_path_buf();

    let size_before = match fs::metadata(source) {
        Ok(metadata) => metadata.len(),
        Err(e) => return ProcessedResult::from_error(destination_path, (0, 0), 0, &e.into()),
    };

    let info = match codec.decode(source) {
        Ok(info) => info,
        Err(e) => return ProcessedResult::from_error(destination_path, (0, 0), size_before, &e),
    };

    let Some(target) = target_dimensions(info.width, info.height, max_size) else {
        debug!("{:?} is {}x{}, within {}", source, info.width, info.height, max_size);
        return ProcessedResult::unchanged(destination_path, (info.width, info.height), size_before);
    };

    debug!(
        "Resizing {:?}: {}x{} -> {}x{}",
        source, info.width, info.height, target.0, target.1
    );

    match codec.resize_and_encode(source, destination, target.0, target.1, &info.metadata) {
        Ok(written) => {
            let size_after = fs::metadata(destination).map(|m| m.len()).unwrap_or(written);
            ProcessedResult::converted(destination_path, target, size_before, size_after)
        }
        Err(e) => ProcessedResult::from_error(destination_path, target, size_before, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_bound_is_noop() {
        assert_eq!(target_dimensions(300, 300, 300), None);
        assert_eq!(target_dimensions(299, 10, 300), None);
        assert_eq!(target_dimensions(1, 1, 1), None);
    }

    #[test]
    fn test_landscape_clamps_width() {
        assert_eq!(target_dimensions(1200, 640, 300), Some((300, 160)));
        assert_eq!(target_dimensions(1000, 333, 100), Some((100, 33)));
    }

    #[test]
    fn test_portrait_clamps_height() {
        assert_eq!(target_dimensions(640, 1200, 300), Some((160, 300)));
    }

    #[test]
    fn test_square_tie_resolves_to_height() {
        assert_eq!(target_dimensions(600, 600, 300), Some((300, 300)));
        // Tie on the long edge still uses the height branch
        assert_eq!(target_dimensions(901, 901, 300), Some((300, 300)));
    }

    #[test]
    fn test_truncates_rather_than_rounds() {
        // 799 * 300 / 1000 = 239.7
        assert_eq!(target_dimensions(1000, 799, 300), Some((300, 239)));
    }

    #[test]
    fn test_extreme_aspect_can_truncate_to_zero() {
        assert_eq!(target_dimensions(10_000, 1, 300), Some((300, 0)));
    }

    #[test]
    fn test_large_dimensions_do_not_overflow() {
        assert_eq!(target_dimensions(u32::MAX, u32::MAX - 1, 1000), Some((1000, 999)));
    }

    #[test]
    fn test_resized_output_is_within_bound_and_idempotent() {
        for (width, height) in [(1200, 640), (640, 1200), (5000, 4999), (301, 1), (12345, 678)] {
            let (tw, th) = target_dimensions(width, height, 300).unwrap();
            assert!(tw <= 300 && th <= 300, "{}x{} -> {}x{}", width, height, tw, th);
            assert_eq!(target_dimensions(tw, th, 300), None);
        }
    }

    #[test]
    fn test_result_constructors_keep_invariants() {
        let converted = ProcessedResult::converted("a.jpg".into(), (300, 160), 1000, 400);
        assert!(converted.processed());
        assert_eq!(converted.error(), None);

        let unchanged = ProcessedResult::unchanged("b.jpg".into(), (100, 100), 500);
        assert!(unchanged.is_noop());
        assert_eq!(unchanged.size_before, unchanged.size_after);

        let failed = ProcessedResult::failed("c.jpg".into(), (300, 0), 700, ErrorKind::Encode, "empty");
        assert!(!failed.processed());
        assert_eq!(failed.error(), Some(ErrorKind::Encode));
        assert_eq!(failed.size_after, 700);
        assert_eq!(failed.detail(), Some("empty"));
    }

    #[test]
    fn test_missing_source_reports_io_with_zero_size() {
        let result = resize_image(
            &crate::processing::ProcessingEngine::new(),
            Path::new("/definitely/not/here.jpg"),
            Path::new("/definitely/not/here.jpg"),
            300,
        );
        assert_eq!(result.error(), Some(ErrorKind::Io));
        assert_eq!((result.size_before, result.size_after), (0, 0));
    }
}
