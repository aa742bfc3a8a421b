//! Error types and handling for treeshrink

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for treeshrink operations
pub type Result<T> = std::result::Result<T, ResizerError>;

/// Main error type for treeshrink operations
#[derive(Debug, Error)]
pub enum ResizerError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Image decoding, encoding or parameter errors raised by the codec
    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),

    /// Embedded metadata (EXIF, density) could not be read or written back
    #[error("Metadata error: {message}")]
    MetadataError { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Invalid resize parameters
    #[error("Invalid resize parameters: {message}")]
    InvalidParameters { message: String },

    /// A work item could not be re-rooted under the destination root
    #[error("Path {path:?} is not inside source root {root:?}")]
    PathIntegrity { path: PathBuf, root: PathBuf },

    /// The worker pool could not be started or torn down
    #[error("Worker pool error: {message}")]
    PoolError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerdeError(String),
}

/// Per-item failure classes reported back to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The codec rejected the requested parameters or output mode
    Encode,
    /// Source unreadable or destination unwritable
    Io,
    /// Destination path could not be derived from the source path
    PathIntegrity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Encode => "EncodeError",
            Self::Io => "IOError",
            Self::PathIntegrity => "PathIntegrityFault",
        };
        f.write_str(name)
    }
}

impl ResizerError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new metadata error
    pub fn metadata<S: Into<String>>(message: S) -> Self {
        Self::MetadataError {
            message: message.into(),
        }
    }

    /// Create a new invalid parameters error
    pub fn invalid_parameters<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    /// Create a new path integrity error
    pub fn path_integrity(path: PathBuf, root: PathBuf) -> Self {
        Self::PathIntegrity { path, root }
    }

    /// Create a new worker pool error
    pub fn pool<S: Into<String>>(message: S) -> Self {
        Self::PoolError {
            message: message.into(),
        }
    }

    /// Classify this error as a per-item failure.
    ///
    /// Returns `None` for errors that are not tied to a single image
    /// (configuration, pool start-up, serialization).
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::IoError(_) => Some(ErrorKind::Io),
            Self::ImageError(err) => Some(match err {
                image::ImageError::Parameter(_)
                | image::ImageError::Unsupported(_)
                | image::ImageError::Encoding(_)
                | image::ImageError::Limits(_) => ErrorKind::Encode,
                // A file that probed fine but no longer decodes counts as unreadable
                image::ImageError::Decoding(_) | image::ImageError::IoError(_) => ErrorKind::Io,
            }),
            Self::MetadataError { .. } | Self::InvalidParameters { .. } => Some(ErrorKind::Encode),
            Self::PathIntegrity { .. } => Some(ErrorKind::PathIntegrity),
            Self::ConfigError { .. } | Self::PoolError { .. } | Self::SerdeError(_) => None,
        }
    }
}

impl From<toml::de::Error> for ResizerError {
    fn from(err: toml::de::Error) -> Self {
        Self::SerdeError(format!("TOML parsing error: {}", err))
    }
}

impl From<serde_yaml::Error> for ResizerError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SerdeError(format!("YAML parsing error: {}", err))
    }
}
