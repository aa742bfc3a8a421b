//! treeshrink - Concurrent Batch Image Resizer
//!
//! Walks a directory tree breadth-first, and shrinks every image whose longer
//! edge exceeds a bound while preserving aspect ratio. Images are resized by
//! a pool of worker threads; a coordinator collects the results into a
//! [`RunReport`].
//!
//! # Features
//!
//! - **Longest-edge bound**: only images larger than the bound are touched
//! - **Parallel Processing**: fixed pool of workers fed from a shared queue
//! - **Metadata**: EXIF carried over, DPI clamped to an optional ceiling
//! - **Safe writes**: outputs replace their destination atomically
//! - **Cooperative shutdown**: Ctrl+C stops the run without tearing a write
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use treeshrink::{ConsoleProgress, Coordinator, ProcessingEngine, RunOptions};
//!
//! let options = RunOptions::new("photos", 1024).workers(4);
//! let engine = Arc::new(ProcessingEngine::with_dpi_ceiling(Some(150)));
//!
//! let report = Coordinator::new(options, engine).run(&mut ConsoleProgress::new())?;
//! println!("{} images converted", report.statistics.converted);
//! # Ok::<(), treeshrink::ResizerError>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod inventory;
pub mod parallel;
pub mod processing;
pub mod walker;

// Re-export commonly used types
pub use config::{Config, LoggingConfig, PipelineConfig, ResizeConfig, RunOptions};
pub use error::{ErrorKind, ResizerError, Result};
pub use inventory::{survey, Inventory};
pub use parallel::{
    ConsoleProgress, Coordinator, JsonProgress, MemorySink, NullSink, ProgressSink, RunReport, RunStatistics,
};
pub use processing::{ImageCodec, ProcessedResult, ProcessingEngine};
pub use walker::{count_images, ImageWalker};

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the global tracing subscriber at `level`.
///
/// `RUST_LOG` takes precedence when set. Returns `false` when a subscriber
/// was already installed, so calling this twice is harmless.
pub fn init(level: &str) -> bool {
    init_with_config(&LoggingConfig {
        level: level.to_string(),
        ..LoggingConfig::default()
    })
}

/// Initialize logging from configuration
pub fn init_with_config(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // Logs go to stderr so JSON progress on stdout stays parseable
    let installed = if config.json_format {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };

    if installed {
        info!("treeshrink v{} initialized", VERSION);
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_init() {
        // Should not fail on multiple calls
        let first = init("warn");
        let second = init("debug");
        assert!(!(first && second));
        assert!(!init_with_config(&LoggingConfig::default()));
    }
}
