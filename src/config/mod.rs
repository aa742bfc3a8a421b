//! Configuration management for treeshrink

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ResizerError};

/// JPEG quality used for every re-encode
pub const ENCODE_QUALITY: u8 = 75;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// What to resize and how
    pub resize: ResizeConfig,

    /// Worker pool and coordinator timing
    pub pipeline: PipelineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Resize bound and metadata handling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    /// Longest-edge bound in pixels (required before a run)
    pub max_size: Option<u32>,

    /// Embedded DPI above this value is clamped down to it
    pub dpi_ceiling: Option<u32>,
}

impl ResizeConfig {
    /// Create an empty resize configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the longest-edge bound
    pub fn max_size(mut self, max_size: u32) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Set the DPI ceiling
    pub fn dpi_ceiling(mut self, dpi: u32) -> Self {
        self.dpi_ceiling = Some(dpi);
        self
    }
}

/// Worker pool and coordinator timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of workers (None = half the logical CPUs, at least one)
    pub workers: Option<usize>,

    /// How long a worker waits on the work queue before re-checking shutdown
    pub poll_interval_ms: u64,

    /// How long the coordinator waits for a result before treating the run as stalled
    pub drain_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            poll_interval_ms: 3_000,
            drain_timeout_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    /// Worker count to start, resolving the automatic default
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_worker_count)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Half of the logical CPUs, never less than one
pub fn default_worker_count() -> usize {
    (num_cpus::get() / 2).max(1)
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit log lines as JSON
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ResizerError::config(format!(
                "Failed to read config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        match config_extension(path.as_ref()).as_str() {
            "toml" => toml::from_str(&content).map_err(Into::into),
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(Into::into),
            _ => Err(ResizerError::config(
                "Unsupported config file format. Use .toml or .yaml",
            )),
        }
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = match config_extension(path.as_ref()).as_str() {
            "toml" => toml::to_string_pretty(self)
                .map_err(|e| ResizerError::config(format!("TOML serialization failed: {}", e)))?,
            "yaml" | "yml" => serde_yaml::to_string(self)?,
            _ => {
                return Err(ResizerError::config(
                    "Unsupported config file format. Use .toml or .yaml",
                ))
            }
        };

        std::fs::write(&path, content).map_err(|e| {
            ResizerError::config(format!(
                "Failed to write config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        Ok(())
    }

    /// Validate configuration for a resize run
    pub fn validate(&self) -> Result<()> {
        match self.resize.max_size {
            None => return Err(ResizerError::config("max_size is required")),
            Some(0) => return Err(ResizerError::config("max_size must be greater than 0")),
            Some(_) => {}
        }

        if self.resize.dpi_ceiling == Some(0) {
            return Err(ResizerError::config("dpi_ceiling must be greater than 0"));
        }

        if self.pipeline.workers == Some(0) {
            return Err(ResizerError::config("Worker count must be greater than 0"));
        }

        if self.pipeline.poll_interval_ms == 0 || self.pipeline.drain_timeout_ms == 0 {
            return Err(ResizerError::config(
                "poll_interval_ms and drain_timeout_ms must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Merge with another configuration (set values in `other` take precedence)
    pub fn merge(mut self, other: Config) -> Self {
        if other.resize.max_size.is_some() {
            self.resize.max_size = other.resize.max_size;
        }
        if other.resize.dpi_ceiling.is_some() {
            self.resize.dpi_ceiling = other.resize.dpi_ceiling;
        }
        if other.pipeline.workers.is_some() {
            self.pipeline.workers = other.pipeline.workers;
        }
        self
    }
}

/// Source and destination roots plus everything a run needs
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub max_size: u32,
    pub workers: usize,
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
}

impl RunOptions {
    /// In-place run over `source_root` with default pipeline timing
    pub fn new<P: Into<PathBuf>>(source_root: P, max_size: u32) -> Self {
        let source_root = source_root.into();
        let pipeline = PipelineConfig::default();
        Self {
            destination_root: source_root.clone(),
            source_root,
            max_size,
            workers: pipeline.worker_count(),
            poll_interval: pipeline.poll_interval(),
            drain_timeout: pipeline.drain_timeout(),
        }
    }

    /// Build run options from a validated configuration
    pub fn from_config(config: &Config, source_root: PathBuf, destination_root: Option<PathBuf>) -> Result<Self> {
        config.validate()?;
        let max_size = config
            .resize
            .max_size
            .ok_or_else(|| ResizerError::config("max_size is required"))?;

        Ok(Self {
            destination_root: destination_root.unwrap_or_else(|| source_root.clone()),
            source_root,
            max_size,
            workers: config.pipeline.worker_count(),
            poll_interval: config.pipeline.poll_interval(),
            drain_timeout: config.pipeline.drain_timeout(),
        })
    }

    pub fn destination<P: Into<PathBuf>>(mut self, destination_root: P) -> Self {
        self.destination_root = destination_root.into();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Whether converted images overwrite their sources
    pub fn in_place(&self) -> bool {
        self.source_root == self.destination_root
    }
}

fn config_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}
