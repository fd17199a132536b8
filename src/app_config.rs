use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::default::Default;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    /// Filtering settings
    #[serde(default)]
    pub filter: FilterConfig,

    /// External analysis tool settings
    #[serde(default)]
    pub tool: ToolConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Threshold and orchestration settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FilterConfig {
    /// Entries quieter than this (strictly) are removed, in dB
    ///
    /// Unmeasurable spans report -60 dB, so a threshold at or below -60 keeps
    /// them.
    #[serde(default = "default_threshold_db")]
    pub threshold_db: f64,

    /// Entries measured concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on waiting for one batch, in seconds
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Spans shorter than this are widened before measuring, in ms
    #[serde(default = "default_min_span_ms")]
    pub min_span_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            threshold_db: default_threshold_db(),
            batch_size: default_batch_size(),
            batch_timeout_secs: default_batch_timeout_secs(),
            min_span_ms: default_min_span_ms(),
        }
    }
}

impl FilterConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

/// External analysis tool settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolConfig {
    /// Explicit path to the ffmpeg executable
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Directory a host-managed ffmpeg was unpacked into
    #[serde(default)]
    pub install_dir: Option<PathBuf>,

    /// Timeout for a single ffmpeg invocation, in seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            install_dir: None,
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_threshold_db() -> f64 {
    -45.0
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_timeout_secs() -> u64 {
    30
}

fn default_min_span_ms() -> u64 {
    100
}

fn default_tool_timeout_secs() -> u64 {
    20
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if !self.filter.threshold_db.is_finite() {
            return Err(anyhow!("threshold_db must be a finite number"));
        }

        if self.filter.batch_size == 0 {
            return Err(anyhow!("batch_size must be at least 1"));
        }

        if self.filter.batch_timeout_secs == 0 {
            return Err(anyhow!("batch_timeout_secs must be greater than 0"));
        }

        if self.tool.timeout_secs == 0 {
            return Err(anyhow!("tool timeout_secs must be greater than 0"));
        }

        if self.tool.timeout_secs > self.filter.batch_timeout_secs {
            warn!(
                "Tool timeout ({}s) exceeds batch timeout ({}s); slow spans will be cut off by the batch",
                self.tool.timeout_secs, self.filter.batch_timeout_secs
            );
        }

        Ok(())
    }

    /// Load a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;

        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load a JSON config file, writing the defaults there first if it is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::from_file(path);
        }

        warn!("Config file not found at '{}', creating default config.", path.display());
        let config = Config::default();
        config.save(path)?;
        Ok(config)
    }

    /// Write the config as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let config_json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;

        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write config to file: {}", path.display()))
    }
}
