/*!
 * Error types for the loudsub application.
 *
 * This module contains custom error types for different parts of the application,
 * using the thiserror crate for ergonomic error definitions.
 *
 * Measurement-path failures never show up here: they degrade to the silence
 * sentinel inside the loudness probe. Only setup-path failures (bad input,
 * unreachable analysis tool) are surfaced to callers.
 */

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during subtitle processing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubtitleError {
    /// A timestamp did not match `HH:MM:SS,mmm` / `HH:MM:SS.mmm`
    #[error("Invalid timestamp format: {0}")]
    Format(String),
}

/// Errors that can occur when locating or launching the external analysis tool
#[derive(Error, Debug)]
pub enum ToolError {
    /// The executable could not be found anywhere we looked
    #[error("Analysis tool '{name}' not found (searched: {searched})")]
    Unavailable {
        /// Executable name that was searched for
        name: String,
        /// Human readable list of the places that were checked
        searched: String,
    },

    /// The executable exists but the process could not be started
    #[error("Failed to launch {path}: {message}")]
    Launch {
        /// Path of the executable
        path: PathBuf,
        /// Underlying error message
        message: String,
    },

    /// Reading the process output failed
    #[error("I/O error while running analysis tool: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a filtering run before any measurement is dispatched
#[derive(Error, Debug)]
pub enum FilterError {
    /// A subtitle entry has a span that cannot be measured
    #[error("Invalid span for entry {index}: {start_ms} ms -> {end_ms} ms")]
    InvalidSpan {
        /// 1-based entry index
        index: usize,
        /// Start time in ms
        start_ms: u64,
        /// End time in ms
        end_ms: u64,
    },

    /// The track has no entries to measure
    #[error("Subtitle track has no entries")]
    NoEntries,

    /// The audio/video source does not exist
    #[error("Media file does not exist: {0}")]
    MissingMedia(PathBuf),

    /// The external analysis tool cannot be reached at all
    #[error("Analysis tool unavailable: {0}")]
    ToolUnavailable(#[from] ToolError),

    /// Invalid orchestration settings
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from subtitle processing
    #[error("Subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),

    /// Error from the external tool
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Error from a filtering run
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
