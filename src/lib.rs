/*!
 * # loudsub - loudness-driven subtitle filtering
 *
 * Measures the loudness of the audio under each subtitle line and removes the
 * lines whose audio is quieter than a threshold, e.g. subtitles sitting over
 * silence or room noise with no real speech.
 *
 * ## Features
 *
 * - Lossless SRT parsing and formatting
 * - Three ranked loudness strategies with deterministic fallback:
 *   - precomputed waveform peaks
 *   - ffmpeg `astats`
 *   - ffmpeg `loudnorm`
 * - Concurrent batch measurement with pause, resume and cancel
 * - Results applied in track order regardless of completion order
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `timecode`: millisecond timestamps
 * - `subtitle_processor`: subtitle track parsing and formatting
 * - `loudness`: measurement strategies and the fallback chain:
 *   - `loudness::waveform`: peak-index strategy
 *   - `loudness::spectral`: ffmpeg filter strategies
 * - `ffmpeg`: analysis tool discovery and invocation
 * - `batch`: concurrent batch orchestration
 * - `filter`: the end-to-end filtering operation
 * - `app_config`: Configuration management
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod batch;
pub mod errors;
pub mod ffmpeg;
pub mod filter;
pub mod loudness;
pub mod subtitle_processor;
pub mod timecode;

// Re-export main types for easier usage
pub use app_config::Config;
pub use batch::{BatchOrchestrator, ProgressEvent, RunControl, RunOutcome, RunState};
pub use errors::{AppError, FilterError, SubtitleError, ToolError};
pub use filter::{FilterReport, LoudnessFilter};
pub use loudness::{LoudnessMeasurement, LoudnessProbe, SENTINEL_DB};
pub use subtitle_processor::{SubtitleEntry, SubtitleTrack};
pub use timecode::TimeCode;
