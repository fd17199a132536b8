/*!
 * Loudness from ffmpeg audio filters.
 *
 * Two modes share the same invocation shape and differ only in the audio
 * filter and in how stderr is read back:
 * - `Stats`: `astats`, reads `RMS level dB`, falls back to `Peak level dB`
 * - `Normalize`: `loudnorm=print_format=json`, reads `input_i`, falls back to `input_tp`
 */

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{LoudnessStrategy, MeasureSpan, SENTINEL_DB, StrategyKind};
use crate::ffmpeg::ToolClient;

static RMS_LEVEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"RMS level dB:\s*(-?inf|[-\d.]+)").unwrap()
});

static PEAK_LEVEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Peak level dB:\s*(-?inf|[-\d.]+)").unwrap()
});

static INPUT_I_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""input_i"\s*:\s*"([^"]+)""#).unwrap()
});

static INPUT_TP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""input_tp"\s*:\s*"([^"]+)""#).unwrap()
});

/// Which ffmpeg audio filter to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralMode {
    /// Per-channel amplitude statistics
    Stats,
    /// Loudness normalization report
    Normalize,
}

impl SpectralMode {
    /// Value passed to `-af`
    pub fn filter_arg(&self) -> &'static str {
        match self {
            Self::Stats => "astats",
            Self::Normalize => "loudnorm=print_format=json",
        }
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        match self {
            Self::Stats => StrategyKind::SpectralStats,
            Self::Normalize => StrategyKind::SpectralNormalize,
        }
    }

    /// Extract a level from the tool's stderr
    pub fn parse_output(&self, stderr: &str) -> Option<f64> {
        match self {
            Self::Stats => parse_astats_output(stderr),
            Self::Normalize => parse_loudnorm_output(stderr),
        }
    }
}

/// Build the argument list for one segment
///
/// Seeks before the input so only the segment is decoded, and discards the
/// output; the measurement is printed on stderr.
pub fn build_args(media: &Path, span: MeasureSpan, mode: SpectralMode) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-ss".to_string(),
        format!("{:.3}", span.start.as_secs_f64()),
        "-i".to_string(),
        media.to_string_lossy().to_string(),
        "-t".to_string(),
        format!("{:.3}", span.duration_secs()),
        "-af".to_string(),
        mode.filter_arg().to_string(),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]
}

fn first_token<'a>(regex: &Regex, text: &'a str) -> Option<&'a str> {
    let caps = regex.captures(text)?;
    Some(caps.get(1)?.as_str().trim())
}

fn is_infinite(token: Option<&str>) -> bool {
    token.is_some_and(|t| t.ends_with("inf"))
}

fn finite_level(token: Option<&str>) -> Option<f64> {
    token.filter(|t| !t.ends_with("inf"))?.parse::<f64>().ok()
}

/// Finite level from the primary field, then the fallback field
///
/// An infinite primary defers to the fallback; the sentinel is returned only
/// when neither yields a number and at least one of them read `-inf`.
fn level_with_fallback(primary: &Regex, fallback: &Regex, text: &str) -> Option<f64> {
    let primary = first_token(primary, text);
    let fallback = first_token(fallback, text);

    finite_level(primary).or_else(|| finite_level(fallback)).or_else(|| {
        if is_infinite(primary) || is_infinite(fallback) {
            Some(SENTINEL_DB)
        } else {
            None
        }
    })
}

/// Level from `astats` output: RMS, or peak when RMS is missing or infinite
pub fn parse_astats_output(stderr: &str) -> Option<f64> {
    level_with_fallback(&RMS_LEVEL_REGEX, &PEAK_LEVEL_REGEX, stderr)
}

/// Level from `loudnorm` JSON output: integrated loudness, or true peak
pub fn parse_loudnorm_output(stderr: &str) -> Option<f64> {
    level_with_fallback(&INPUT_I_REGEX, &INPUT_TP_REGEX, stderr)
}

/// Strategy that runs one ffmpeg filter per span
#[derive(Debug, Clone)]
pub struct SpectralStrategy {
    mode: SpectralMode,
    client: Arc<dyn ToolClient>,
    timeout: Duration,
}

impl SpectralStrategy {
    pub fn new(mode: SpectralMode, client: Arc<dyn ToolClient>, timeout: Duration) -> Self {
        Self { mode, client, timeout }
    }

    pub fn mode(&self) -> SpectralMode {
        self.mode
    }
}

#[async_trait]
impl LoudnessStrategy for SpectralStrategy {
    fn kind(&self) -> StrategyKind {
        self.mode.strategy_kind()
    }

    async fn measure(&self, media: &Path, span: MeasureSpan) -> f64 {
        let args = build_args(media, span, self.mode);

        let output = match self.client.run(&args, self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                warn!("{} failed for {}: {}", self.mode.filter_arg(), span, e);
                return SENTINEL_DB;
            }
        };

        if output.timed_out {
            warn!("{} timed out after {:?} for {}", self.mode.filter_arg(), self.timeout, span);
            return SENTINEL_DB;
        }

        if !output.succeeded() {
            debug!(
                "{} exited with {:?} for {}",
                self.mode.filter_arg(), output.exit_code, span
            );
            return SENTINEL_DB;
        }

        match self.mode.parse_output(&output.stderr) {
            Some(db) => db,
            None => {
                debug!("No level found in {} output for {}", self.mode.filter_arg(), span);
                SENTINEL_DB
            }
        }
    }
}
