/*!
 * Loudness measurement for subtitle spans.
 *
 * A `LoudnessProbe` owns an ordered chain of strategies:
 * - `waveform`: peaks precomputed by the host, no process spawn
 * - `spectral`: ffmpeg `astats`, then ffmpeg `loudnorm`
 *
 * Each strategy either produces a level in dB or the silence sentinel
 * (`SENTINEL_DB`). The chain stops at the first non-sentinel value. All stored
 * values are clamped to `[-60, 0]`.
 */

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, trace};

use crate::ffmpeg::ToolClient;
use crate::timecode::TimeCode;

pub mod spectral;
pub mod waveform;

pub use spectral::{SpectralMode, SpectralStrategy};
pub use waveform::{PeakWaveform, WaveformIndexSource, WaveformStrategy};

/// Level reported for silent or unmeasurable audio
pub const SENTINEL_DB: f64 = -60.0;

/// Loudest level a measurement can report
pub const CEILING_DB: f64 = 0.0;

/// Spans shorter than this are widened before measuring
pub const MIN_MEASURE_SPAN_MS: u64 = 100;

/// Clamp a raw decibel value into `[-60, 0]`; NaN is treated as silence
pub fn clamp_db(raw: f64) -> f64 {
    if raw.is_nan() {
        return SENTINEL_DB;
    }
    raw.clamp(SENTINEL_DB, CEILING_DB)
}

/// Whether a clamped value is the sentinel
pub fn is_sentinel(db: f64) -> bool {
    db == SENTINEL_DB
}

/// Which strategy produced a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    WaveformIndex,
    SpectralStats,
    SpectralNormalize,
    Unmeasurable,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WaveformIndex => "waveform",
            Self::SpectralStats => "astats",
            Self::SpectralNormalize => "loudnorm",
            Self::Unmeasurable => "unmeasurable",
        };
        f.write_str(name)
    }
}

/// Loudness of one subtitle entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessMeasurement {
    /// 0-based position of the entry in the track
    pub entry_index: usize,
    /// Level in dB, always within `[-60, 0]`
    pub decibels: f64,
    /// Strategy that produced the value
    pub strategy: StrategyKind,
}

impl LoudnessMeasurement {
    /// Create a measurement, clamping the raw value
    pub fn new(entry_index: usize, raw_db: f64, strategy: StrategyKind) -> Self {
        Self {
            entry_index,
            decibels: clamp_db(raw_db),
            strategy,
        }
    }

    /// The sentinel measurement
    pub fn unmeasurable(entry_index: usize) -> Self {
        Self {
            entry_index,
            decibels: SENTINEL_DB,
            strategy: StrategyKind::Unmeasurable,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        is_sentinel(self.decibels)
    }
}

/// A time span to measure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureSpan {
    pub start: TimeCode,
    pub end: TimeCode,
}

impl MeasureSpan {
    pub fn new(start: TimeCode, end: TimeCode) -> Self {
        Self { start, end }
    }

    pub fn from_millis(start_ms: u64, end_ms: u64) -> Self {
        Self::new(TimeCode::from_millis(start_ms), TimeCode::from_millis(end_ms))
    }

    /// Extend the end so the span lasts at least `min_ms`
    pub fn widened(&self, min_ms: u64) -> Self {
        let min_end = self.start.saturating_add_ms(min_ms);
        Self {
            start: self.start,
            end: self.end.max(min_end),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end.as_millis().saturating_sub(self.start.as_millis())
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms() as f64 / 1000.0
    }
}

impl fmt::Display for MeasureSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.start, self.end)
    }
}

/// One way of estimating the loudness of a span
///
/// Implementations never fail: anything that goes wrong is reported as
/// `SENTINEL_DB`. The returned value may be unclamped.
#[async_trait]
pub trait LoudnessStrategy: Send + Sync + fmt::Debug {
    /// Tag recorded on measurements this strategy produces
    fn kind(&self) -> StrategyKind;

    /// Estimate the level of `span` in `media`, in dB
    async fn measure(&self, media: &Path, span: MeasureSpan) -> f64;
}

/// Ordered fallback chain of loudness strategies
#[derive(Debug, Clone)]
pub struct LoudnessProbe {
    strategies: Vec<Arc<dyn LoudnessStrategy>>,
    min_span_ms: u64,
}

impl LoudnessProbe {
    /// Create a probe from an explicit chain
    pub fn new(strategies: Vec<Arc<dyn LoudnessStrategy>>) -> Self {
        Self {
            strategies,
            min_span_ms: MIN_MEASURE_SPAN_MS,
        }
    }

    /// The standard chain: waveform peaks, then astats, then loudnorm
    pub fn standard(
        waveform: Option<Arc<dyn WaveformIndexSource>>,
        client: Arc<dyn ToolClient>,
        tool_timeout: Duration,
    ) -> Self {
        Self::new(vec![
            Arc::new(WaveformStrategy::new(waveform)),
            Arc::new(SpectralStrategy::new(SpectralMode::Stats, client.clone(), tool_timeout)),
            Arc::new(SpectralStrategy::new(SpectralMode::Normalize, client, tool_timeout)),
        ])
    }

    pub fn with_min_span_ms(mut self, min_span_ms: u64) -> Self {
        self.min_span_ms = min_span_ms;
        self
    }

    pub fn strategies(&self) -> &[Arc<dyn LoudnessStrategy>] {
        &self.strategies
    }

    /// Measure one entry's span, widening short spans first
    ///
    /// The caller's span is only copied; stored subtitle timing is untouched.
    pub async fn measure(&self, media: &Path, entry_index: usize, span: MeasureSpan) -> LoudnessMeasurement {
        let span = span.widened(self.min_span_ms);

        for strategy in &self.strategies {
            let raw = strategy.measure(media, span).await;
            let db = clamp_db(raw);
            trace!("Entry {} {} via {}: raw {:.2} dB", entry_index + 1, span, strategy.kind(), raw);

            if !is_sentinel(db) {
                debug!("Entry {}: {:.2} dB ({})", entry_index + 1, db, strategy.kind());
                return LoudnessMeasurement::new(entry_index, db, strategy.kind());
            }
        }

        debug!("Entry {}: unmeasurable, using {} dB", entry_index + 1, SENTINEL_DB);
        LoudnessMeasurement::unmeasurable(entry_index)
    }
}

/// Rough loudness category used by diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoudnessLevel {
    Silent,
    Quiet,
    Moderate,
    Loud,
}

impl LoudnessLevel {
    pub fn from_db(db: f64) -> Self {
        if db <= -50.0 {
            Self::Silent
        } else if db <= -30.0 {
            Self::Quiet
        } else if db <= -10.0 {
            Self::Moderate
        } else {
            Self::Loud
        }
    }
}

impl fmt::Display for LoudnessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Silent => "silent",
            Self::Quiet => "quiet",
            Self::Moderate => "moderate",
            Self::Loud => "loud",
        };
        f.write_str(name)
    }
}
