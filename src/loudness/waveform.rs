/*!
 * Loudness from a precomputed waveform peak index.
 *
 * Hosts that already render a waveform keep one peak magnitude per sample
 * slot. Averaging those peaks over a span is far cheaper than spawning an
 * analysis process, so this strategy runs first in the chain.
 */

use std::fmt::Debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::trace;
use serde::{Deserialize, Serialize};

use super::{LoudnessStrategy, MeasureSpan, SENTINEL_DB, StrategyKind, clamp_db};

/// Full-scale magnitude for 16-bit audio
pub const FULL_SCALE_16BIT: f64 = 32767.0;

/// Read access to a host-maintained peak index
pub trait WaveformIndexSource: Send + Sync + Debug {
    /// Peak slots per second
    fn sample_rate(&self) -> u32;

    /// Peak magnitude at slot `index`; sign is ignored
    fn peak_at(&self, index: usize) -> i32;

    /// Number of peak slots
    fn count(&self) -> usize;
}

/// In-memory peak index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeakWaveform {
    /// Peak slots per second
    pub sample_rate: u32,
    /// Peak magnitudes, one per slot
    pub peaks: Vec<i32>,
}

impl PeakWaveform {
    pub fn new(sample_rate: u32, peaks: Vec<i32>) -> Self {
        Self { sample_rate, peaks }
    }

    /// Load `{ "sample_rate": .., "peaks": [..] }` from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open waveform file: {}", path.display()))?;
        let waveform: PeakWaveform = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse waveform file: {}", path.display()))?;

        if waveform.sample_rate == 0 {
            return Err(anyhow!("Waveform file {} has a zero sample rate", path.display()));
        }
        Ok(waveform)
    }
}

impl WaveformIndexSource for PeakWaveform {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn peak_at(&self, index: usize) -> i32 {
        self.peaks.get(index).copied().unwrap_or(0)
    }

    fn count(&self) -> usize {
        self.peaks.len()
    }
}

/// Average peak level of `span`, in dB, or the sentinel
///
/// Slot indices are clamped to `[0, count - 1]` and the average runs over the
/// inclusive range. A range that collapses to a single slot or less yields the
/// sentinel.
pub fn waveform_level(source: &dyn WaveformIndexSource, span: MeasureSpan) -> f64 {
    let count = source.count();
    let rate = source.sample_rate() as f64;
    if count == 0 || rate <= 0.0 {
        return SENTINEL_DB;
    }

    let last = count - 1;
    let to_slot = |secs: f64| -> usize { ((secs * rate) as usize).min(last) };

    let start_idx = to_slot(span.start.as_secs_f64());
    let end_idx = to_slot(span.end.as_secs_f64()).max(start_idx);
    if start_idx >= end_idx {
        trace!("Waveform range {}..={} is empty for {}", start_idx, end_idx, span);
        return SENTINEL_DB;
    }

    let total: f64 = (start_idx..=end_idx)
        .map(|i| (source.peak_at(i) as f64).abs())
        .sum();
    let average = total / (end_idx - start_idx + 1) as f64;

    let normalized = average / FULL_SCALE_16BIT;
    if normalized <= 0.0 {
        return SENTINEL_DB;
    }

    clamp_db(20.0 * normalized.log10())
}

/// Strategy backed by an optional waveform source
#[derive(Debug, Clone, Default)]
pub struct WaveformStrategy {
    source: Option<Arc<dyn WaveformIndexSource>>,
}

impl WaveformStrategy {
    pub fn new(source: Option<Arc<dyn WaveformIndexSource>>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl LoudnessStrategy for WaveformStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WaveformIndex
    }

    async fn measure(&self, _media: &Path, span: MeasureSpan) -> f64 {
        match &self.source {
            Some(source) => waveform_level(source.as_ref(), span),
            None => SENTINEL_DB,
        }
    }
}
