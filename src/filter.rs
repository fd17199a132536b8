/*!
 * End-to-end loudness filtering of a subtitle track.
 *
 * `LoudnessFilter` validates the inputs, builds the measurement chain,
 * runs the batch orchestrator and re-serializes what survives the cut.
 * Setup problems are returned as `FilterError` before any measurement is
 * dispatched; everything after that degrades to the silence sentinel.
 */

use std::path::Path;
use std::sync::Arc;
use log::{debug, error, info};

use crate::app_config::Config;
use crate::batch::{BatchOrchestrator, ProgressEvent, RunControl, RunState};
use crate::errors::FilterError;
use crate::ffmpeg::{FfmpegClient, ToolClient, ToolLocator};
use crate::loudness::{
    LoudnessLevel, LoudnessMeasurement, LoudnessProbe, LoudnessStrategy, MeasureSpan,
    WaveformIndexSource,
};
use crate::subtitle_processor::{SubtitleEntry, SubtitleTrack};

/// Spans measured by a quick diagnostic when none are given
pub const DEFAULT_SAMPLE_SPANS_MS: [(u64, u64); 3] = [(0, 2_000), (10_000, 12_000), (20_000, 22_000)];

/// Result of a filtering run
#[derive(Debug, Clone, PartialEq)]
pub struct FilterReport {
    /// Filtered track as SRT text, renumbered 1..N
    pub output: String,
    pub state: RunState,
    /// Entries in the parsed input
    pub total: usize,
    /// 0-based positions of the removed entries
    pub removed: Vec<usize>,
    /// Applied measurements, ascending by entry
    pub measurements: Vec<LoudnessMeasurement>,
    /// Text blocks dropped by the parser
    pub skipped_blocks: usize,
    /// Timing lines read as zero by the parser
    pub zeroed_timings: usize,
}

impl FilterReport {
    /// The whole track was measured and every entry was loud enough
    pub fn nothing_to_remove(&self) -> bool {
        self.state == RunState::Completed && self.removed.is_empty()
    }

    pub fn kept(&self) -> usize {
        self.total - self.removed.len()
    }
}

/// One diagnostic measurement
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSample {
    pub span: MeasureSpan,
    pub measurement: LoudnessMeasurement,
    pub level: LoudnessLevel,
}

/// Removes subtitle entries whose audio is quieter than a threshold
#[derive(Debug, Clone)]
pub struct LoudnessFilter {
    config: Config,
    waveform: Option<Arc<dyn WaveformIndexSource>>,
    tool_client: Option<Arc<dyn ToolClient>>,
    strategies: Option<Vec<Arc<dyn LoudnessStrategy>>>,
}

impl LoudnessFilter {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            waveform: None,
            tool_client: None,
            strategies: None,
        }
    }

    /// Use a host-provided peak index as the first strategy
    pub fn with_waveform(mut self, source: Arc<dyn WaveformIndexSource>) -> Self {
        self.waveform = Some(source);
        self
    }

    /// Use this client instead of resolving ffmpeg
    pub fn with_tool_client(mut self, client: Arc<dyn ToolClient>) -> Self {
        self.tool_client = Some(client);
        self
    }

    /// Replace the whole measurement chain
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn LoudnessStrategy>>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Filter raw subtitle text against the audio of `media`
    ///
    /// `on_progress` receives one event per measured entry, in track order.
    /// A cancelled run still returns `Ok`: entries measured before the cancel
    /// are filtered, the rest are kept as they were.
    pub async fn filter<F>(
        &self,
        raw: &str,
        media: &Path,
        control: &RunControl,
        on_progress: F,
    ) -> Result<FilterReport, FilterError>
    where
        F: FnMut(&ProgressEvent),
    {
        self.config
            .validate()
            .map_err(|e| FilterError::Config(e.to_string()))?;

        let parsed = SubtitleTrack::parse(raw);
        let track = SubtitleTrack::new(parsed.entries);
        if parsed.skipped_blocks > 0 {
            info!("Ignored {} text block(s) outside any entry", parsed.skipped_blocks);
        }

        let probe = self.prepare(&track.entries, media)?;
        let orchestrator = BatchOrchestrator::new(Arc::new(probe), media, self.config.filter.threshold_db)
            .with_batch_size(self.config.filter.batch_size)?
            .with_batch_timeout(self.config.filter.batch_timeout());

        let outcome = orchestrator.run(&track.entries, control, on_progress).await;

        let kept = track.retain_indices(&outcome.removed);
        info!(
            "Kept {} of {} entries ({:?})",
            kept.len(), track.len(), outcome.state
        );

        Ok(FilterReport {
            output: SubtitleTrack::format(&kept),
            state: outcome.state,
            total: outcome.total,
            removed: outcome.removed,
            measurements: outcome.measurements,
            skipped_blocks: parsed.skipped_blocks,
            zeroed_timings: parsed.zeroed_timings,
        })
    }

    /// Check the inputs and build the probe; nothing is measured here
    pub fn validate(&self, entries: &[SubtitleEntry], media: &Path) -> Result<(), FilterError> {
        self.prepare(entries, media).map(|_| ())
    }

    /// Measure a few spans and classify each
    ///
    /// With no spans, measures the first, eleventh and twenty-first two
    /// seconds of the media.
    pub async fn sample_levels(&self, media: &Path, spans: &[MeasureSpan]) -> Result<Vec<LevelSample>, FilterError> {
        Self::check_media(media)?;
        let probe = self.build_probe()?;

        let spans: Vec<MeasureSpan> = if spans.is_empty() {
            DEFAULT_SAMPLE_SPANS_MS
                .iter()
                .map(|(start, end)| MeasureSpan::from_millis(*start, *end))
                .collect()
        } else {
            spans.to_vec()
        };

        let mut samples = Vec::with_capacity(spans.len());
        for (i, span) in spans.into_iter().enumerate() {
            let measurement = probe.measure(media, i, span).await;
            let level = LoudnessLevel::from_db(measurement.decibels);
            debug!("Sample {}: {:.2} dB ({})", span, measurement.decibels, level);
            samples.push(LevelSample { span, measurement, level });
        }
        Ok(samples)
    }

    fn prepare(&self, entries: &[SubtitleEntry], media: &Path) -> Result<LoudnessProbe, FilterError> {
        Self::check_media(media)?;

        if entries.is_empty() {
            error!("No subtitle entries to measure");
            return Err(FilterError::NoEntries);
        }

        if let Some((i, entry)) = entries.iter().enumerate().find(|(_, e)| !e.has_valid_span()) {
            error!("Entry {} has an empty or inverted span", i + 1);
            return Err(FilterError::InvalidSpan {
                index: i + 1,
                start_ms: entry.start_ms(),
                end_ms: entry.end_ms(),
            });
        }

        self.build_probe()
    }

    fn check_media(media: &Path) -> Result<(), FilterError> {
        if !media.exists() {
            error!("Media file not found: {}", media.display());
            return Err(FilterError::MissingMedia(media.to_path_buf()));
        }
        Ok(())
    }

    fn build_probe(&self) -> Result<LoudnessProbe, FilterError> {
        let min_span_ms = self.config.filter.min_span_ms;

        if let Some(strategies) = &self.strategies {
            return Ok(LoudnessProbe::new(strategies.clone()).with_min_span_ms(min_span_ms));
        }

        let client: Arc<dyn ToolClient> = match &self.tool_client {
            Some(client) => client.clone(),
            None => {
                let locator = ToolLocator::from_config(&self.config.tool);
                let client = FfmpegClient::locate(&locator).map_err(|e| {
                    error!("{}", e);
                    FilterError::ToolUnavailable(e)
                })?;
                info!("Using {}", client.executable().display());
                Arc::new(client)
            }
        };

        Ok(LoudnessProbe::standard(self.waveform.clone(), client, self.config.tool.timeout())
            .with_min_span_ms(min_span_ms))
    }
}
