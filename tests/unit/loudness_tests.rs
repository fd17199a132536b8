/*!
 * Tests for the loudness strategy chain
 */

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use loudsub::loudness::{
    LoudnessProbe, MeasureSpan, PeakWaveform, SENTINEL_DB, StrategyKind, WaveformIndexSource,
};
use crate::common::mock_analysis::{MockResponse, MockToolClient};

const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

fn media() -> &'static Path {
    Path::new("/media/episode.mkv")
}

/// Peaks at a tenth of full scale, about -20 dB
fn tenth_scale_waveform() -> Arc<dyn WaveformIndexSource> {
    Arc::new(PeakWaveform::new(100, vec![3277; 10_000]))
}

#[tokio::test]
async fn test_standardChain_withWaveformLevel_shouldNeverCallTool() {
    let client = MockToolClient::new()
        .with_astats(MockResponse::ok("RMS level dB: -5.0"))
        .shared();
    let probe = LoudnessProbe::standard(Some(tenth_scale_waveform()), client.clone(), TOOL_TIMEOUT);

    let m = probe.measure(media(), 0, MeasureSpan::from_millis(2_000, 4_000)).await;

    assert_eq!(m.strategy, StrategyKind::WaveformIndex);
    assert!((m.decibels + 20.0).abs() < 0.01, "got {}", m.decibels);
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_standardChain_withoutWaveform_shouldUseAstats() {
    let client = MockToolClient::new()
        .with_astats(MockResponse::ok("[Parsed_astats_0] RMS level dB: -31.25\n"))
        .shared();
    let probe = LoudnessProbe::standard(None, client.clone(), TOOL_TIMEOUT);

    let m = probe.measure(media(), 2, MeasureSpan::from_millis(2_000, 4_000)).await;

    assert_eq!(m.entry_index, 2);
    assert_eq!(m.decibels, -31.25);
    assert_eq!(m.strategy, StrategyKind::SpectralStats);
    assert_eq!(client.filters(), vec!["astats"]);
}

#[tokio::test]
async fn test_standardChain_withSilentAstats_shouldFallBackToLoudnorm() {
    let client = MockToolClient::new()
        .with_astats(MockResponse::ok("RMS level dB: -inf\nPeak level dB: -inf\n"))
        .with_loudnorm(MockResponse::ok(r#"{ "input_i" : "-27.61", "input_tp" : "-4.47" }"#))
        .shared();
    let probe = LoudnessProbe::standard(None, client.clone(), TOOL_TIMEOUT);

    let m = probe.measure(media(), 0, MeasureSpan::from_millis(0, 1_000)).await;

    assert_eq!(m.decibels, -27.61);
    assert_eq!(m.strategy, StrategyKind::SpectralNormalize);
    assert_eq!(client.filters(), vec!["astats", "loudnorm=print_format=json"]);
}

#[tokio::test]
async fn test_standardChain_withFailingTool_shouldBeUnmeasurable() {
    let client = MockToolClient::new()
        .with_astats(MockResponse::exit(1))
        .with_loudnorm(MockResponse::timeout())
        .shared();
    let probe = LoudnessProbe::standard(None, client.clone(), TOOL_TIMEOUT);

    let m = probe.measure(media(), 0, MeasureSpan::from_millis(0, 1_000)).await;

    assert!(m.is_sentinel());
    assert_eq!(m.decibels, SENTINEL_DB);
    assert_eq!(m.strategy, StrategyKind::Unmeasurable);
    assert_eq!(client.calls().len(), 2);
}

#[tokio::test]
async fn test_standardChain_withUnavailableTool_shouldBeUnmeasurable() {
    let client = MockToolClient::unavailable().shared();
    let probe = LoudnessProbe::standard(None, client, TOOL_TIMEOUT);

    let m = probe.measure(media(), 0, MeasureSpan::from_millis(0, 1_000)).await;

    assert_eq!(m.strategy, StrategyKind::Unmeasurable);
}

#[tokio::test]
async fn test_standardChain_withPositiveLevel_shouldClampToCeiling() {
    let client = MockToolClient::new()
        .with_astats(MockResponse::ok("RMS level dB: 3.5"))
        .shared();
    let probe = LoudnessProbe::standard(None, client, TOOL_TIMEOUT);

    let m = probe.measure(media(), 0, MeasureSpan::from_millis(0, 1_000)).await;

    assert_eq!(m.decibels, 0.0);
}

#[tokio::test]
async fn test_standardChain_withShortSpan_shouldWidenToolArguments() {
    let client = MockToolClient::new()
        .with_astats(MockResponse::ok("RMS level dB: -12.0"))
        .shared();
    let probe = LoudnessProbe::standard(None, client.clone(), TOOL_TIMEOUT);

    probe.measure(media(), 0, MeasureSpan::from_millis(1_000, 1_050)).await;

    let args = &client.calls()[0];
    let ss = args.iter().position(|a| a == "-ss").unwrap();
    let t = args.iter().position(|a| a == "-t").unwrap();
    assert_eq!(args[ss + 1], "1.000");
    assert_eq!(args[t + 1], "0.100");
    assert!(args.contains(&"/media/episode.mkv".to_string()));
}

#[tokio::test]
async fn test_probe_withCustomMinSpan_shouldWidenFurther() {
    let client = MockToolClient::new()
        .with_astats(MockResponse::ok("RMS level dB: -12.0"))
        .shared();
    let probe = LoudnessProbe::standard(None, client.clone(), TOOL_TIMEOUT).with_min_span_ms(500);

    probe.measure(media(), 0, MeasureSpan::from_millis(1_000, 1_050)).await;

    let args = &client.calls()[0];
    let t = args.iter().position(|a| a == "-t").unwrap();
    assert_eq!(args[t + 1], "0.500");
}
