// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, anyhow};
use log::{warn, info, debug, LevelFilter, Log, Metadata, Record, Level, SetLoggerError};
use std::path::{Path, PathBuf};
use std::io::Write;
use std::sync::Arc;
use clap::{Parser, ValueEnum, CommandFactory, Subcommand};
use clap_complete::{generate, Shell};
use indicatif::{ProgressBar, ProgressStyle};

use loudsub::app_config::{self, Config};
use loudsub::batch::RunControl;
use loudsub::errors::AppError;
use loudsub::ffmpeg::{FfmpegClient, ToolLocator};
use loudsub::filter::LoudnessFilter;
use loudsub::loudness::{MeasureSpan, PeakWaveform};
use loudsub::subtitle_processor::SubtitleTrack;
use loudsub::timecode::TimeCode;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Remove subtitle lines spoken over quiet audio (default command)
    Filter(FilterArgs),

    /// Measure a few spans of a media file and classify their loudness
    Probe(ProbeArgs),

    /// Check that ffmpeg can be found and started
    Check {
        /// Configuration file path
        #[arg(short, long, default_value = "conf.json")]
        config_path: String,
    },

    /// Generate shell completions for loudsub
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct FilterArgs {
    /// Input subtitle file (SRT)
    #[arg(value_name = "SUBTITLE_PATH")]
    input_path: PathBuf,

    /// Audio or video file the subtitles belong to
    #[arg(short, long)]
    media: PathBuf,

    /// Remove entries strictly quieter than this, in dB
    #[arg(short, long, allow_negative_numbers = true)]
    threshold: Option<f64>,

    /// Entries measured concurrently
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Precomputed waveform peaks (JSON: {"sample_rate": .., "peaks": [..]})
    #[arg(short, long)]
    waveform: Option<PathBuf>,

    /// Output file (default: <input>.filtered.srt)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report what would be removed without writing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Force overwrite of existing output files
    #[arg(short, long)]
    force_overwrite: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Audio or video file to sample
    #[arg(value_name = "MEDIA_PATH")]
    media: PathBuf,

    /// Span to measure, `start-end` in seconds or HH:MM:SS,mmm (repeatable)
    #[arg(short, long = "span", value_parser = parse_span)]
    spans: Vec<MeasureSpan>,

    /// Precomputed waveform peaks
    #[arg(short, long)]
    waveform: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

/// loudsub - drop subtitle lines that sit over silence
///
/// Measures the loudness of the audio under every subtitle line and removes
/// the lines whose audio is quieter than a threshold.
#[derive(Parser, Debug)]
#[command(name = "loudsub")]
#[command(version)]
#[command(about = "Remove subtitle lines spoken over quiet audio")]
#[command(args_conflicts_with_subcommands = true)]
#[command(long_about = "loudsub measures the audio under each subtitle line with ffmpeg and removes lines quieter than a threshold.

EXAMPLES:
    loudsub movie.srt -m movie.mkv                   # Filter with the default threshold (-45 dB)
    loudsub movie.srt -m movie.mkv -t -35            # Stricter threshold
    loudsub movie.srt -m movie.mkv -n                # Dry run: only report
    loudsub movie.srt -m movie.mkv -w peaks.json     # Use precomputed waveform peaks first
    loudsub probe movie.mkv                          # Sample 0-2s, 10-12s and 20-22s
    loudsub probe movie.mkv -s 61-63.5               # Sample a specific span
    loudsub check                                    # Locate ffmpeg and print its version
    loudsub completions bash > loudsub.bash          # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input subtitle file (SRT)
    #[arg(value_name = "SUBTITLE_PATH")]
    input_path: Option<PathBuf>,

    /// Audio or video file the subtitles belong to
    #[arg(short, long)]
    media: Option<PathBuf>,

    /// Remove entries strictly quieter than this, in dB
    #[arg(short, long, allow_negative_numbers = true)]
    threshold: Option<f64>,

    /// Entries measured concurrently
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Precomputed waveform peaks (JSON: {"sample_rate": .., "peaks": [..]})
    #[arg(short, long)]
    waveform: Option<PathBuf>,

    /// Output file (default: <input>.filtered.srt)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report what would be removed without writing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Force overwrite of existing output files
    #[arg(short, long)]
    force_overwrite: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color and emoji for log level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("1;31", "❌ "),
            Level::Warn => ("1;33", "🚧 "),
            Level::Info => ("1;32", " "),
            Level::Debug => ("1;36", "🔍 "),
            Level::Trace => ("1;35", "📋 "),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (color, emoji) = Self::style_for_level(record.level());

            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "\x1B[{}m{} {} {}\x1B[0m",
                color, now, emoji, record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Start at trace so the level can still be raised after the config is read;
    // the effective level is set through log::set_max_level below
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    let result = match cli.command {
        Some(Commands::Completions { shell }) => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "loudsub", &mut std::io::stdout());
            return Ok(());
        }
        Some(Commands::Filter(args)) => run_filter(args).await,
        Some(Commands::Probe(args)) => run_probe(args).await,
        Some(Commands::Check { config_path }) => run_check(&config_path).await,
        None => {
            // Default behavior: top-level args are the filter command
            let input_path = cli.input_path.ok_or_else(|| {
                anyhow!("SUBTITLE_PATH is required when no subcommand is specified")
            })?;
            let media = cli.media.ok_or_else(|| {
                anyhow!("--media is required when no subcommand is specified")
            })?;

            let filter_args = FilterArgs {
                input_path,
                media,
                threshold: cli.threshold,
                batch_size: cli.batch_size,
                waveform: cli.waveform,
                output: cli.output,
                dry_run: cli.dry_run,
                force_overwrite: cli.force_overwrite,
                config_path: cli.config_path,
                log_level: cli.log_level,
            };
            run_filter(filter_args).await
        }
    };

    result.map_err(anyhow::Error::from)
}

/// Load or create the configuration and apply the log level
fn load_config(config_path: &str, log_level: Option<CliLogLevel>) -> Result<Config> {
    let mut config = Config::load_or_create(config_path)?;

    if let Some(level) = log_level {
        config.log_level = level.into();
    }
    log::set_max_level(config.log_level.to_level_filter());

    Ok(config)
}

fn progress_bar(total: u64, unit: &str) -> ProgressBar {
    let progress_bar = ProgressBar::new(total);
    let template = format!(
        "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{percent}}%) {{msg}} {{eta}}",
        unit
    );
    let style = ProgressStyle::default_bar()
        .template(&template)
        .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress_bar.set_style(style.progress_chars("█▓▒░"));
    progress_bar
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "subtitles".to_string());
    input.with_file_name(format!("{}.filtered.srt", stem))
}

fn load_waveform(path: Option<&Path>, filter: LoudnessFilter) -> Result<LoudnessFilter> {
    match path {
        Some(path) => {
            let waveform = PeakWaveform::from_json_file(path)?;
            debug!("Loaded {} waveform peaks at {} Hz", waveform.peaks.len(), waveform.sample_rate);
            Ok(filter.with_waveform(Arc::new(waveform)))
        }
        None => Ok(filter),
    }
}

async fn run_filter(options: FilterArgs) -> Result<(), AppError> {
    let mut config = load_config(&options.config_path, options.log_level)?;

    // Override config with CLI options if provided
    if let Some(threshold) = options.threshold {
        config.filter.threshold_db = threshold;
    }
    if let Some(batch_size) = options.batch_size {
        config.filter.batch_size = batch_size;
    }
    config.validate()?;

    let output_path = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&options.input_path));

    if !options.dry_run && output_path.exists() && !options.force_overwrite {
        warn!("Output file already exists: {:?}. Use -f to force overwrite.", output_path);
        return Ok(());
    }

    let raw = std::fs::read_to_string(&options.input_path)
        .map_err(|e| AppError::File(format!("{}: {}", options.input_path.display(), e)))?;

    let filter = load_waveform(options.waveform.as_deref(), LoudnessFilter::new(&config))?;

    // Ctrl-C stops dispatching; entries measured so far are still filtered
    let control = RunControl::new();
    let cancel_on_signal = {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing the current batch…");
                control.cancel();
            }
        })
    };

    info!(
        "Filtering {:?} against {:?} (threshold {:.1} dB)",
        options.input_path, options.media, config.filter.threshold_db
    );

    let total = SubtitleTrack::parse(&raw).entries.len() as u64;
    let progress = progress_bar(total, "lines");
    let mut below = 0usize;

    let report = filter
        .filter(&raw, &options.media, &control, |event| {
            if event.remove {
                below += 1;
            }
            progress.set_position(event.completed as u64);
            progress.set_message(format!("{} below threshold", below));
        })
        .await;

    cancel_on_signal.abort();
    progress.finish_and_clear();
    let report = report?;

    if report.zeroed_timings > 0 {
        warn!("{} timing line(s) could not be read and were treated as 00:00:00,000", report.zeroed_timings);
    }

    if report.nothing_to_remove() {
        info!("Nothing to remove: all {} lines are above {:.1} dB", report.total, config.filter.threshold_db);
        return Ok(());
    }

    for measurement in report.measurements.iter().filter(|m| report.removed.contains(&m.entry_index)) {
        info!(
            "Line {} removed: {:.1} dB ({})",
            measurement.entry_index + 1, measurement.decibels, measurement.strategy
        );
    }

    if options.dry_run {
        info!(
            "Dry run: {} of {} lines would be removed ({:?})",
            report.removed.len(), report.total, report.state
        );
        return Ok(());
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&output_path, &report.output)?;

    info!(
        "Removed {} of {} lines ({:?}): {:?}",
        report.removed.len(), report.total, report.state, output_path
    );
    Ok(())
}

async fn run_probe(options: ProbeArgs) -> Result<(), AppError> {
    let config = load_config(&options.config_path, options.log_level)?;
    config.validate()?;

    let filter = load_waveform(options.waveform.as_deref(), LoudnessFilter::new(&config))?;
    let samples = filter.sample_levels(&options.media, &options.spans).await?;

    for sample in samples {
        info!(
            "{}: {:.1} dB, {} ({})",
            sample.span, sample.measurement.decibels, sample.level, sample.measurement.strategy
        );
    }
    Ok(())
}

async fn run_check(config_path: &str) -> Result<(), AppError> {
    let config = load_config(config_path, None)?;
    let locator = ToolLocator::from_config(&config.tool);

    let client = FfmpegClient::locate(&locator)?;
    let version = client.version().await?;

    info!("Found {}", client.executable().display());
    info!("{}", version);
    Ok(())
}

/// Parse `start-end`, each side either seconds or a timestamp
fn parse_span(text: &str) -> Result<MeasureSpan, String> {
    let (start, end) = text
        .split_once('-')
        .ok_or_else(|| format!("expected start-end, got '{}'", text))?;

    let start = parse_span_bound(start)?;
    let end = parse_span_bound(end)?;
    if end <= start {
        return Err(format!("span end must be after start: '{}'", text));
    }
    Ok(MeasureSpan::new(start, end))
}

fn parse_span_bound(text: &str) -> Result<TimeCode, String> {
    let text = text.trim();
    if text.contains(':') {
        return TimeCode::parse(text).map_err(|e| e.to_string());
    }

    let secs: f64 = text
        .parse()
        .map_err(|_| format!("invalid time '{}'", text))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("invalid time '{}'", text));
    }
    Ok(TimeCode::from_millis((secs * 1000.0).round() as u64))
}
