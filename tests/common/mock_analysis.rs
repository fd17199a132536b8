/*!
 * Mock loudness strategies and analysis tool clients
 *
 * These avoid spawning ffmpeg in tests. Strategies answer from a table keyed
 * by span start; the tool client answers by audio filter and records every
 * argument list it receives.
 */

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;

use loudsub::errors::ToolError;
use loudsub::ffmpeg::{ToolClient, ToolOutput};
use loudsub::loudness::{LoudnessStrategy, MeasureSpan, SENTINEL_DB, StrategyKind};

/// Strategy answering from a table keyed by span start in ms
#[derive(Debug)]
pub struct MockStrategy {
    kind: StrategyKind,
    levels: HashMap<u64, f64>,
    fallback: f64,
    delays: HashMap<u64, Duration>,
    calls: AtomicUsize,
    spans: Mutex<Vec<MeasureSpan>>,
}

impl MockStrategy {
    /// Every span measures `db`
    pub fn constant(kind: StrategyKind, db: f64) -> Self {
        Self {
            kind,
            levels: HashMap::new(),
            fallback: db,
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
            spans: Mutex::new(Vec::new()),
        }
    }

    /// Spans starting at `start_ms` measure the paired level, others the sentinel
    pub fn by_start(kind: StrategyKind, levels: &[(u64, f64)]) -> Self {
        let mut strategy = Self::constant(kind, SENTINEL_DB);
        strategy.levels = levels.iter().copied().collect();
        strategy
    }

    /// Sleep before answering for spans starting at the given times
    pub fn with_delays(mut self, delays: &[(u64, Duration)]) -> Self {
        self.delays = delays.iter().copied().collect();
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Spans received so far, in call order
    pub fn spans(&self) -> Vec<MeasureSpan> {
        self.spans.lock().clone()
    }
}

#[async_trait]
impl LoudnessStrategy for MockStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn measure(&self, _media: &Path, span: MeasureSpan) -> f64 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.spans.lock().push(span);

        let start = span.start.as_millis();
        if let Some(delay) = self.delays.get(&start) {
            tokio::time::sleep(*delay).await;
        }
        self.levels.get(&start).copied().unwrap_or(self.fallback)
    }
}

/// Canned answer for one audio filter
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub timed_out: bool,
}

impl MockResponse {
    pub fn ok(stderr: &str) -> Self {
        Self {
            exit_code: Some(0),
            stderr: stderr.to_string(),
            timed_out: false,
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            stderr: String::new(),
            timed_out: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            exit_code: None,
            stderr: String::new(),
            timed_out: true,
        }
    }
}

/// Tool client answering by the `-af` argument
#[derive(Debug, Default)]
pub struct MockToolClient {
    astats: Option<MockResponse>,
    loudnorm: Option<MockResponse>,
    unavailable: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockToolClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_astats(mut self, response: MockResponse) -> Self {
        self.astats = Some(response);
        self
    }

    pub fn with_loudnorm(mut self, response: MockResponse) -> Self {
        self.loudnorm = Some(response);
        self
    }

    /// Every call fails as if the executable vanished
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Argument lists received so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// `-af` values received so far
    pub fn filters(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|args| {
                let pos = args.iter().position(|a| a == "-af")?;
                args.get(pos + 1).cloned()
            })
            .collect()
    }
}

#[async_trait]
impl ToolClient for MockToolClient {
    async fn run(&self, args: &[String], _timeout: Duration) -> Result<ToolOutput, ToolError> {
        self.calls.lock().push(args.to_vec());

        if self.unavailable {
            return Err(ToolError::Unavailable {
                name: "ffmpeg".to_string(),
                searched: "mock".to_string(),
            });
        }

        let response = if args.iter().any(|a| a == "astats") {
            self.astats.clone()
        } else if args.iter().any(|a| a.starts_with("loudnorm")) {
            self.loudnorm.clone()
        } else {
            None
        };

        let response = response.unwrap_or_else(|| MockResponse::exit(1));
        Ok(ToolOutput {
            exit_code: response.exit_code,
            stderr: response.stderr,
            timed_out: response.timed_out,
        })
    }
}
