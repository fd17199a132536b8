/*!
 * Batch measurement of subtitle spans.
 *
 * Entries are measured in fixed-size batches. Inside a batch every entry runs
 * as its own task; the orchestrator joins the whole batch, then applies the
 * results in ascending entry order. Concurrency changes throughput, never the
 * order callers observe.
 *
 * Pause and cancel are cooperative. They are checked before each batch is
 * dispatched and before each result is applied; work already dispatched is
 * never preempted.
 */

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures::future::join_all;
use futures::stream::{self, Stream};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::errors::FilterError;
use crate::loudness::{LoudnessMeasurement, LoudnessProbe, MeasureSpan};
use crate::subtitle_processor::SubtitleEntry;

/// Entries measured concurrently when nothing else is configured
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Upper bound on waiting for one batch when nothing else is configured
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
struct ControlState {
    paused: bool,
    cancelled: bool,
    run_state: RunState,
}

/// Pause, resume and cancel signals for one run
///
/// Owned by the caller and handed to the orchestrator. Clones share the same
/// signals.
#[derive(Debug, Clone)]
pub struct RunControl {
    tx: Arc<watch::Sender<ControlState>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlState {
            paused: false,
            cancelled: false,
            run_state: RunState::Idle,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Hold off applying results and dispatching batches
    pub fn pause(&self) {
        self.tx.send_modify(|s| s.paused = true);
    }

    pub fn resume(&self) {
        self.tx.send_modify(|s| s.paused = false);
    }

    /// Stop after the current batch; also releases a paused run
    pub fn cancel(&self) {
        self.tx.send_modify(|s| s.cancelled = true);
    }

    pub fn is_paused(&self) -> bool {
        self.tx.borrow().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().cancelled
    }

    /// State most recently reported by the orchestrator
    pub fn state(&self) -> RunState {
        self.tx.borrow().run_state
    }

    fn set_state(&self, state: RunState) {
        self.tx.send_if_modified(|s| {
            if s.run_state == state {
                return false;
            }
            s.run_state = state;
            true
        });
    }

    /// Block while paused; `false` once cancelled
    async fn wait_until_runnable(&self) -> bool {
        if self.is_paused() && !self.is_cancelled() {
            info!("Run paused");
            self.set_state(RunState::Paused);
        }

        let mut rx = self.tx.subscribe();
        let cancelled = match rx.wait_for(|s| s.cancelled || !s.paused).await {
            Ok(state) => state.cancelled,
            Err(_) => true,
        };

        if !cancelled && self.state() == RunState::Paused {
            info!("Run resumed");
            self.set_state(RunState::Running);
        }
        !cancelled
    }
}

/// One applied result, emitted in ascending entry order
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// 0-based entry position
    pub entry_index: usize,
    pub measurement: LoudnessMeasurement,
    /// The entry fell below the threshold
    pub remove: bool,
    /// Results applied so far, including this one
    pub completed: usize,
    pub total: usize,
    pub state: RunState,
}

/// What a run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub state: RunState,
    /// Applied measurements in ascending entry order
    pub measurements: Vec<LoudnessMeasurement>,
    /// 0-based positions of entries below the threshold
    pub removed: Vec<usize>,
    pub total: usize,
}

impl RunOutcome {
    fn failed(total: usize) -> Self {
        Self {
            state: RunState::Failed,
            measurements: Vec::new(),
            removed: Vec::new(),
            total,
        }
    }

    pub fn applied(&self) -> usize {
        self.measurements.len()
    }

    /// Finished the whole track and nothing fell below the threshold
    pub fn nothing_to_remove(&self) -> bool {
        self.state == RunState::Completed && self.removed.is_empty()
    }
}

/// Per-run bookkeeping; lives only as long as one `run` call
struct BatchRun {
    /// Written by workers, drained by the orchestrator after each join
    results: Arc<Mutex<HashMap<usize, LoudnessMeasurement>>>,
    /// Next entry to dispatch
    cursor: usize,
    measurements: Vec<LoudnessMeasurement>,
    removed: Vec<usize>,
}

impl BatchRun {
    fn new(total: usize) -> Self {
        Self {
            results: Arc::new(Mutex::new(HashMap::with_capacity(DEFAULT_BATCH_SIZE))),
            cursor: 0,
            measurements: Vec::with_capacity(total),
            removed: Vec::new(),
        }
    }
}

/// Live run started with `BatchOrchestrator::start`
pub struct RunHandle {
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
    task: JoinHandle<RunOutcome>,
    total: usize,
}

impl RunHandle {
    /// Wait for the run to end; a panicked run reports `Failed`
    pub async fn outcome(self) -> RunOutcome {
        let total = self.total;
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Run task ended abnormally: {}", e);
                RunOutcome::failed(total)
            }
        }
    }

    /// Split into an event stream and the outcome task
    pub fn into_stream(self) -> (impl Stream<Item = ProgressEvent>, JoinHandle<RunOutcome>) {
        let events = stream::unfold(self.events, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        (events, self.task)
    }
}

/// Measures a track in batches and applies the threshold cut
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    probe: Arc<LoudnessProbe>,
    media: PathBuf,
    threshold_db: f64,
    batch_size: usize,
    batch_timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new<P: Into<PathBuf>>(probe: Arc<LoudnessProbe>, media: P, threshold_db: f64) -> Self {
        Self {
            probe,
            media: media.into(),
            threshold_db,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self, FilterError> {
        if batch_size == 0 {
            return Err(FilterError::Config("batch size must be at least 1".to_string()));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn with_batch_timeout(mut self, batch_timeout: Duration) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    pub fn threshold_db(&self) -> f64 {
        self.threshold_db
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Strictly below the threshold; the sentinel takes part like any value
    pub fn should_remove(&self, measurement: &LoudnessMeasurement) -> bool {
        measurement.decibels < self.threshold_db
    }

    /// Run on a background task, streaming events through a channel
    pub fn start(self: Arc<Self>, entries: Vec<SubtitleEntry>, control: RunControl) -> RunHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let total = entries.len();

        let task = tokio::spawn(async move {
            self.run(&entries, &control, |event| {
                // The receiver may have been dropped; the run still completes
                let _ = tx.send(event.clone());
            })
            .await
        });

        RunHandle { events: rx, task, total }
    }

    /// Measure every entry and apply the threshold
    ///
    /// `on_progress` is called once per applied entry, in ascending order,
    /// from the orchestrating task.
    pub async fn run<F>(&self, entries: &[SubtitleEntry], control: &RunControl, mut on_progress: F) -> RunOutcome
    where
        F: FnMut(&ProgressEvent),
    {
        let total = entries.len();
        let mut run = BatchRun::new(total);
        let started = Instant::now();
        let mut state = RunState::Completed;

        control.set_state(RunState::Running);
        info!(
            "Measuring {} entries in batches of {} (threshold {:.1} dB)",
            total, self.batch_size, self.threshold_db
        );

        'batches: while run.cursor < total {
            if !control.wait_until_runnable().await {
                state = RunState::Cancelled;
                break;
            }

            let batch_start = run.cursor;
            let batch_end = (batch_start + self.batch_size).min(total);
            run.cursor = batch_end;

            debug!("Dispatching entries {}..={}", batch_start + 1, batch_end);
            let handles = self.dispatch(&entries[batch_start..batch_end], batch_start, &run.results);
            self.join_batch(handles, batch_start).await;

            let mut finished = std::mem::take(&mut *run.results.lock());

            for entry_index in batch_start..batch_end {
                if !control.wait_until_runnable().await {
                    state = RunState::Cancelled;
                    break 'batches;
                }

                let measurement = finished
                    .remove(&entry_index)
                    .unwrap_or_else(|| LoudnessMeasurement::unmeasurable(entry_index));
                let remove = self.should_remove(&measurement);

                debug!(
                    "Entry {}: {:.2} dB via {}{} - {}",
                    entry_index + 1,
                    measurement.decibels,
                    measurement.strategy,
                    if remove { " (remove)" } else { "" },
                    entries[entry_index].preview(30)
                );

                run.measurements.push(measurement);
                if remove {
                    run.removed.push(entry_index);
                }

                on_progress(&ProgressEvent {
                    entry_index,
                    measurement,
                    remove,
                    completed: run.measurements.len(),
                    total,
                    state: RunState::Running,
                });
            }
        }

        if state == RunState::Cancelled {
            info!(
                "Run cancelled after {} of {} entries ({:.1?})",
                run.measurements.len(), total, started.elapsed()
            );
        } else {
            info!(
                "Measured {} entries in {:.1?}, {} below threshold",
                total, started.elapsed(), run.removed.len()
            );
        }
        control.set_state(state);

        RunOutcome {
            state,
            measurements: run.measurements,
            removed: run.removed,
            total,
        }
    }

    /// Spawn one measurement task per entry of the batch
    fn dispatch(
        &self,
        batch: &[SubtitleEntry],
        first_index: usize,
        results: &Arc<Mutex<HashMap<usize, LoudnessMeasurement>>>,
    ) -> Vec<JoinHandle<()>> {
        batch
            .iter()
            .enumerate()
            .map(|(offset, entry)| {
                let entry_index = first_index + offset;
                let span = MeasureSpan::new(entry.start, entry.end);
                let probe = self.probe.clone();
                let media = self.media.clone();
                let results = results.clone();

                tokio::spawn(async move {
                    let measurement = probe.measure(&media, entry_index, span).await;
                    results.lock().insert(entry_index, measurement);
                })
            })
            .collect()
    }

    /// Wait for every task of a batch, bounded by the batch timeout
    ///
    /// Stragglers are aborted; dropping their futures kills any child process
    /// they own. Missing results are filled with the sentinel by the caller.
    async fn join_batch(&self, handles: Vec<JoinHandle<()>>, first_index: usize) {
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(self.batch_timeout, join_all(handles)).await {
            Ok(results) => {
                for (offset, result) in results.into_iter().enumerate() {
                    if let Err(e) = result {
                        warn!("Measurement of entry {} failed: {}", first_index + offset + 1, e);
                    }
                }
            }
            Err(_) => {
                warn!(
                    "Batch starting at entry {} exceeded {:?}; unfinished entries count as silent",
                    first_index + 1, self.batch_timeout
                );
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }
    }
}
