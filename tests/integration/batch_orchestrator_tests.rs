/*!
 * Integration tests for batch orchestration: ordering, pause, resume, cancel
 */

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use futures::StreamExt;
use tokio::sync::mpsc::error::TryRecvError;
use loudsub::batch::{BatchOrchestrator, RunControl, RunState};
use loudsub::loudness::{LoudnessProbe, LoudnessStrategy, StrategyKind};
use crate::common;
use crate::common::mock_analysis::MockStrategy;

fn orchestrator_with(strategy: Arc<MockStrategy>, threshold: f64) -> BatchOrchestrator {
    let strategy: Arc<dyn LoudnessStrategy> = strategy;
    let probe = LoudnessProbe::new(vec![strategy]);
    BatchOrchestrator::new(Arc::new(probe), PathBuf::from("media.wav"), threshold)
}

/// Poll until the orchestrator reports `state`
async fn wait_for_state(control: &RunControl, state: RunState) {
    for _ in 0..400 {
        if control.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("run never reached {:?}, still {:?}", state, control.state());
}

#[tokio::test]
async fn test_run_withReverseCompletion_shouldApplyInEntryOrder() {
    // Later entries finish first inside every batch
    let delays: Vec<(u64, Duration)> = (0..12u64)
        .map(|i| (i * 1_000, Duration::from_millis(5 * (12 - i))))
        .collect();
    let strategy = MockStrategy::constant(StrategyKind::SpectralStats, -20.0)
        .with_delays(&delays)
        .shared();
    let orchestrator = orchestrator_with(strategy.clone(), -45.0);

    let mut seen = Vec::new();
    let outcome = orchestrator
        .run(&common::numbered_entries(12), &RunControl::new(), |event| {
            seen.push((event.entry_index, event.completed));
        })
        .await;

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(seen, (0..12).map(|i| (i, i + 1)).collect::<Vec<_>>());
    let indices: Vec<usize> = outcome.measurements.iter().map(|m| m.entry_index).collect();
    assert_eq!(indices, (0..12).collect::<Vec<_>>());
    assert_eq!(strategy.calls(), 12);
}

#[tokio::test]
async fn test_run_withCancelAfterFirstBatch_shouldApplyExactlyFive() {
    let strategy = MockStrategy::constant(StrategyKind::SpectralStats, -20.0).shared();
    let orchestrator = orchestrator_with(strategy.clone(), -45.0);
    let control = RunControl::new();

    let outcome = orchestrator
        .run(&common::numbered_entries(12), &control, |event| {
            if event.entry_index == 4 {
                control.cancel();
            }
        })
        .await;

    assert_eq!(outcome.state, RunState::Cancelled);
    assert_eq!(outcome.applied(), 5);
    assert_eq!(outcome.total, 12);
    assert!(!outcome.nothing_to_remove());
    // No second batch was dispatched
    assert_eq!(strategy.calls(), 5);
    assert_eq!(control.state(), RunState::Cancelled);
}

#[tokio::test]
async fn test_run_withCancelMidBatch_shouldStopApplying() {
    let strategy = MockStrategy::constant(StrategyKind::SpectralStats, -20.0).shared();
    let orchestrator = orchestrator_with(strategy.clone(), -45.0);
    let control = RunControl::new();

    let outcome = orchestrator
        .run(&common::numbered_entries(12), &control, |event| {
            if event.entry_index == 1 {
                control.cancel();
            }
        })
        .await;

    assert_eq!(outcome.state, RunState::Cancelled);
    assert_eq!(outcome.applied(), 2);
    assert_eq!(strategy.calls(), 5);
}

#[tokio::test]
async fn test_start_withPauseBeforeStart_shouldHoldUntilResumed() {
    let strategy = MockStrategy::constant(StrategyKind::SpectralStats, -50.0).shared();
    let orchestrator = Arc::new(orchestrator_with(strategy.clone(), -45.0));
    let control = RunControl::new();
    control.pause();

    let mut handle = orchestrator.start(common::numbered_entries(7), control.clone());
    wait_for_state(&control, RunState::Paused).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(handle.events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(strategy.calls(), 0);

    control.resume();
    let outcome = handle.outcome().await;

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.removed, (0..7).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_start_withPauseMidRun_shouldFreezeProgress() {
    common::init_test_logging();
    let strategy = MockStrategy::constant(StrategyKind::SpectralStats, -20.0)
        .with_delays(&(0..15u64).map(|i| (i * 1_000, Duration::from_millis(10))).collect::<Vec<_>>())
        .shared();
    let orchestrator = Arc::new(orchestrator_with(strategy, -45.0));
    let control = RunControl::new();

    let mut handle = orchestrator.start(common::numbered_entries(15), control.clone());

    let first = handle.events.recv().await.unwrap();
    assert_eq!(first.entry_index, 0);
    control.pause();
    wait_for_state(&control, RunState::Paused).await;

    let mut received = 1;
    while handle.events.try_recv().is_ok() {
        received += 1;
    }
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(matches!(handle.events.try_recv(), Err(TryRecvError::Empty)));
    assert!(received < 15);

    control.resume();
    let (events, outcome) = handle.into_stream();
    let rest: Vec<_> = events.collect().await;
    let outcome = outcome.await.unwrap();

    assert_eq!(received + rest.len(), 15);
    assert_eq!(rest.last().map(|e| e.completed), Some(15));
    assert_eq!(outcome.state, RunState::Completed);
}

#[tokio::test]
async fn test_start_withCancelWhilePaused_shouldEndCancelled() {
    let strategy = MockStrategy::constant(StrategyKind::SpectralStats, -20.0).shared();
    let orchestrator = Arc::new(orchestrator_with(strategy, -45.0));
    let control = RunControl::new();
    control.pause();

    let handle = orchestrator.start(common::numbered_entries(3), control.clone());
    wait_for_state(&control, RunState::Paused).await;
    control.cancel();

    let outcome = handle.outcome().await;
    assert_eq!(outcome.state, RunState::Cancelled);
    assert_eq!(outcome.applied(), 0);
}

#[tokio::test]
async fn test_run_withThresholdAtFloor_shouldKeepUnmeasurable() {
    let strategy = MockStrategy::by_start(StrategyKind::SpectralStats, &[(0, -30.0)]).shared();

    let strict = orchestrator_with(strategy.clone(), -45.0)
        .run(&common::numbered_entries(3), &RunControl::new(), |_| {})
        .await;
    assert_eq!(strict.removed, vec![1, 2]);
    assert!(strict.measurements[1].is_sentinel());

    let floor = orchestrator_with(strategy, -60.0)
        .run(&common::numbered_entries(3), &RunControl::new(), |_| {})
        .await;
    assert!(floor.nothing_to_remove());
}

#[tokio::test]
async fn test_run_withBatchSizeOne_shouldStillMeasureAll() {
    let strategy = MockStrategy::constant(StrategyKind::SpectralStats, -20.0).shared();
    let orchestrator = orchestrator_with(strategy.clone(), -45.0).with_batch_size(1).unwrap();

    let outcome = orchestrator.run(&common::numbered_entries(4), &RunControl::new(), |_| {}).await;

    assert_eq!(outcome.applied(), 4);
    assert_eq!(strategy.calls(), 4);
}
