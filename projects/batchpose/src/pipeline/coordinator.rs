// Pipeline coordinator: partitions frames, runs one worker per batch,
// waits for all of them and reassembles the output in source order.

use crate::pipeline::batcher::FrameBatcher;
use crate::pipeline::engine::{EngineProvider, FrameTransform};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::types::{
    CancelToken, FailurePolicy, PipelineRun, ProcessingState, WorkerOutcome, WorkerReport,
};
use crate::pipeline::worker::{BatchWorker, CompletionSignal};
use crate::video::FrameSource;
use chrono::Utc;
use crossbeam::channel::{self, RecvTimeoutError};
use indicatif::ProgressBar;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub worker_count: usize,
    pub failure_policy: FailurePolicy,
    /// Unfinished workers are treated as timed out once this elapses.
    pub deadline: Option<Duration>,
}

impl CoordinatorConfig {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            failure_policy: FailurePolicy::default(),
            deadline: None,
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.worker_count < 1 {
            return Err(PipelineError::InvalidConfiguration(format!(
                "worker count must be at least 1, got {}",
                self.worker_count
            )));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(PipelineError::InvalidConfiguration(
                "deadline must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct PipelineCoordinator {
    config: CoordinatorConfig,
    cancel: CancelToken,
    progress: ProgressBar,
}

impl PipelineCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    #[cfg(test)]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the whole source through `provider`'s engines.
    ///
    /// Output order always equals source order, whatever order workers finish in.
    pub fn run<F, E, S>(
        &self,
        source: &mut S,
        provider: Arc<dyn EngineProvider<E>>,
    ) -> PipelineResult<PipelineRun<F>>
    where
        F: Send + 'static,
        E: FrameTransform<F> + 'static,
        S: FrameSource<F> + ?Sized,
    {
        self.config.validate()?;
        let batcher = FrameBatcher::new(self.config.worker_count)?;
        let batches = batcher.partition(source)?;

        if batches.is_empty() {
            tracing::info!("No frames to process");
            return Ok(PipelineRun::empty());
        }

        let input_frames: usize = batches.iter().map(|b| b.len()).sum();
        let state = Arc::new(ProcessingState::new(input_frames, self.progress.clone()));
        let started_at = Utc::now();
        let start_inst = Instant::now();
        let deadline = self.config.deadline.map(|d| start_inst + d);

        let (done_tx, done_rx) = channel::unbounded::<WorkerReport>();
        let mut reports = Vec::with_capacity(batches.len());
        let mut receivers = Vec::with_capacity(batches.len());
        let mut handles = Vec::with_capacity(batches.len());

        for batch in batches {
            let index = batch.index;
            // Room for the whole batch, so a worker never blocks on its own output.
            let (result_tx, result_rx) = channel::bounded(batch.len());
            receivers.push(result_rx);
            // Placeholder until the worker reports.
            reports.push(WorkerReport::new(&batch, WorkerOutcome::TimedOut));

            let signal = CompletionSignal::new(done_tx.clone(), &batch);
            let worker = BatchWorker {
                batch,
                provider: Arc::clone(&provider),
                results: result_tx,
                cancel: self.cancel.clone(),
                policy: self.config.failure_policy,
                state: state.clone(),
            };

            tracing::info!("Spawning batch worker {}", index);
            let spawned = thread::Builder::new()
                .name(format!("batch-worker-{}", index))
                .spawn(move || signal.send(worker.run()));
            match spawned {
                Ok(handle) => handles.push(Some(handle)),
                Err(e) => {
                    // The closure is dropped unrun, so its signal reports the batch as aborted.
                    tracing::error!("Failed to spawn batch worker {}: {}", index, e);
                    handles.push(None);
                }
            }
        }
        drop(done_tx);

        let mut finished = vec![false; reports.len()];
        let mut pending = reports.len();
        while pending > 0 {
            let received = match deadline {
                Some(at) => done_rx.recv_deadline(at),
                None => done_rx
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(report) => {
                    let index = report.batch_index;
                    match &report.outcome {
                        WorkerOutcome::Completed => {
                            tracing::info!("Batch worker {} finished gracefully", index)
                        }
                        outcome => tracing::warn!("Batch worker {} ended: {:?}", index, outcome),
                    }
                    if !finished[index] {
                        finished[index] = true;
                        pending -= 1;
                    }
                    reports[index] = report;
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::error!(
                        "Deadline exceeded with {} of {} workers unfinished; abandoning them",
                        pending,
                        reports.len()
                    );
                    self.cancel.cancel();
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for (index, handle) in handles.into_iter().enumerate() {
            let Some(handle) = handle else { continue };
            if !finished[index] {
                // Still running past the deadline; leave it detached.
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Batch worker {} panicked", index);
            }
        }
        let elapsed = start_inst.elapsed();

        // Drain per-batch outputs in batch order to restore global order.
        let mut frames = Vec::with_capacity(input_frames);
        for (report, rx) in reports.iter().zip(receivers) {
            if report.outcome.contributes_frames() {
                frames.extend(rx.try_iter());
            }
        }

        let run = PipelineRun {
            started_at,
            elapsed,
            input_frames,
            reports,
            frames,
        };
        tracing::info!(
            "Pipeline finished: {} of {} frames in {:.2}s ({:.1} fps, {} dropped, {} failed batches)",
            run.frames.len(),
            run.input_frames,
            run.elapsed.as_secs_f64(),
            state.frames_per_second(),
            state.dropped.load(Ordering::Relaxed),
            run.failed_batches()
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::{DedicatedEngines, EnginePool};
    use crate::pipeline::testing::{
        CancelAfter, FailOn, PanicOn, Scale, StallOn, Tracked, VecSource,
    };
    use crate::pipeline::transforms::Passthrough;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn identity() -> Arc<dyn EngineProvider<Passthrough>> {
        Arc::new(DedicatedEngines::new(|| Ok(Passthrough)))
    }

    fn run_with<E: FrameTransform<u32> + 'static>(
        frames: Vec<u32>,
        config: CoordinatorConfig,
        provider: Arc<dyn EngineProvider<E>>,
    ) -> PipelineRun<u32> {
        let mut source = VecSource::new(frames);
        PipelineCoordinator::new(config)
            .run(&mut source, provider)
            .unwrap()
    }

    #[test]
    fn test_identity_output_matches_input_for_any_worker_count() {
        let input: Vec<u32> = (0..21).collect();
        for workers in 1..=25 {
            let run = run_with(input.clone(), CoordinatorConfig::new(workers), identity());
            assert_eq!(run.frames, input, "worker count {}", workers);
            assert_eq!(run.dropped_frames(), 0);
        }
    }

    #[test]
    fn test_worker_count_does_not_change_output() {
        let input: Vec<u32> = (0..50).collect();
        let scale = || -> Arc<dyn EngineProvider<Scale>> {
            Arc::new(DedicatedEngines::new(|| Ok(Scale(3))))
        };

        let one = run_with(input.clone(), CoordinatorConfig::new(1), scale());
        let seven = run_with(input.clone(), CoordinatorConfig::new(7), scale());
        assert_eq!(one.frames, seven.frames);
        assert_eq!(one.frames[49], 147);
    }

    #[test]
    fn test_21_frames_on_4_workers() {
        let run = run_with((0..21).collect(), CoordinatorConfig::new(4), identity());

        let sizes: Vec<usize> = run.reports.iter().map(|r| r.frames_in).collect();
        assert_eq!(sizes, vec![6, 6, 6, 3]);
        assert!(run
            .reports
            .iter()
            .all(|r| r.outcome == WorkerOutcome::Completed));
        assert_eq!(run.frames, (0..21).collect::<Vec<u32>>());
    }

    #[test]
    fn test_empty_source_completes_immediately() {
        let run = run_with(Vec::new(), CoordinatorConfig::new(4), identity());
        assert!(run.frames.is_empty());
        assert!(run.reports.is_empty());
    }

    #[test]
    fn test_zero_workers_rejected_before_any_read() {
        let mut source = VecSource::new((0..10u32).collect());
        let result = PipelineCoordinator::new(CoordinatorConfig::new(0)).run(&mut source, identity());

        assert!(matches!(
            result,
            Err(PipelineError::InvalidConfiguration(_))
        ));
        assert_eq!(source.reads(), 0);
    }

    #[test]
    fn test_engine_failure_drops_only_that_batch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory_calls = calls.clone();
        let provider: Arc<dyn EngineProvider<Passthrough>> =
            Arc::new(DedicatedEngines::new(move || {
                if factory_calls.fetch_add(1, Ordering::SeqCst) == 1 {
                    Err(anyhow!("model artifact missing"))
                } else {
                    Ok(Passthrough)
                }
            }));

        let input: Vec<u32> = (0..21).collect();
        let run = run_with(input.clone(), CoordinatorConfig::new(4), provider);

        let failed: Vec<&WorkerReport> = run
            .reports
            .iter()
            .filter(|r| matches!(r.outcome, WorkerOutcome::EngineUnavailable(_)))
            .collect();
        assert_eq!(failed.len(), 1);

        let lost = failed[0].first_frame..failed[0].first_frame + failed[0].frames_in;
        let expected: Vec<u32> = input
            .into_iter()
            .filter(|f| !lost.contains(&(*f as usize)))
            .collect();
        assert_eq!(run.frames, expected);
        assert_eq!(run.dropped_frames(), failed[0].frames_in);
    }

    #[test]
    fn test_frame_failures_follow_policy() {
        let provider = || -> Arc<dyn EngineProvider<FailOn>> {
            Arc::new(DedicatedEngines::new(|| Ok(FailOn::values(&[3, 7]))))
        };

        let dropped = run_with((0..10).collect(), CoordinatorConfig::new(3), provider());
        assert_eq!(dropped.frames, vec![0, 1, 2, 4, 5, 6, 8, 9]);
        assert_eq!(dropped.reports.iter().map(|r| r.dropped).sum::<usize>(), 2);

        let mut config = CoordinatorConfig::new(3);
        config.failure_policy = FailurePolicy::PassThrough;
        let passed = run_with((0..10).collect(), config, provider());
        assert_eq!(passed.frames, (0..10).collect::<Vec<u32>>());
    }

    #[test]
    fn test_deadline_abandons_stalled_worker() {
        let provider: Arc<dyn EngineProvider<StallOn>> = Arc::new(DedicatedEngines::new(|| {
            Ok(StallOn {
                value: 0,
                delay: Duration::from_secs(2),
            })
        }));
        let mut config = CoordinatorConfig::new(2);
        config.deadline = Some(Duration::from_millis(300));

        let started = Instant::now();
        let run = run_with(vec![0, 1, 2, 3], config, provider);

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(run.reports[0].outcome, WorkerOutcome::TimedOut);
        assert_eq!(run.reports[1].outcome, WorkerOutcome::Completed);
        assert_eq!(run.frames, vec![2, 3]);
    }

    #[test]
    fn test_cancellation_keeps_produced_prefix() {
        let token = CancelToken::new();
        let engine_token = token.clone();
        let provider: Arc<dyn EngineProvider<CancelAfter>> =
            Arc::new(DedicatedEngines::new(move || {
                Ok(CancelAfter {
                    value: 2,
                    token: engine_token.clone(),
                })
            }));

        let mut source = VecSource::new((0..6u32).collect());
        let run = PipelineCoordinator::new(CoordinatorConfig::new(1))
            .with_cancel_token(token)
            .run(&mut source, provider)
            .unwrap();

        assert_eq!(run.frames, vec![0, 1, 2]);
        assert_eq!(run.reports[0].outcome, WorkerOutcome::Cancelled);
    }

    #[test]
    fn test_panicking_engine_loses_only_its_frame() {
        let provider: Arc<dyn EngineProvider<PanicOn>> =
            Arc::new(DedicatedEngines::new(|| Ok(PanicOn(4))));

        let run = run_with((0..6).collect(), CoordinatorConfig::new(2), provider);

        assert_eq!(run.reports[0].outcome, WorkerOutcome::Completed);
        assert_eq!(run.reports[1].outcome, WorkerOutcome::Completed);
        assert_eq!(run.reports[1].dropped, 1);
        assert_eq!(run.frames, vec![0, 1, 2, 3, 5]);
    }

    #[test]
    fn test_pool_limits_concurrent_engines() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = EnginePool::new(2, || {
            Ok(Tracked {
                active: active.clone(),
                peak: peak.clone(),
            })
        });
        let provider: Arc<dyn EngineProvider<Tracked>> = Arc::new(pool);

        let input: Vec<u32> = (0..60).collect();
        let run = run_with(input.clone(), CoordinatorConfig::new(6), provider);

        assert_eq!(run.frames, input);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(run
            .reports
            .iter()
            .all(|r| r.outcome == WorkerOutcome::Completed));
    }

    #[test]
    fn test_zero_deadline_rejected() {
        let mut config = CoordinatorConfig::new(2);
        config.deadline = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
