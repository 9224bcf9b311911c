use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A contiguous run of frames assigned to one worker.
pub struct Batch<F> {
    pub index: usize,
    /// Absolute position of `frames[0]` in the source sequence.
    pub first_frame: usize,
    pub frames: Vec<F>,
}

impl<F> Batch<F> {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Stop signal handed to every worker and producer at creation.
///
/// Set once by the controlling thread; checked between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What a worker does with a frame whose transform failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log and leave the slot out of the output.
    #[default]
    Drop,
    /// Log and forward the unprocessed input frame.
    PassThrough,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Completed,
    Cancelled,
    EngineUnavailable(String),
    TimedOut,
    /// The worker thread ended (panic or failed spawn) without reporting.
    Aborted,
}

impl WorkerOutcome {
    /// Timed-out workers may still be running, so nothing of theirs is drained.
    pub fn contributes_frames(&self) -> bool {
        !matches!(self, WorkerOutcome::TimedOut)
    }
}

/// Per-batch accounting sent by a worker when it finishes.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub batch_index: usize,
    pub first_frame: usize,
    pub frames_in: usize,
    pub frames_out: usize,
    /// Frames whose transform failed under [`FailurePolicy::Drop`].
    pub dropped: usize,
    pub outcome: WorkerOutcome,
    pub elapsed_ms: f64,
}

impl WorkerReport {
    pub fn new<F>(batch: &Batch<F>, outcome: WorkerOutcome) -> Self {
        Self {
            batch_index: batch.index,
            first_frame: batch.first_frame,
            frames_in: batch.len(),
            frames_out: 0,
            dropped: 0,
            outcome,
            elapsed_ms: 0.0,
        }
    }
}

/// Progress counters shared by the workers of one run.
pub struct ProcessingState {
    pub processed: AtomicUsize,
    pub dropped: AtomicUsize,
    pub start_time: Instant,
    progress: ProgressBar,
}

impl ProcessingState {
    pub fn new(total_frames: usize, progress: ProgressBar) -> Self {
        progress.set_length(total_frames as u64);
        Self {
            processed: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            start_time: Instant::now(),
            progress,
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.progress.inc(1);
    }

    pub fn record_dropped(&self, count: usize) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
        self.progress.inc(count as u64);
    }

    pub fn frames_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// Everything a finished run hands to the sink.
pub struct PipelineRun<F> {
    pub started_at: DateTime<Utc>,
    /// Wall-clock time from the first spawn to the join barrier.
    pub elapsed: Duration,
    pub input_frames: usize,
    pub reports: Vec<WorkerReport>,
    pub frames: Vec<F>,
}

impl<F> PipelineRun<F> {
    pub fn empty() -> Self {
        Self {
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            input_frames: 0,
            reports: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn dropped_frames(&self) -> usize {
        self.input_frames.saturating_sub(self.frames.len())
    }

    pub fn failed_batches(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome != WorkerOutcome::Completed)
            .count()
    }

    /// The first load error, when no batch managed to obtain an engine.
    pub fn engine_failure(&self) -> Option<&str> {
        let mut reasons = self.reports.iter().map(|r| match &r.outcome {
            WorkerOutcome::EngineUnavailable(reason) => Some(reason.as_str()),
            _ => None,
        });
        let first = reasons.next()??;
        reasons.all(|r| r.is_some()).then_some(first)
    }

    pub fn frames_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames.len() as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_only_timed_out_batches_are_not_drained() {
        assert!(WorkerOutcome::Completed.contributes_frames());
        assert!(WorkerOutcome::Cancelled.contributes_frames());
        assert!(WorkerOutcome::Aborted.contributes_frames());
        assert!(WorkerOutcome::EngineUnavailable("missing".into()).contributes_frames());
        assert!(!WorkerOutcome::TimedOut.contributes_frames());
    }

    #[test]
    fn test_processing_state_counts() {
        let state = ProcessingState::new(10, ProgressBar::hidden());
        state.record_processed();
        state.record_processed();
        state.record_dropped(3);
        assert_eq!(state.processed.load(Ordering::Relaxed), 2);
        assert_eq!(state.dropped.load(Ordering::Relaxed), 3);
    }

    fn run_with_outcomes(outcomes: Vec<WorkerOutcome>) -> PipelineRun<u32> {
        let batch = Batch {
            index: 0,
            first_frame: 0,
            frames: vec![0u32; 2],
        };
        let mut run = PipelineRun::empty();
        run.reports = outcomes
            .into_iter()
            .map(|outcome| WorkerReport::new(&batch, outcome))
            .collect();
        run
    }

    #[test]
    fn test_engine_failure_only_when_every_batch_failed() {
        let unavailable = || WorkerOutcome::EngineUnavailable("model missing".into());

        let all_failed = run_with_outcomes(vec![unavailable(), unavailable()]);
        assert_eq!(all_failed.engine_failure(), Some("model missing"));

        let one_ok = run_with_outcomes(vec![unavailable(), WorkerOutcome::Completed]);
        assert_eq!(one_ok.engine_failure(), None);

        assert_eq!(run_with_outcomes(Vec::new()).engine_failure(), None);
    }

    #[test]
    fn test_outcome_serializes_with_reason() {
        let json = serde_json::to_value(WorkerOutcome::EngineUnavailable("no model".into()))
            .unwrap();
        assert_eq!(json["status"], "engine_unavailable");
        assert_eq!(json["reason"], "no model");

        let json = serde_json::to_value(WorkerOutcome::Completed).unwrap();
        assert_eq!(json["status"], "completed");

        let json = serde_json::to_value(FailurePolicy::PassThrough).unwrap();
        assert_eq!(json, "pass_through");
    }
}
