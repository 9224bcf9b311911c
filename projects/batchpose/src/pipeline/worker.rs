use crate::pipeline::engine::{EngineLease, EngineProvider, FrameTransform};
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::{
    Batch, CancelToken, FailurePolicy, ProcessingState, WorkerOutcome, WorkerReport,
};
use anyhow::anyhow;
use crossbeam::channel::Sender;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Runs one engine over one batch, streaming results into the batch's own channel.
pub struct BatchWorker<F, E> {
    pub batch: Batch<F>,
    pub provider: Arc<dyn EngineProvider<E>>,
    pub results: Sender<F>,
    pub cancel: CancelToken,
    pub policy: FailurePolicy,
    pub state: Arc<ProcessingState>,
}

impl<F, E> BatchWorker<F, E>
where
    E: FrameTransform<F>,
{
    /// Processes the batch in order. Never panics on engine or frame errors;
    /// they are logged and recorded in the returned report.
    pub fn run(self) -> WorkerReport {
        let start_inst = Instant::now();
        let mut report = WorkerReport::new(&self.batch, WorkerOutcome::Completed);
        let batch_index = self.batch.index;
        let first_frame = self.batch.first_frame;

        // Engine is created inside the worker thread, once per worker.
        let mut engine = match EngineLease::acquire(&self.provider) {
            Ok(lease) => lease,
            Err(e) => {
                let err = PipelineError::EngineAcquisition {
                    batch_index,
                    reason: format!("{:#}", e),
                };
                tracing::error!("{}; dropping {} frames", err, report.frames_in);
                self.state.record_dropped(report.frames_in);
                report.outcome = WorkerOutcome::EngineUnavailable(err.to_string());
                report.elapsed_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
                return report;
            }
        };

        for (offset, frame) in self.batch.frames.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    "Batch worker {} cancelled after {} of {} frames",
                    batch_index,
                    offset,
                    report.frames_in
                );
                report.outcome = WorkerOutcome::Cancelled;
                break;
            }

            // A panicking engine costs one frame, not the rest of the batch.
            let result = panic::catch_unwind(AssertUnwindSafe(|| engine.transform(&frame)))
                .unwrap_or_else(|payload| {
                    Err(anyhow!("engine panicked: {}", panic_message(&*payload)))
                });
            let output = match result {
                Ok(processed) => Some(processed),
                Err(e) => {
                    let err = PipelineError::FrameTransform {
                        frame_index: first_frame + offset,
                        reason: format!("{:#}", e),
                    };
                    match self.policy {
                        FailurePolicy::Drop => {
                            tracing::warn!("{}; dropping frame", err);
                            None
                        }
                        FailurePolicy::PassThrough => {
                            tracing::warn!("{}; passing frame through unprocessed", err);
                            Some(frame)
                        }
                    }
                }
            };

            match output {
                Some(processed) => {
                    if self.results.send(processed).is_err() {
                        // Coordinator stopped listening (deadline).
                        report.outcome = WorkerOutcome::Cancelled;
                        break;
                    }
                    report.frames_out += 1;
                    self.state.record_processed();
                }
                None => {
                    report.dropped += 1;
                    self.state.record_dropped(1);
                }
            }
        }

        engine.release();

        report.elapsed_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Delivers a worker's report to the coordinator exactly once.
///
/// If the worker thread unwinds (or is never started) before `send`, the drop
/// path reports [`WorkerOutcome::Aborted`] so the join barrier still completes.
pub struct CompletionSignal {
    tx: Option<Sender<WorkerReport>>,
    fallback: WorkerReport,
}

impl CompletionSignal {
    pub fn new<F>(tx: Sender<WorkerReport>, batch: &Batch<F>) -> Self {
        Self {
            tx: Some(tx),
            fallback: WorkerReport::new(batch, WorkerOutcome::Aborted),
        }
    }

    pub fn send(mut self, report: WorkerReport) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(report);
        }
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::error!(
                "Batch worker {} exited without reporting",
                self.fallback.batch_index
            );
            let _ = tx.send(self.fallback.clone());
        }
    }
}
