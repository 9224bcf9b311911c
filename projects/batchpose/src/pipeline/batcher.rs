// Frame batcher: pulls frames from a source and splits them into contiguous batches

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::types::Batch;
use crate::video::FrameSource;

/// Sizes of the batches `frame_count` frames are split into for `worker_count` workers.
///
/// Workers beyond the frame count are clamped away so no batch is empty.
pub fn batch_sizes(frame_count: usize, worker_count: usize) -> PipelineResult<Vec<usize>> {
    if worker_count < 1 {
        return Err(PipelineError::InvalidConfiguration(format!(
            "worker count must be at least 1, got {}",
            worker_count
        )));
    }
    if frame_count == 0 {
        return Ok(Vec::new());
    }

    let workers = worker_count.min(frame_count);
    let batch_size = frame_count.div_ceil(workers);
    Ok((0..frame_count)
        .step_by(batch_size)
        .map(|start| batch_size.min(frame_count - start))
        .collect())
}

pub struct FrameBatcher {
    worker_count: usize,
}

impl FrameBatcher {
    pub fn new(worker_count: usize) -> PipelineResult<Self> {
        // Validates before the source is touched.
        batch_sizes(0, worker_count)?;
        Ok(Self { worker_count })
    }

    /// Reads the whole source in order, one pull per frame, never more than it reports.
    ///
    /// A source that runs dry early yields a shorter last batch instead of an error.
    pub fn partition<F, S>(&self, source: &mut S) -> PipelineResult<Vec<Batch<F>>>
    where
        S: FrameSource<F> + ?Sized,
    {
        let total = source
            .frame_count()
            .map_err(|e| PipelineError::SourceUnavailable(format!("{:#}", e)))?;
        let sizes = batch_sizes(total, self.worker_count)?;
        tracing::debug!(
            "Partitioning {} frames for {} workers into batches {:?}",
            total,
            self.worker_count,
            sizes
        );

        let mut batches = Vec::with_capacity(sizes.len());
        let mut next_frame = 0;

        for size in sizes {
            let mut frames = Vec::with_capacity(size);
            let mut exhausted = false;

            for _ in 0..size {
                match source.read_next() {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => {
                        exhausted = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Frame read failed at {}: {:#}", next_frame + frames.len(), e);
                        exhausted = true;
                        break;
                    }
                }
            }

            if !frames.is_empty() {
                let len = frames.len();
                batches.push(Batch {
                    index: batches.len(),
                    first_frame: next_frame,
                    frames,
                });
                next_frame += len;
            }

            if exhausted {
                tracing::warn!(
                    "Source ended after {} of {} reported frames",
                    next_frame,
                    total
                );
                break;
            }
        }

        Ok(batches)
    }
}
