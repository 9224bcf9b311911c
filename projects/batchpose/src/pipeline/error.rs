//! Failure classes of a processing run.

use thiserror::Error;

/// Errors raised by the batch pipeline and its I/O adapters.
///
/// Configuration and source errors are fatal and surface before any worker
/// starts. Engine and per-frame errors stay local to one worker and are only
/// logged and recorded in its report. Sink errors are fatal for the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Batch {batch_index}: engine acquisition failed: {reason}")]
    EngineAcquisition { batch_index: usize, reason: String },

    #[error("Frame {frame_index}: transform failed: {reason}")]
    FrameTransform { frame_index: usize, reason: String },

    #[error("Sink write failed after {written} frames: {reason}")]
    SinkWrite { written: usize, reason: String },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
