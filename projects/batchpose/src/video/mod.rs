pub mod opencv_reader;
pub mod opencv_writer;
pub mod processor;

use crate::pipeline::error::PipelineError;
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Pixel dimensions of a frame, written as `WIDTHxHEIGHT` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameSize {
    pub width: i32,
    pub height: i32,
}

impl FrameSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for FrameSize {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            PipelineError::InvalidConfiguration(format!(
                "resolution must look like 640x480, got '{}'",
                s
            ))
        };
        let (w, h) = s
            .trim()
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(invalid)?;
        let width: i32 = w.trim().parse().map_err(|_| invalid())?;
        let height: i32 = h.trim().parse().map_err(|_| invalid())?;
        if width <= 0 || height <= 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// Ordered, finite producer of frames.
pub trait FrameSource<F>: Send {
    /// Number of frames the source reports up front.
    fn frame_count(&self) -> Result<usize>;
    fn source_fps(&self) -> Result<f64>;
    fn frame_size(&self) -> Result<FrameSize>;
    /// Next frame in order, or `None` at end of stream.
    fn read_next(&mut self) -> Result<Option<F>>;
}

/// Consumer of the final ordered frames (video encoder).
pub trait FrameSink<F> {
    fn open(&mut self, path: &Path, fps: f64, size: FrameSize) -> Result<()>;
    fn write(&mut self, frame: &F) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}
