use crate::pipeline::error::PipelineError;
use crate::video::FrameSize;
use anyhow::Result;
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH},
};
use std::time::Duration;

/// Something a producer thread can poll in a loop.
pub trait Sensor: Send {
    type Output: Send;

    /// Blocks until the next reading is available.
    fn get(&mut self) -> Result<Option<Self::Output>>;

    fn release(&mut self) {}
}

/// Synthetic sensor: a counter that ticks once per `delay`.
pub struct CounterSensor {
    delay: Duration,
    value: u64,
}

impl CounterSensor {
    pub fn new(delay: Duration) -> Self {
        Self { delay, value: 0 }
    }
}

impl Sensor for CounterSensor {
    type Output = u64;

    fn get(&mut self) -> Result<Option<u64>> {
        std::thread::sleep(self.delay);
        self.value += 1;
        Ok(Some(self.value))
    }
}

pub struct CameraSensor {
    capture: VideoCapture,
}

impl CameraSensor {
    pub fn open(index: i32, resolution: FrameSize) -> Result<Self, PipelineError> {
        let unavailable = |reason: String| {
            PipelineError::SourceUnavailable(format!("camera {}: {}", index, reason))
        };

        let mut capture =
            VideoCapture::new(index, CAP_ANY).map_err(|e| unavailable(e.to_string()))?;
        if !capture.is_opened().map_err(|e| unavailable(e.to_string()))? {
            return Err(unavailable("device could not be opened".to_string()));
        }

        // Drivers may pick the nearest supported mode instead.
        let requested = capture
            .set(CAP_PROP_FRAME_WIDTH, resolution.width as f64)
            .and_then(|_| capture.set(CAP_PROP_FRAME_HEIGHT, resolution.height as f64));
        if let Err(e) = requested {
            tracing::warn!("Camera {} rejected resolution {}: {}", index, resolution, e);
        }

        tracing::info!("Camera {} opened at requested {}", index, resolution);
        Ok(Self { capture })
    }
}

impl Sensor for CameraSensor {
    type Output = Mat;

    fn get(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release camera: {}", e);
        }
    }
}
