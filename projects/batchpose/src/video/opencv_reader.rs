use super::{FrameSize, FrameSource};
use crate::pipeline::error::PipelineError;
use anyhow::Result;
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_FRAME_HEIGHT,
        CAP_PROP_FRAME_WIDTH,
    },
};
use std::path::Path;

/// Decodes a video file frame by frame, optionally normalizing every frame to one size.
pub struct OpencvReader {
    capture: VideoCapture,
    source_fps: f64,
    total_frames: usize,
    native_size: FrameSize,
    target_size: Option<FrameSize>,
}

impl OpencvReader {
    pub fn open(path: &Path, target_size: Option<FrameSize>) -> Result<Self, PipelineError> {
        let unavailable = |reason: String| {
            PipelineError::SourceUnavailable(format!("{}: {}", path.display(), reason))
        };

        if !path.exists() {
            return Err(unavailable("file not found".to_string()));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| unavailable("path is not valid UTF-8".to_string()))?;

        let capture = VideoCapture::from_file(path_str, CAP_ANY)
            .map_err(|e| unavailable(e.to_string()))?;
        if !capture.is_opened().map_err(|e| unavailable(e.to_string()))? {
            return Err(unavailable("decoder could not open the file".to_string()));
        }

        let read_prop = |prop: i32| capture.get(prop).map_err(|e| unavailable(e.to_string()));
        let mut fps = read_prop(CAP_PROP_FPS)?;
        if fps <= 0.0 {
            tracing::warn!("OpencvReader: Failed to get FPS from metadata, falling back to 30.0");
            fps = 30.0;
        }
        let raw_count = read_prop(CAP_PROP_FRAME_COUNT)?.max(0.0) as usize;
        let native_size = FrameSize::new(
            read_prop(CAP_PROP_FRAME_WIDTH)? as i32,
            read_prop(CAP_PROP_FRAME_HEIGHT)? as i32,
        );

        tracing::info!(
            "OpencvReader: opened {}, duration={:.2}s, fps={:.2}, frames={}, size={}",
            path.display(),
            raw_count as f64 / fps,
            fps,
            raw_count,
            native_size
        );

        Ok(Self {
            capture,
            source_fps: fps,
            total_frames: raw_count,
            native_size,
            target_size,
        })
    }

    fn normalize(&self, frame: Mat) -> Result<Mat> {
        let Some(target) = self.target_size else {
            return Ok(frame);
        };
        let size = frame.size()?;
        if size.width == target.width && size.height == target.height {
            return Ok(frame);
        }

        let mut resized = Mat::default();
        imgproc::resize(
            &frame,
            &mut resized,
            Size::new(target.width, target.height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
        Ok(resized)
    }
}

impl FrameSource<Mat> for OpencvReader {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.total_frames)
    }

    fn source_fps(&self) -> Result<f64> {
        Ok(self.source_fps)
    }

    fn frame_size(&self) -> Result<FrameSize> {
        Ok(self.target_size.unwrap_or(self.native_size))
    }

    fn read_next(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame)?;
        if !success || frame.empty() {
            return Ok(None);
        }
        self.normalize(frame).map(Some)
    }
}

impl Drop for OpencvReader {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("OpencvReader: failed to release capture: {}", e);
        }
    }
}
