use super::{FrameSink, FrameSize};
use anyhow::{anyhow, Context, Result};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::VideoWriter,
};
use std::path::Path;

/// MPEG-4 encoder backed by OpenCV's `VideoWriter`.
#[derive(Default)]
pub struct OpencvWriter {
    writer: Option<VideoWriter>,
    size: Option<FrameSize>,
}

impl FrameSink<Mat> for OpencvWriter {
    fn open(&mut self, path: &Path, fps: f64, size: FrameSize) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("Output path is not valid UTF-8: {:?}", path))?;
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            path_str,
            fourcc,
            fps,
            Size::new(size.width, size.height),
            true,
        )
        .with_context(|| format!("Failed to create video writer at: '{}'", path_str))?;

        if !writer.is_opened()? {
            return Err(anyhow!("Failed to open video writer at: '{}'", path_str));
        }

        tracing::info!("Writing output to {} ({} @ {:.2} fps)", path_str, size, fps);
        self.writer = Some(writer);
        self.size = Some(size);
        Ok(())
    }

    fn write(&mut self, frame: &Mat) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("Video writer is not open"))?;

        // VideoWriter silently drops frames of the wrong size.
        if let Some(expected) = self.size {
            let actual = frame.size()?;
            if actual.width != expected.width || actual.height != expected.height {
                return Err(anyhow!(
                    "Frame is {}x{}, writer expects {}",
                    actual.width,
                    actual.height,
                    expected
                ));
            }
        }

        writer.write(frame)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.release()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_before_open_fails() {
        let mut writer = OpencvWriter::default();
        assert!(writer.write(&Mat::default()).is_err());
        assert!(writer.close().is_ok());
    }
}
