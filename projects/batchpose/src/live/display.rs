use super::LatestSlot;
use crate::pipeline::types::CancelToken;
use anyhow::Result;
use opencv::{
    core::{Mat, Point, Scalar},
    highgui,
    imgproc::{self, FONT_HERSHEY_SIMPLEX, LINE_8},
};
use std::time::Duration;

const WINDOW_NAME: &str = "batchpose live";

/// On-screen window showing the newest camera frame with sensor readings on top.
pub struct Dashboard {
    values: Vec<u64>,
    period: Duration,
}

impl Dashboard {
    pub fn open(sensor_count: usize, frequency: f64) -> Result<Self> {
        highgui::named_window(WINDOW_NAME, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            values: vec![0; sensor_count],
            period: Duration::from_secs_f64(1.0 / frequency),
        })
    }

    /// Refreshes at the configured rate until `q` is pressed or `cancel` is set.
    pub fn run(
        &mut self,
        camera: &LatestSlot<Mat>,
        sensors: &[LatestSlot<u64>],
        cancel: &CancelToken,
    ) -> Result<()> {
        while !cancel.is_cancelled() {
            if let Some(mut frame) = camera.take() {
                for (value, slot) in self.values.iter_mut().zip(sensors) {
                    if let Some(latest) = slot.take() {
                        *value = latest;
                    }
                }
                self.draw(&mut frame)?;
                highgui::imshow(WINDOW_NAME, &frame)?;
            }

            if highgui::wait_key(1)? == 'q' as i32 {
                tracing::info!("Quit requested from the display window");
                cancel.cancel();
                break;
            }
            std::thread::sleep(self.period);
        }
        Ok(())
    }

    fn draw(&self, frame: &mut Mat) -> Result<()> {
        let red = Scalar::new(0.0, 0.0, 255.0, 0.0);
        for (i, line) in overlay_lines(&self.values).iter().enumerate() {
            let origin = Point::new(50, 50 + 30 * i as i32);
            imgproc::put_text(
                frame,
                line,
                origin,
                FONT_HERSHEY_SIMPLEX,
                0.7,
                red,
                2,
                LINE_8,
                false,
            )?;
        }
        Ok(())
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        if let Err(e) = highgui::destroy_window(WINDOW_NAME) {
            tracing::warn!("Failed to close display window: {}", e);
        }
    }
}

fn overlay_lines(values: &[u64]) -> Vec<String> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| format!("Sensor {}: {}", i + 1, v))
        .collect()
}
