// Concrete engines for the binary

use crate::pipeline::detection::ObjectDetector;
use crate::pipeline::engine::FrameTransform;
use anyhow::{anyhow, Result};
use opencv::core::{Mat, Point, Rect, Scalar};
use opencv::imgproc::{self, FONT_HERSHEY_SIMPLEX, LINE_8};
use opencv::prelude::*;
use std::path::Path;

/// Returns every frame unchanged. Measures pipeline overhead without a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl<F: Clone> FrameTransform<F> for Passthrough {
    fn transform(&mut self, frame: &F) -> Result<F> {
        Ok(frame.clone())
    }
}

/// Runs person detection and draws each hit onto a copy of the frame.
pub struct PersonOverlay {
    detector: ObjectDetector,
    min_conf: f32,
}

impl PersonOverlay {
    pub fn load(model_path: &str, min_conf: f32) -> Result<Self> {
        if !Path::new(model_path).exists() {
            return Err(anyhow!("Model file NOT FOUND at: {}", model_path));
        }
        let detector = ObjectDetector::new(model_path)
            .map_err(|e| anyhow!("Failed to load model: {}", e))?;
        Ok(Self { detector, min_conf })
    }
}

impl FrameTransform<Mat> for PersonOverlay {
    fn transform(&mut self, frame: &Mat) -> Result<Mat> {
        let detections = self.detector.detect(frame)?;
        let mut canvas = frame.try_clone()?;

        for d in detections
            .iter()
            .filter(|d| d.confidence >= self.min_conf)
            .filter(|d| d.class_name.as_deref() == Some("person"))
        {
            let rect = Rect::new(d.x as i32, d.y as i32, d.w as i32, d.h as i32);
            let color = Scalar::new(0.0, 255.0, 0.0, 0.0); // Green
            imgproc::rectangle(&mut canvas, rect, color, 2, LINE_8, 0)?;

            let label = format!("person {:.2}", d.confidence);
            let origin = Point::new(rect.x, (rect.y - 6).max(12));
            imgproc::put_text(
                &mut canvas,
                &label,
                origin,
                FONT_HERSHEY_SIMPLEX,
                0.5,
                color,
                1,
                LINE_8,
                false,
            )?;
        }

        Ok(canvas)
    }
}

/// The engine variants selectable from the command line.
pub enum MatEngine {
    Passthrough(Passthrough),
    PersonOverlay(PersonOverlay),
}

impl FrameTransform<Mat> for MatEngine {
    fn transform(&mut self, frame: &Mat) -> Result<Mat> {
        match self {
            MatEngine::Passthrough(engine) => engine.transform(frame),
            MatEngine::PersonOverlay(engine) => engine.transform(frame),
        }
    }
}
