use anyhow::{anyhow, Result};
use image::{DynamicImage, ImageBuffer, Rgb};
use opencv::core::Mat;
use opencv::prelude::*;
use usls::models::RTDETR;
use usls::{Config, Image};

/// A detection in frame pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub class_name: Option<String>,
}

/// A wrapper around the USLS RT-DETR model that handles BGR-to-RGB conversion
/// and corrects for aspect-ratio padding bugs in the underlying model library.
pub struct ObjectDetector {
    model: RTDETR,
}

impl ObjectDetector {
    pub fn new(model_path: &str) -> Result<Self> {
        let config = Config::default()
            .with_model_file(model_path)
            .with_class_names(&usls::NAMES_COCO_80);

        #[cfg(target_os = "macos")]
        let config = config.with_model_device(usls::Device::CoreMl);

        let config = config.commit()?;
        let model = RTDETR::new(config)?;
        Ok(Self { model })
    }

    /// Run detection on one BGR frame.
    pub fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let size = frame.size()?;
        let (x_corr, y_corr) = padding_correction(size.width as f32, size.height as f32);

        let input = Image::from(mat_to_dynamic_image(frame)?);
        let results = self.model.forward(std::slice::from_ref(&input))?;
        let Some(y) = results.into_iter().next() else {
            return Ok(Vec::new());
        };

        Ok(y.hbbs
            .into_iter()
            .map(|hbb| Detection {
                x: hbb.xmin() * x_corr,
                y: hbb.ymin() * y_corr,
                w: hbb.width() * x_corr,
                h: hbb.height() * y_corr,
                confidence: hbb.confidence().unwrap_or(0.0),
                class_name: hbb.name().map(|s| s.to_string()),
            })
            .collect())
    }
}

/// Scale factors undoing the square letterboxing RT-DETR boxes come back in.
fn padding_correction(width: f32, height: f32) -> (f32, f32) {
    if width > height {
        (width / height, 1.0)
    } else if height > width {
        (1.0, height / width)
    } else {
        (1.0, 1.0)
    }
}

/// Convert an OpenCV Mat (BGR) to an image::DynamicImage (RGB)
fn mat_to_dynamic_image(mat: &Mat) -> Result<DynamicImage> {
    let mut rgb_mat = Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    let img_buffer =
        ImageBuffer::<Rgb<u8>, _>::from_vec(size.width as u32, size.height as u32, buffer)
            .ok_or_else(|| anyhow!("Failed to create ImageBuffer from Mat data"))?;

    Ok(DynamicImage::ImageRgb8(img_buffer))
}
