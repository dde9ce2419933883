//! Frame preprocessing: pixel format conversion and letterboxing into the detector tensor

use crate::error::{DetectionError, Result};
use crate::types::{ImageData, ImageFormat};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use rayon::prelude::*;

/// Value used for the letterbox padding (mid gray once normalized)
const PAD_VALUE: f32 = 0.5;
/// Triangle is several times faster than Lanczos3 and good enough for detection
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Placement of a resized frame inside the detector input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

/// Image preprocessor for preparing input data for the detector
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    /// Detector input size (width, height)
    input_size: (u32, u32),
}

impl ImagePreprocessor {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self { input_size }
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    /// Validate raw camera data and convert it to an RGB image
    pub fn to_rgb(&self, image: &ImageData) -> Result<RgbImage> {
        if !image.validate() {
            return Err(DetectionError::preprocessing(format!(
                "{}x{} {:?} frame has {} bytes, expected {}",
                image.width,
                image.height,
                image.format,
                image.data.len(),
                image.width as usize * image.height as usize * image.channels() as usize
            )));
        }

        let rgb: Vec<u8> = match image.format {
            ImageFormat::RGB => image.data.clone(),
            ImageFormat::BGR => image
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            ImageFormat::RGBA => image
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            ImageFormat::BGRA => image
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            ImageFormat::Grayscale => image.data.iter().flat_map(|&v| [v, v, v]).collect(),
        };

        RgbImage::from_raw(image.width, image.height, rgb)
            .ok_or_else(|| DetectionError::preprocessing("failed to build RGB image"))
    }

    /// Compute where a `width` x `height` frame lands inside the detector input
    pub fn letterbox_geometry(&self, width: u32, height: u32) -> Letterbox {
        let (input_w, input_h) = self.input_size;
        let scale = (input_w as f32 / width as f32).min(input_h as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_w);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_h);

        Letterbox {
            scale,
            width: new_w,
            height: new_h,
            offset_x: (input_w - new_w) / 2,
            offset_y: (input_h - new_h) / 2,
        }
    }

    /// Resize with preserved aspect ratio, pad, normalize to [0, 1].
    ///
    /// Output layout is `[1, 3, input_height, input_width]`.
    pub fn letterbox(&self, img: &RgbImage) -> Result<Array4<f32>> {
        let (input_w, input_h) = self.input_size;
        let geometry = self.letterbox_geometry(img.width(), img.height());
        let resized = image::imageops::resize(img, geometry.width, geometry.height, RESIZE_FILTER);

        let (w, h) = (input_w as usize, input_h as usize);
        let mut data = vec![PAD_VALUE; 3 * w * h];

        // One chunk per (channel, row)
        data.par_chunks_mut(w).enumerate().for_each(|(idx, row)| {
            let channel = idx / h;
            let y = (idx % h) as u32;
            if y < geometry.offset_y || y >= geometry.offset_y + geometry.height {
                return;
            }
            let src_y = y - geometry.offset_y;
            for src_x in 0..geometry.width {
                let px = resized.get_pixel(src_x, src_y);
                row[(geometry.offset_x + src_x) as usize] = px[channel] as f32 / 255.0;
            }
        });

        Array4::from_shape_vec((1, 3, h, w), data).map_err(|e| {
            DetectionError::preprocessing(format!("Failed to build input tensor: {}", e))
        })
    }
}
