//! Image extractors. Apply to still images and video frames alike.

use image::RgbaImage;

use super::{unsupported, Extractor, FeatureValue};
use crate::core::error::FeatureError;
use crate::core::stim::{Stim, StimKind};

const IMAGE_KINDS: [StimKind; 1] = [StimKind::Image];

/// ITU-R BT.601 luma, 0-255.
fn luma(image: &RgbaImage) -> Vec<u8> {
    image
        .pixels()
        .map(|p| {
            let [r, g, b, _] = p.0;
            ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
        })
        .collect()
}

fn image_of<'a>(extractor: &dyn Extractor, stim: &'a Stim) -> Result<&'a RgbaImage, FeatureError> {
    stim.as_image()
        .ok_or_else(|| unsupported(extractor.id(), stim.kind()))
}

/// Mean luminance, scaled to [0, 1].
#[derive(Debug, Clone, Default)]
pub struct BrightnessExtractor;

impl BrightnessExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for BrightnessExtractor {
    fn id(&self) -> &str {
        "BrightnessExtractor"
    }

    fn input_kinds(&self) -> &[StimKind] {
        &IMAGE_KINDS
    }

    fn extract(&self, stim: &Stim) -> Result<Vec<(String, FeatureValue)>, FeatureError> {
        let gray = luma(image_of(self, stim)?);
        let brightness = if gray.is_empty() {
            0.0
        } else {
            gray.iter().map(|&v| v as f64).sum::<f64>() / (gray.len() as f64 * 255.0)
        };
        Ok(vec![("brightness".to_string(), brightness.into())])
    }
}

/// Share of pixels sitting on a strong luminance gradient.
#[derive(Debug, Clone)]
pub struct SharpnessExtractor {
    edge_threshold: f32,
}

impl SharpnessExtractor {
    pub fn new() -> Self {
        Self {
            edge_threshold: 0.08,
        }
    }

    pub fn with_threshold(edge_threshold: f32) -> Self {
        Self { edge_threshold }
    }

    /// Central-difference gradients compared in squared integer space (no sqrt).
    fn edge_density(&self, gray: &[u8], width: u32, height: u32) -> f64 {
        let w = width as usize;
        let h = height as usize;
        if w < 3 || h < 3 {
            return 0.0;
        }

        let threshold = (self.edge_threshold * 255.0) as i32;
        let threshold_squared = threshold * threshold;
        let mut edge_count = 0usize;
        let mut total = 0usize;

        for y in 1..(h - 1) {
            for x in 1..(w - 1) {
                let idx = y * w + x;
                let gx = gray[idx + 1] as i32 - gray[idx - 1] as i32;
                let gy = gray[idx + w] as i32 - gray[idx - w] as i32;
                if gx * gx + gy * gy > threshold_squared {
                    edge_count += 1;
                }
                total += 1;
            }
        }

        edge_count as f64 / total as f64
    }
}

impl Default for SharpnessExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for SharpnessExtractor {
    fn id(&self) -> &str {
        "SharpnessExtractor"
    }

    fn input_kinds(&self) -> &[StimKind] {
        &IMAGE_KINDS
    }

    fn extract(&self, stim: &Stim) -> Result<Vec<(String, FeatureValue)>, FeatureError> {
        let image = image_of(self, stim)?;
        let gray = luma(image);
        let sharpness = self.edge_density(&gray, image.width(), image.height());
        Ok(vec![("sharpness".to_string(), sharpness.into())])
    }
}
