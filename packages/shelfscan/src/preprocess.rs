//! Image variants fed to OCR. Shelf labels are small, curved and glossy, so the
//! same crop is read several times under different enhancements.
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::{box_filter, median_filter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PreprocessVariant {
    Grayscale,
    /// Contrast stretch in percent followed by a brightness offset.
    Contrast { contrast: f32, brightness: i32 },
    /// Pixel is white when brighter than its neighbourhood mean minus `offset`.
    AdaptiveThreshold { block_radius: u32, offset: u8 },
    /// Global binarisation at the Otsu level.
    Otsu,
    Denoise { radius: u32 },
    Gamma { gamma: f32 },
    /// White text on dark cans reads better inverted.
    Inverted,
}

impl PreprocessVariant {
    pub fn defaults() -> Vec<PreprocessVariant> {
        vec![
            PreprocessVariant::Grayscale,
            PreprocessVariant::Contrast {
                contrast: 50.0,
                brightness: 10,
            },
            PreprocessVariant::AdaptiveThreshold {
                block_radius: 15,
                offset: 10,
            },
            PreprocessVariant::Otsu,
            PreprocessVariant::Denoise { radius: 1 },
            PreprocessVariant::Gamma { gamma: 1.5 },
            PreprocessVariant::Inverted,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PreprocessVariant::Grayscale => "grayscale",
            PreprocessVariant::Contrast { .. } => "contrast",
            PreprocessVariant::AdaptiveThreshold { .. } => "adaptive_threshold",
            PreprocessVariant::Otsu => "otsu",
            PreprocessVariant::Denoise { .. } => "denoise",
            PreprocessVariant::Gamma { .. } => "gamma",
            PreprocessVariant::Inverted => "inverted",
        }
    }

    pub fn apply(&self, gray: &GrayImage) -> GrayImage {
        match *self {
            PreprocessVariant::Grayscale => gray.clone(),
            PreprocessVariant::Contrast {
                contrast,
                brightness,
            } => imageops::brighten(&imageops::contrast(gray, contrast), brightness),
            PreprocessVariant::AdaptiveThreshold {
                block_radius,
                offset,
            } => adaptive_threshold(gray, block_radius, offset),
            PreprocessVariant::Otsu => {
                let level = otsu_level(gray);
                binarize(gray, |value, _, _| value > level)
            }
            PreprocessVariant::Denoise { radius } => median_filter(gray, radius, radius),
            PreprocessVariant::Gamma { gamma } => apply_gamma(gray, gamma),
            PreprocessVariant::Inverted => {
                let mut inverted = gray.clone();
                imageops::invert(&mut inverted);
                inverted
            }
        }
    }
}

fn binarize<F>(gray: &GrayImage, white: F) -> GrayImage
where
    F: Fn(u8, u32, u32) -> bool,
{
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0];
        Luma([if white(value, x, y) { 255 } else { 0 }])
    })
}

fn adaptive_threshold(gray: &GrayImage, block_radius: u32, offset: u8) -> GrayImage {
    let local_mean = box_filter(gray, block_radius, block_radius);
    binarize(gray, |value, x, y| {
        let mean = local_mean.get_pixel(x, y)[0];
        value as i16 > mean as i16 - offset as i16
    })
}

fn apply_gamma(gray: &GrayImage, gamma: f32) -> GrayImage {
    let gamma = if gamma.is_finite() && gamma > 0.0 { gamma } else { 1.0 };
    let lut: Vec<u8> = (0..=255u32)
        .map(|v| ((v as f32 / 255.0).powf(1.0 / gamma) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = lut[pixel[0] as usize];
    }
    out
}

/// Converts a crop to grayscale and upscales it by `factor`.
pub fn prepare_crop(crop: &DynamicImage, factor: f32) -> GrayImage {
    let gray = crop.to_luma8();
    let factor = if factor.is_finite() && factor > 1.0 { factor } else { 1.0 };
    if factor == 1.0 {
        return gray;
    }
    let width = ((gray.width() as f32 * factor).round() as u32).max(1);
    let height = ((gray.height() as f32 * factor).round() as u32).max(1);
    imageops::resize(&gray, width, height, FilterType::CatmullRom)
}
