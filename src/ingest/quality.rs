//! Blur gate and frame enhancement.

use image::{GrayImage, RgbImage, Rgb};

use crate::config::QualitySettings;
use crate::imaging::{self, FloatImage};

/// Laplacian variance below which enhancement sharpens more aggressively.
const SOFT_FRAME_VARIANCE: f64 = 100.0;
const SHARPEN_SOFT: f32 = 0.5;
const SHARPEN_CRISP: f32 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SharpnessScore {
    /// Variance of the 4-neighbour Laplacian response.
    pub laplacian_var: f64,
    /// Variance of the Sobel gradient magnitude.
    pub sobel_var: f64,
}

pub fn measure_sharpness(gray: &GrayImage) -> SharpnessScore {
    let img = FloatImage::from_gray(gray);
    let laplacian_var = imaging::laplacian(&img).variance();
    let (gx, gy) = imaging::sobel(&img);
    let mut magnitude = FloatImage::new(img.width(), img.height());
    for y in 0..img.height() {
        for x in 0..img.width() {
            let (dx, dy) = (gx.get(x, y), gy.get(x, y));
            magnitude.set(x, y, (dx * dx + dy * dy).sqrt());
        }
    }
    SharpnessScore {
        laplacian_var,
        sobel_var: magnitude.variance(),
    }
}

/// A frame is blurry when its Laplacian variance is under the threshold and,
/// with the Sobel check enabled, its gradient variance is under twice the
/// threshold as well.
pub fn is_blurry(score: &SharpnessScore, settings: &QualitySettings) -> bool {
    let t = settings.blur_threshold;
    if score.laplacian_var >= t {
        return false;
    }
    !settings.use_sobel || score.sobel_var < 2.0 * t
}

/// Deterministic cosmetic enhancement: median denoise, CLAHE on luma,
/// unsharp masking (stronger for soft frames) and a gamma lift.
/// Geometry is never changed.
pub fn enhance(rgb: &RgbImage, score: &SharpnessScore, settings: &QualitySettings) -> RgbImage {
    let denoised = imaging::median3_rgb(rgb);

    let gray = imaging::to_gray(&denoised);
    let equalised = imaging::clahe(&gray, settings.clahe_clip_limit, settings.clahe_tiles);
    let mut contrasted = denoised;
    for (x, y, p) in contrasted.enumerate_pixels_mut() {
        let delta = equalised.get_pixel(x, y)[0] as i16 - gray.get_pixel(x, y)[0] as i16;
        *p = Rgb([
            (p[0] as i16 + delta).clamp(0, 255) as u8,
            (p[1] as i16 + delta).clamp(0, 255) as u8,
            (p[2] as i16 + delta).clamp(0, 255) as u8,
        ]);
    }

    let strength = if score.laplacian_var < SOFT_FRAME_VARIANCE {
        SHARPEN_SOFT
    } else {
        SHARPEN_CRISP
    };
    let mut sharpened = imaging::sharpen_rgb(&contrasted, strength);
    imaging::apply_lut(&mut sharpened, &imaging::gamma_lut(settings.gamma));
    sharpened
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use image::Luma;

    fn checkerboard(cell: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            Luma([if ((x / cell) + (y / cell)) % 2 == 0 { 30 } else { 220 }])
        })
    }

    #[test]
    fn flat_frame_is_blurry() {
        let settings = PipelineConfig::default().quality;
        let score = measure_sharpness(&GrayImage::from_pixel(32, 32, Luma([128])));
        assert_eq!(score.laplacian_var, 0.0);
        assert!(is_blurry(&score, &settings));
    }

    #[test]
    fn textured_frame_passes() {
        let settings = PipelineConfig::default().quality;
        let score = measure_sharpness(&checkerboard(4));
        assert!(score.laplacian_var > settings.blur_threshold);
        assert!(!is_blurry(&score, &settings));
    }

    #[test]
    fn zero_threshold_accepts_everything() {
        let mut settings = PipelineConfig::default().quality;
        settings.blur_threshold = 0.0;
        let score = measure_sharpness(&GrayImage::from_pixel(8, 8, Luma([10])));
        assert!(!is_blurry(&score, &settings));
    }

    #[test]
    fn sobel_rescues_soft_but_structured_frames() {
        let mut settings = PipelineConfig::default().quality;
        let score = SharpnessScore {
            laplacian_var: 50.0,
            sobel_var: 500.0,
        };
        assert!(!is_blurry(&score, &settings));
        settings.use_sobel = false;
        assert!(is_blurry(&score, &settings));
    }

    #[test]
    fn enhancement_keeps_dimensions() {
        let settings = PipelineConfig::default().quality;
        let rgb = RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 5) as u8, (y * 7) as u8, 90]));
        let score = measure_sharpness(&imaging::to_gray(&rgb));
        let out = enhance(&rgb, &score, &settings);
        assert_eq!(out.dimensions(), rgb.dimensions());
    }
}
