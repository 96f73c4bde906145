//! Pixel-level primitives shared by the reader, aligner, detector and classifier.
//!
//! Everything here operates on `image` buffers or on `FloatImage`, a plain
//! row-major `f32` plane used for filter responses. Borders are handled by
//! replicating the outermost row/column.

mod clahe;
mod color;
mod contours;
mod edges;
mod filters;
mod similarity;

pub use clahe::clahe;
pub use color::{rgb_to_hsv, ColorProfile};
pub use contours::{external_regions, Region};
pub use edges::{canny, dilate};
pub use filters::{
    gaussian_blur3, gaussian_blur3_rgb, laplacian, median3_rgb, sharpen_rgb, sobel, FloatImage, GAUSSIAN_3X3,
};
pub use similarity::structural_similarity;

use image::{GrayImage, Luma, RgbImage};

/// ITU-R BT.601 luma, matching the usual RGB → gray conversion.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

pub fn to_gray(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        Luma([luma(p[0], p[1], p[2])])
    })
}

/// Apply a 256-entry lookup table to every channel.
pub fn apply_lut(rgb: &mut RgbImage, lut: &[u8; 256]) {
    for p in rgb.pixels_mut() {
        p[0] = lut[p[0] as usize];
        p[1] = lut[p[1] as usize];
        p[2] = lut[p[2] as usize];
    }
}

/// Gamma correction table: `out = 255 * (in / 255) ^ (1 / gamma)`.
pub fn gamma_lut(gamma: f32) -> [u8; 256] {
    let inv = 1.0 / gamma.max(1e-3);
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as f32 / 255.0).powf(inv) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn gray_conversion_of_white_and_black() {
        let mut img = RgbImage::from_pixel(2, 1, Rgb([255, 255, 255]));
        img.put_pixel(1, 0, Rgb([0, 0, 0]));
        let g = to_gray(&img);
        assert_eq!(g.get_pixel(0, 0)[0], 255);
        assert_eq!(g.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn gamma_lut_keeps_endpoints_and_brightens() {
        let lut = gamma_lut(1.2);
        assert_eq!(lut[0], 0);
        assert_eq!(lut[255], 255);
        assert!(lut[100] > 100);
    }
}
