use image::{GrayImage, Luma, Rgb, RgbImage};

/// 3x3 binomial approximation of a Gaussian (sigma ~0.85).
pub const GAUSSIAN_3X3: [[f32; 3]; 3] = [
    [1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0],
    [2.0 / 16.0, 4.0 / 16.0, 2.0 / 16.0],
    [1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0],
];

const LAPLACIAN_3X3: [[f32; 3]; 3] = [[0.0, 1.0, 0.0], [1.0, -4.0, 1.0], [0.0, 1.0, 0.0]];
const SOBEL_X: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_Y: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Row-major single-channel `f32` plane.
#[derive(Clone, Debug, PartialEq)]
pub struct FloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        Self {
            width: gray.width() as usize,
            height: gray.height() as usize,
            data: gray.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.data[y * self.width + x] = value;
    }

    #[inline]
    fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[cy * self.width + cx]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }

    /// Population variance of all samples.
    pub fn variance(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.data
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.data.len() as f64
    }

    /// Correlate with a 3x3 kernel, replicating the border.
    pub fn convolve3(&self, kernel: &[[f32; 3]; 3]) -> FloatImage {
        let mut out = FloatImage::new(self.width, self.height);
        if self.data.is_empty() {
            return out;
        }
        for y in 0..self.height {
            for x in 0..self.width {
                let mut acc = 0.0;
                for (ky, row) in kernel.iter().enumerate() {
                    for (kx, weight) in row.iter().enumerate() {
                        if *weight == 0.0 {
                            continue;
                        }
                        let sx = x as isize + kx as isize - 1;
                        let sy = y as isize + ky as isize - 1;
                        acc += weight * self.get_clamped(sx, sy);
                    }
                }
                out.data[y * self.width + x] = acc;
            }
        }
        out
    }

    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            Luma([self.get(x as usize, y as usize).round().clamp(0.0, 255.0) as u8])
        })
    }
}

pub fn gaussian_blur3(img: &FloatImage) -> FloatImage {
    img.convolve3(&GAUSSIAN_3X3)
}

pub fn laplacian(img: &FloatImage) -> FloatImage {
    img.convolve3(&LAPLACIAN_3X3)
}

/// Horizontal and vertical Sobel responses.
pub fn sobel(img: &FloatImage) -> (FloatImage, FloatImage) {
    (img.convolve3(&SOBEL_X), img.convolve3(&SOBEL_Y))
}

/// Per-channel 3x3 median filter.
pub fn median3_rgb(rgb: &RgbImage) -> RgbImage {
    let (w, h) = (rgb.width() as i64, rgb.height() as i64);
    RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let mut out = [0u8; 3];
        for (c, slot) in out.iter_mut().enumerate() {
            let mut window = [0u8; 9];
            let mut n = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let sx = (x as i64 + dx).clamp(0, w - 1) as u32;
                    let sy = (y as i64 + dy).clamp(0, h - 1) as u32;
                    window[n] = rgb.get_pixel(sx, sy)[c];
                    n += 1;
                }
            }
            window.sort_unstable();
            *slot = window[4];
        }
        Rgb(out)
    })
}

/// 3x3 Gaussian per channel, border replicated.
pub fn gaussian_blur3_rgb(rgb: &RgbImage) -> RgbImage {
    RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let mean = gaussian_at(rgb, x, y);
        Rgb([
            mean[0].round().clamp(0.0, 255.0) as u8,
            mean[1].round().clamp(0.0, 255.0) as u8,
            mean[2].round().clamp(0.0, 255.0) as u8,
        ])
    })
}

/// Unsharp mask: `out = v + strength * (v - gaussian(v))`.
///
/// `strength` is the fraction of local detail added back, so 0.25 lifts
/// edges by a quarter of their height above the blurred surroundings.
pub fn sharpen_rgb(rgb: &RgbImage, strength: f32) -> RgbImage {
    RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let blurred = gaussian_at(rgb, x, y);
        let p = rgb.get_pixel(x, y);
        let mut out = [0u8; 3];
        for (c, slot) in out.iter_mut().enumerate() {
            let v = p[c] as f32;
            *slot = (v + strength * (v - blurred[c])).round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

fn gaussian_at(rgb: &RgbImage, x: u32, y: u32) -> [f32; 3] {
    let (w, h) = (rgb.width() as i64, rgb.height() as i64);
    let mut acc = [0f32; 3];
    for (ky, row) in GAUSSIAN_3X3.iter().enumerate() {
        for (kx, weight) in row.iter().enumerate() {
            let sx = (x as i64 + kx as i64 - 1).clamp(0, w - 1) as u32;
            let sy = (y as i64 + ky as i64 - 1).clamp(0, h - 1) as u32;
            let p = rgb.get_pixel(sx, sy);
            for (a, v) in acc.iter_mut().zip(p.0.iter()) {
                *a += weight * *v as f32;
            }
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laplacian_of_flat_image_is_zero() {
        let img = FloatImage::from_gray(&GrayImage::from_pixel(8, 8, Luma([90])));
        let lap = laplacian(&img);
        assert!(lap.data().iter().all(|v| v.abs() < 1e-6));
        assert_eq!(lap.variance(), 0.0);
    }

    #[test]
    fn sobel_responds_to_vertical_edge() {
        let gray = GrayImage::from_fn(8, 8, |x, _| Luma([if x < 4 { 0 } else { 100 }]));
        let (gx, gy) = sobel(&FloatImage::from_gray(&gray));
        assert!(gx.get(4, 4) > 0.0);
        assert!(gy.get(4, 4).abs() < 1e-6);
    }

    #[test]
    fn median_removes_salt_noise() {
        let mut rgb = RgbImage::from_pixel(5, 5, Rgb([40, 40, 40]));
        rgb.put_pixel(2, 2, Rgb([255, 255, 255]));
        let filtered = median3_rgb(&rgb);
        assert_eq!(filtered.get_pixel(2, 2), &Rgb([40, 40, 40]));
    }

    #[test]
    fn gaussian_flattens_pixel_checkerboard() {
        let rgb = RgbImage::from_fn(6, 6, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([240, 240, 240])
            } else {
                Rgb([150, 150, 150])
            }
        });
        let blurred = gaussian_blur3_rgb(&rgb);
        for y in 1..5 {
            for x in 1..5 {
                assert_eq!(blurred.get_pixel(x, y), &Rgb([195, 195, 195]));
            }
        }
    }

    #[test]
    fn unsharp_lifts_a_step_by_strength() {
        let rgb = RgbImage::from_fn(8, 3, |x, _| {
            if x < 4 {
                Rgb([100, 100, 100])
            } else {
                Rgb([180, 180, 180])
            }
        });
        let out = sharpen_rgb(&rgb, 0.25);
        // Blur at x=4 is 100/4 + 180*3/4 = 160; 180 + 0.25 * 20 = 185.
        assert_eq!(out.get_pixel(4, 1)[0], 185);
        assert_eq!(out.get_pixel(3, 1)[0], 95);
        assert_eq!(out.get_pixel(0, 1)[0], 100);
        assert_eq!(out.get_pixel(7, 1)[0], 180);
    }

    #[test]
    fn sharpen_keeps_flat_regions() {
        let rgb = RgbImage::from_pixel(4, 4, Rgb([120, 60, 30]));
        assert_eq!(sharpen_rgb(&rgb, 0.25), rgb);
        assert_eq!(sharpen_rgb(&rgb, 1.0), rgb);
    }
}
