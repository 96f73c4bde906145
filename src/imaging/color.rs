use image::RgbImage;

/// Convert RGB to HSV. Returns `(H: 0-360, S: 0-100, V: 0-255)`.
#[inline]
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (rf, gf, bf) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let hue = if delta < 1e-6 {
        0.0
    } else if (max - rf).abs() < 1e-6 {
        60.0 * ((gf - bf) / delta).rem_euclid(6.0)
    } else if (max - gf).abs() < 1e-6 {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };
    let saturation = if max < 1e-6 { 0.0 } else { delta / max * 100.0 };
    (hue, saturation, max * 255.0)
}

/// Colour signature of a set of pixels: mean values plus the share of pixels
/// falling into each road-paint colour mask.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColorProfile {
    pub mean_rgb: [f32; 3],
    /// Mean HSV value channel, 0-255.
    pub brightness: f32,
    /// Mean HSV saturation, 0-100.
    pub saturation: f32,
    pub white_ratio: f32,
    pub yellow_ratio: f32,
    pub green_ratio: f32,
    pub red_ratio: f32,
}

impl ColorProfile {
    pub fn of_pixels(rgb: &RgbImage, pixels: &[(u32, u32)]) -> Self {
        if pixels.is_empty() {
            return Self::default();
        }
        let mut sum = [0f64; 3];
        let (mut v_sum, mut s_sum) = (0f64, 0f64);
        let (mut white, mut yellow, mut green, mut red) = (0usize, 0usize, 0usize, 0usize);
        for &(x, y) in pixels {
            let p = rgb.get_pixel(x, y);
            sum[0] += p[0] as f64;
            sum[1] += p[1] as f64;
            sum[2] += p[2] as f64;
            let (h, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
            v_sum += v as f64;
            s_sum += s as f64;
            if is_white(s, v) {
                white += 1;
            } else if is_yellow(h, s, v) {
                yellow += 1;
            } else if is_green(h, s, v) {
                green += 1;
            } else if is_red(h, s, v) {
                red += 1;
            }
        }
        let n = pixels.len() as f64;
        Self {
            mean_rgb: [
                (sum[0] / n) as f32,
                (sum[1] / n) as f32,
                (sum[2] / n) as f32,
            ],
            brightness: (v_sum / n) as f32,
            saturation: (s_sum / n) as f32,
            white_ratio: (white as f64 / n) as f32,
            yellow_ratio: (yellow as f64 / n) as f32,
            green_ratio: (green as f64 / n) as f32,
            red_ratio: (red as f64 / n) as f32,
        }
    }
}

#[inline]
fn is_white(s: f32, v: f32) -> bool {
    s <= 25.0 && v >= 140.0
}

#[inline]
fn is_yellow(h: f32, s: f32, v: f32) -> bool {
    (35.0..=70.0).contains(&h) && s >= 40.0 && v >= 100.0
}

#[inline]
fn is_green(h: f32, s: f32, v: f32) -> bool {
    (80.0..=170.0).contains(&h) && s >= 35.0 && v >= 50.0
}

// Red through orange: cones, barrels, warning paint.
#[inline]
fn is_red(h: f32, s: f32, v: f32) -> bool {
    (h <= 30.0 || h >= 335.0) && s >= 45.0 && v >= 80.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn hsv_primaries() {
        let (h, s, v) = rgb_to_hsv(255, 0, 0);
        assert!(h.abs() < 1e-3 && (s - 100.0).abs() < 1e-3 && (v - 255.0).abs() < 1e-3);
        let (h, _, _) = rgb_to_hsv(0, 255, 0);
        assert!((h - 120.0).abs() < 1e-3);
        let (h, _, _) = rgb_to_hsv(0, 0, 255);
        assert!((h - 240.0).abs() < 1e-3);
        let (_, s, _) = rgb_to_hsv(128, 128, 128);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn profile_counts_masks() {
        let mut img = RgbImage::from_pixel(4, 1, Rgb([240, 240, 240]));
        img.put_pixel(1, 0, Rgb([230, 200, 40]));
        img.put_pixel(2, 0, Rgb([50, 200, 50]));
        img.put_pixel(3, 0, Rgb([60, 60, 60]));
        let pixels: Vec<_> = (0..4).map(|x| (x, 0)).collect();
        let profile = ColorProfile::of_pixels(&img, &pixels);
        assert!((profile.white_ratio - 0.25).abs() < 1e-6);
        assert!((profile.yellow_ratio - 0.25).abs() < 1e-6);
        assert!((profile.green_ratio - 0.25).abs() < 1e-6);
        assert_eq!(profile.red_ratio, 0.0);
    }
}
