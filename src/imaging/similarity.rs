use image::imageops::{self, FilterType};
use image::GrayImage;

const WINDOW: u32 = 7;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Mean structural similarity of two grayscale crops, in `[-1, 1]`.
///
/// Uses a 7x7 uniform sliding window (global statistics when either side is
/// smaller than the window). `b` is resized to `a`'s dimensions first when
/// they differ. Empty inputs compare as dissimilar (0).
pub fn structural_similarity(a: &GrayImage, b: &GrayImage) -> f32 {
    if a.width() == 0 || a.height() == 0 || b.width() == 0 || b.height() == 0 {
        return 0.0;
    }
    let resized;
    let b = if a.dimensions() != b.dimensions() {
        resized = imageops::resize(b, a.width(), a.height(), FilterType::Triangle);
        &resized
    } else {
        b
    };

    if a.width() < WINDOW || a.height() < WINDOW {
        return window_ssim(a, b, 0, 0, a.width(), a.height()) as f32;
    }

    let mut total = 0.0;
    let mut count = 0usize;
    for y in 0..=(a.height() - WINDOW) {
        for x in 0..=(a.width() - WINDOW) {
            total += window_ssim(a, b, x, y, WINDOW, WINDOW);
            count += 1;
        }
    }
    (total / count as f64) as f32
}

fn window_ssim(a: &GrayImage, b: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> f64 {
    let n = (w * h) as f64;
    let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let va = a.get_pixel(x, y)[0] as f64;
            let vb = b.get_pixel(x, y)[0] as f64;
            sa += va;
            sb += vb;
            saa += va * va;
            sbb += vb * vb;
            sab += va * vb;
        }
    }
    let (mu_a, mu_b) = (sa / n, sb / n);
    let var_a = (saa / n - mu_a * mu_a).max(0.0);
    let var_b = (sbb / n - mu_b * mu_b).max(0.0);
    let cov = sab / n - mu_a * mu_b;

    ((2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2))
        / ((mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2))
}
