use image::{GrayImage, Luma};

use super::filters::{gaussian_blur3, sobel, FloatImage};

const EDGE: u8 = 255;

/// Canny edge detector: 3x3 Gaussian, Sobel gradients, non-maximum
/// suppression along the quantised gradient direction, then hysteresis
/// between `low` and `high` on the L2 gradient magnitude.
///
/// Returns a binary map (0 or 255). The outermost pixel ring is never an edge.
pub fn canny(gray: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let mut out = GrayImage::new(gray.width(), gray.height());
    if w < 3 || h < 3 {
        return out;
    }

    let smoothed = gaussian_blur3(&FloatImage::from_gray(gray));
    let (gx, gy) = sobel(&smoothed);

    let mut magnitude = FloatImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let (dx, dy) = (gx.get(x, y), gy.get(x, y));
            magnitude.set(x, y, (dx * dx + dy * dy).sqrt());
        }
    }

    // 0 = none, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let m = magnitude.get(x, y);
            if m < low {
                continue;
            }
            let (n1, n2) = neighbours_along_gradient(gx.get(x, y), gy.get(x, y), x, y);
            let m1 = magnitude.get(n1.0, n1.1);
            let m2 = magnitude.get(n2.0, n2.1);
            // Strict on one side so flat-topped ridges keep a single pixel.
            if m > m1 && m >= m2 {
                class[y * w + x] = if m >= high { 2 } else { 1 };
            }
        }
    }

    let mut stack: Vec<(usize, usize)> = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            if class[y * w + x] == 2 {
                out.put_pixel(x as u32, y as u32, Luma([EDGE]));
                stack.push((x, y));
            }
        }
    }
    while let Some((x, y)) = stack.pop() {
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let idx = ny * w + nx;
                if class[idx] == 1 {
                    class[idx] = 2;
                    out.put_pixel(nx as u32, ny as u32, Luma([EDGE]));
                    stack.push((nx, ny));
                }
            }
        }
    }

    out
}

/// The two neighbours of `(x, y)` along the gradient, image y axis pointing down.
fn neighbours_along_gradient(
    dx: f32,
    dy: f32,
    x: usize,
    y: usize,
) -> ((usize, usize), (usize, usize)) {
    let mut angle = dy.atan2(dx).to_degrees();
    if angle < 0.0 {
        angle += 180.0;
    }
    if !(22.5..157.5).contains(&angle) {
        ((x - 1, y), (x + 1, y))
    } else if angle < 67.5 {
        ((x - 1, y - 1), (x + 1, y + 1))
    } else if angle < 112.5 {
        ((x, y - 1), (x, y + 1))
    } else {
        ((x + 1, y - 1), (x - 1, y + 1))
    }
}

/// Binary 3x3 dilation.
pub fn dilate(mask: &GrayImage) -> GrayImage {
    let (w, h) = (mask.width() as i64, mask.height() as i64);
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let sx = x as i64 + dx;
                let sy = y as i64 + dy;
                if sx >= 0 && sy >= 0 && sx < w && sy < h && mask.get_pixel(sx as u32, sy as u32)[0] > 0
                {
                    return Luma([EDGE]);
                }
            }
        }
        Luma([0])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_scene() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([200])
            } else {
                Luma([60])
            }
        })
    }

    #[test]
    fn flat_image_has_no_edges() {
        let gray = GrayImage::from_pixel(20, 20, Luma([128]));
        let edges = canny(&gray, 40.0, 100.0);
        assert!(edges.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn square_outline_is_found() {
        let edges = canny(&square_scene(), 40.0, 100.0);
        let count = edges.pixels().filter(|p| p[0] > 0).count();
        assert!(count >= 60, "expected an outline, found {count} edge pixels");
        // Interior and far background stay clear.
        assert_eq!(edges.get_pixel(20, 20)[0], 0);
        assert_eq!(edges.get_pixel(2, 2)[0], 0);
        // Something fires next to the left boundary on the middle row.
        assert!((8..12).any(|x| edges.get_pixel(x, 20)[0] > 0));
    }

    #[test]
    fn dilate_grows_single_pixel() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(2, 2, Luma([255]));
        let grown = dilate(&mask);
        assert_eq!(grown.pixels().filter(|p| p[0] > 0).count(), 9);
    }
}
