//! Oriented FAST keypoints with rotated BRIEF descriptors over an image
//! pyramid.

use image::imageops::{self, FilterType};
use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::imaging::{self, FloatImage};

const PYRAMID_SCALE: f32 = 1.2;
const DESCRIPTOR_PAIRS: usize = 256;
const PATCH_EXTENT: i32 = 13;
const ORIENTATION_RADIUS: i32 = 15;
/// Distance from the image border that keeps every rotated sample in bounds.
const BORDER: u32 = 19;

const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];
const ARC_LENGTH: usize = 9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    /// Position in full-resolution pixel coordinates.
    pub x: f32,
    pub y: f32,
    pub level: usize,
    /// Intensity-centroid orientation in radians.
    pub angle: f32,
    pub score: f32,
}

/// 256-bit binary descriptor.
pub type Descriptor = [u64; 4];

#[inline]
pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Sampling pattern shared by every frame of a job so descriptors compare.
#[derive(Clone, Debug)]
pub struct BriefPattern {
    pairs: Vec<[(f32, f32); 2]>,
}

impl BriefPattern {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sample = || {
            (
                rng.gen_range(-PATCH_EXTENT..=PATCH_EXTENT) as f32,
                rng.gen_range(-PATCH_EXTENT..=PATCH_EXTENT) as f32,
            )
        };
        let pairs = (0..DESCRIPTOR_PAIRS)
            .map(|_| [sample(), sample()])
            .collect();
        Self { pairs }
    }
}

#[derive(Clone, Debug)]
pub struct FeatureSettings {
    pub max_features: usize,
    pub fast_threshold: u8,
    pub pyramid_levels: usize,
}

/// Detect up to `max_features` keypoints (strongest first) and describe them.
pub fn detect_and_describe(
    gray: &GrayImage,
    pattern: &BriefPattern,
    settings: &FeatureSettings,
) -> (Vec<Keypoint>, Vec<Descriptor>) {
    let mut described: Vec<(Keypoint, Descriptor)> = Vec::new();
    let mut level_image = gray.clone();
    let mut scale = 1.0f32;

    for level in 0..settings.pyramid_levels.max(1) {
        if level > 0 {
            scale *= PYRAMID_SCALE;
            let w = (gray.width() as f32 / scale).round() as u32;
            let h = (gray.height() as f32 / scale).round() as u32;
            if w <= 2 * BORDER || h <= 2 * BORDER {
                break;
            }
            level_image = imageops::resize(gray, w, h, FilterType::Triangle);
        }
        if level_image.width() <= 2 * BORDER || level_image.height() <= 2 * BORDER {
            break;
        }

        let smoothed = imaging::gaussian_blur3(&FloatImage::from_gray(&level_image));
        for (x, y, score) in fast_corners(&level_image, settings.fast_threshold) {
            let angle = orientation(&level_image, x, y);
            let descriptor = describe(&smoothed, x, y, angle, pattern);
            described.push((
                Keypoint {
                    x: x as f32 * scale,
                    y: y as f32 * scale,
                    level,
                    angle,
                    score,
                },
                descriptor,
            ));
        }
    }

    described.sort_by(|a, b| b.0.score.total_cmp(&a.0.score));
    described.truncate(settings.max_features);
    described.into_iter().unzip()
}

/// FAST-9 corners with 3x3 non-maximum suppression on the corner score.
fn fast_corners(gray: &GrayImage, threshold: u8) -> Vec<(u32, u32, f32)> {
    let (w, h) = (gray.width(), gray.height());
    let mut scores = vec![0f32; (w * h) as usize];
    let t = threshold as i32;

    for y in BORDER..h - BORDER {
        for x in BORDER..w - BORDER {
            let c = gray.get_pixel(x, y)[0] as i32;
            let mut states = [0i8; 16];
            let mut score = 0i32;
            for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
                let p = gray.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i32;
                let diff = p - c;
                if diff > t {
                    states[i] = 1;
                } else if diff < -t {
                    states[i] = -1;
                }
                score += (diff.abs() - t).max(0);
            }
            if has_arc(&states) {
                scores[(y * w + x) as usize] = score as f32;
            }
        }
    }

    let mut corners = Vec::new();
    for y in BORDER..h - BORDER {
        for x in BORDER..w - BORDER {
            let s = scores[(y * w + x) as usize];
            if s <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'nms: for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    if (nx, ny) == (x, y) {
                        continue;
                    }
                    let other = scores[(ny * w + nx) as usize];
                    // Ties resolve toward the earlier pixel in scan order.
                    if other > s || (other == s && (ny, nx) < (y, x)) {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if is_max {
                corners.push((x, y, s));
            }
        }
    }
    corners
}

fn has_arc(states: &[i8; 16]) -> bool {
    for sign in [1i8, -1] {
        let mut run = 0;
        for i in 0..16 + ARC_LENGTH {
            if states[i % 16] == sign {
                run += 1;
                if run >= ARC_LENGTH {
                    return true;
                }
            } else {
                run = 0;
            }
        }
    }
    false
}

fn orientation(gray: &GrayImage, x: u32, y: u32) -> f32 {
    let (mut m01, mut m10) = (0f64, 0f64);
    let r2 = ORIENTATION_RADIUS * ORIENTATION_RADIUS;
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = gray.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as f64;
            m10 += dx as f64 * v;
            m01 += dy as f64 * v;
        }
    }
    m01.atan2(m10) as f32
}

fn describe(smoothed: &FloatImage, x: u32, y: u32, angle: f32, pattern: &BriefPattern) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |(px, py): (f32, f32)| {
        let rx = (px * cos - py * sin).round() as i64;
        let ry = (px * sin + py * cos).round() as i64;
        smoothed.get((x as i64 + rx) as usize, (y as i64 + ry) as usize)
    };
    let mut descriptor = [0u64; 4];
    for (bit, [a, b]) in pattern.pairs.iter().enumerate() {
        if sample(*a) < sample(*b) {
            descriptor[bit / 64] |= 1u64 << (bit % 64);
        }
    }
    descriptor
}
