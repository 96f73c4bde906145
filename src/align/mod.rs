//! Frame Aligner.
//!
//! Registers a present frame onto its paired base frame so that boxes from
//! the two passes share one coordinate system. Failure is never fatal: the
//! present frame is passed through unchanged and the caller is told why.

mod features;
mod homography;
mod matcher;

pub use features::{detect_and_describe, hamming, BriefPattern, Descriptor, FeatureSettings, Keypoint};
pub use homography::{estimate_homography, is_near_identity, project, HomographyEstimate, RansacParams};
pub use matcher::{cross_check_matches, Match};

use image::{Rgb, RgbImage};
use nalgebra::Matrix3;

use crate::config::AlignmentSettings;
use crate::error::AlignmentError;
use crate::frame::Frame;

const IDENTITY_TOLERANCE: f64 = 1e-6;

/// What happened to a present frame.
#[derive(Clone, Debug, PartialEq)]
pub enum AlignStatus {
    /// Warped into the base frame's coordinates.
    Warped { inliers: usize },
    /// Homography indistinguishable from identity; frame untouched.
    Identity,
    /// Alignment disabled by configuration.
    Disabled,
    /// Alignment failed; frame passed through unaligned.
    Failed(AlignmentError),
}

pub struct AlignedFrame {
    pub frame: Frame,
    pub status: AlignStatus,
}

#[derive(Clone, Debug)]
pub struct FrameAligner {
    settings: AlignmentSettings,
    pattern: BriefPattern,
}

impl FrameAligner {
    pub fn new(settings: AlignmentSettings) -> Self {
        let pattern = BriefPattern::new(settings.seed);
        Self { settings, pattern }
    }

    /// Estimate the homography taking present-frame pixels to base-frame
    /// pixels.
    pub fn estimate(&self, base: &Frame, present: &Frame) -> Result<HomographyEstimate, AlignmentError> {
        let feature_settings = FeatureSettings {
            max_features: self.settings.max_features,
            fast_threshold: self.settings.fast_threshold,
            pyramid_levels: self.settings.pyramid_levels,
        };
        let (base_kps, base_desc) = detect_and_describe(&base.gray(), &self.pattern, &feature_settings);
        let (present_kps, present_desc) =
            detect_and_describe(&present.gray(), &self.pattern, &feature_settings);
        let min_matches = self.settings.min_matches.max(4);
        if base_kps.len() < min_matches || present_kps.len() < min_matches {
            return Err(AlignmentError::TooFewKeypoints {
                base: base_kps.len(),
                present: present_kps.len(),
            });
        }

        let matches = cross_check_matches(&present_desc, &base_desc);
        if matches.len() < min_matches {
            return Err(AlignmentError::TooFewMatches(matches.len()));
        }
        let src: Vec<(f64, f64)> = matches
            .iter()
            .map(|m| (present_kps[m.query].x as f64, present_kps[m.query].y as f64))
            .collect();
        let dst: Vec<(f64, f64)> = matches
            .iter()
            .map(|m| (base_kps[m.train].x as f64, base_kps[m.train].y as f64))
            .collect();

        estimate_homography(
            &src,
            &dst,
            &RansacParams {
                threshold: self.settings.ransac_threshold,
                iterations: self.settings.ransac_iterations,
                min_inliers: self.settings.min_inliers,
                seed: self.settings.seed ^ u64::from(base.index),
            },
        )
    }

    /// Align `present` onto `base`, falling back to the unmodified present
    /// frame on any failure.
    pub fn align(&self, base: &Frame, present: &Frame) -> AlignedFrame {
        if !self.settings.enabled {
            return AlignedFrame {
                frame: present.clone(),
                status: AlignStatus::Disabled,
            };
        }
        let estimate = match self.estimate(base, present) {
            Ok(estimate) => estimate,
            Err(e) => {
                log::debug!(
                    "FrameAligner: frame {} left unaligned: {}",
                    present.index,
                    e
                );
                return AlignedFrame {
                    frame: present.clone(),
                    status: AlignStatus::Failed(e),
                };
            }
        };
        if is_near_identity(&estimate.matrix, IDENTITY_TOLERANCE) {
            return AlignedFrame {
                frame: present.clone(),
                status: AlignStatus::Identity,
            };
        }
        let Some(inverse) = estimate.matrix.try_inverse() else {
            return AlignedFrame {
                frame: present.clone(),
                status: AlignStatus::Failed(AlignmentError::DegenerateHomography("not invertible")),
            };
        };
        let warped = warp_perspective(present.pixels(), &inverse, base.width(), base.height());
        AlignedFrame {
            frame: present.with_pixels(warped),
            status: AlignStatus::Warped {
                inliers: estimate.inliers,
            },
        }
    }
}

/// Inverse-map warp: output pixel `p` samples `src` at `inverse * p` with
/// bilinear interpolation. Pixels mapping outside `src` are black.
pub fn warp_perspective(src: &RgbImage, inverse: &Matrix3<f64>, width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        match project(inverse, (x as f64, y as f64)) {
            Some((sx, sy)) => sample_bilinear(src, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}

fn sample_bilinear(src: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = (src.width() as f64, src.height() as f64);
    if x < 0.0 || y < 0.0 || x > w - 1.0 || y > h - 1.0 {
        return Rgb([0, 0, 0]);
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(src.width() - 1);
    let y1 = (y0 + 1).min(src.height() - 1);
    let (ax, ay) = (x - x0 as f64, y - y0 as f64);
    let (p00, p10, p01, p11) = (
        src.get_pixel(x0, y0),
        src.get_pixel(x1, y0),
        src.get_pixel(x0, y1),
        src.get_pixel(x1, y1),
    );
    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - ax) + p10[c] as f64 * ax;
        let bottom = p01[c] as f64 * (1.0 - ax) + p11[c] as f64 * ax;
        *slot = (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
