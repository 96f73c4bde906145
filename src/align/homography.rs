//! Planar homography estimation: normalised DLT inside a seeded RANSAC loop.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::AlignmentError;

type Point = (f64, f64);

const SAMPLE_SIZE: usize = 4;
/// Smallest triangle area (px²) a minimal sample may span.
const MIN_SAMPLE_AREA: f64 = 1.0;
/// Allowed area scaling of the upper-left 2x2 block.
const MIN_AREA_SCALE: f64 = 0.2;
const MAX_AREA_SCALE: f64 = 5.0;

#[derive(Clone, Debug)]
pub struct RansacParams {
    /// Reprojection error (px) under which a correspondence is an inlier.
    pub threshold: f64,
    pub iterations: usize,
    pub min_inliers: usize,
    pub seed: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HomographyEstimate {
    /// Maps `src` points onto `dst` points; `h33 == 1`.
    pub matrix: Matrix3<f64>,
    pub inliers: usize,
}

/// Robustly estimate `H` with `dst ~ H * src`.
pub fn estimate_homography(
    src: &[Point],
    dst: &[Point],
    params: &RansacParams,
) -> Result<HomographyEstimate, AlignmentError> {
    let n = src.len().min(dst.len());
    if n < SAMPLE_SIZE {
        return Err(AlignmentError::TooFewMatches(n));
    }
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Matrix3<f64>, Vec<usize>)> = None;

    for _ in 0..params.iterations.max(1) {
        let sample = rand::seq::index::sample(&mut rng, n, SAMPLE_SIZE).into_vec();
        if is_degenerate_sample(src, &sample) || is_degenerate_sample(dst, &sample) {
            continue;
        }
        let Some(candidate) = fit(src, dst, &sample) else {
            continue;
        };
        let inliers = inlier_indices(&candidate, src, dst, params.threshold);
        if best.as_ref().map_or(true, |(_, b)| inliers.len() > b.len()) {
            let done = inliers.len() == n;
            best = Some((candidate, inliers));
            if done {
                break;
            }
        }
    }

    let Some((coarse, inliers)) = best else {
        return Err(AlignmentError::DegenerateHomography("no non-degenerate sample"));
    };
    if inliers.len() < params.min_inliers.max(SAMPLE_SIZE) {
        return Err(AlignmentError::DegenerateHomography("too few inliers"));
    }

    // Refit on the full consensus set; keep the coarse model if that fails.
    let refined = fit(src, dst, &inliers).unwrap_or(coarse);
    let final_inliers = inlier_indices(&refined, src, dst, params.threshold);
    let (matrix, count) = if final_inliers.len() >= inliers.len() {
        (refined, final_inliers.len())
    } else {
        (coarse, inliers.len())
    };
    validate(&matrix)?;
    Ok(HomographyEstimate {
        matrix,
        inliers: count,
    })
}

/// Apply `h` to a point. `None` when the point maps to infinity.
pub fn project(h: &Matrix3<f64>, (x, y): Point) -> Option<Point> {
    let p = h * Vector3::new(x, y, 1.0);
    if p.z.abs() < 1e-12 {
        return None;
    }
    Some((p.x / p.z, p.y / p.z))
}

pub fn is_near_identity(h: &Matrix3<f64>, tolerance: f64) -> bool {
    (h - Matrix3::identity()).iter().all(|v| v.abs() <= tolerance)
}

fn validate(h: &Matrix3<f64>) -> Result<(), AlignmentError> {
    if h.iter().any(|v| !v.is_finite()) {
        return Err(AlignmentError::DegenerateHomography("non-finite matrix"));
    }
    if h.determinant().abs() < 1e-9 {
        return Err(AlignmentError::DegenerateHomography("singular matrix"));
    }
    let area_scale = h[(0, 0)] * h[(1, 1)] - h[(0, 1)] * h[(1, 0)];
    if area_scale <= 0.0 {
        return Err(AlignmentError::DegenerateHomography("orientation flip"));
    }
    if !(MIN_AREA_SCALE..=MAX_AREA_SCALE).contains(&area_scale) {
        return Err(AlignmentError::DegenerateHomography("implausible scale"));
    }
    Ok(())
}

fn inlier_indices(h: &Matrix3<f64>, src: &[Point], dst: &[Point], threshold: f64) -> Vec<usize> {
    let t2 = threshold * threshold;
    (0..src.len().min(dst.len()))
        .filter(|&i| {
            project(h, src[i]).is_some_and(|(u, v)| {
                let (du, dv) = (u - dst[i].0, v - dst[i].1);
                du * du + dv * dv < t2
            })
        })
        .collect()
}

fn is_degenerate_sample(points: &[Point], sample: &[usize]) -> bool {
    let twice_area = |a: Point, b: Point, c: Point| {
        ((b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)).abs()
    };
    for i in 0..sample.len() {
        for j in i + 1..sample.len() {
            for k in j + 1..sample.len() {
                let (a, b, c) = (points[sample[i]], points[sample[j]], points[sample[k]]);
                if twice_area(a, b, c) < 2.0 * MIN_SAMPLE_AREA {
                    return true;
                }
            }
        }
    }
    false
}

/// Least-squares DLT with `h33 = 1` on Hartley-normalised coordinates.
fn fit(src: &[Point], dst: &[Point], indices: &[usize]) -> Option<Matrix3<f64>> {
    let src_pts: Vec<Point> = indices.iter().map(|&i| src[i]).collect();
    let dst_pts: Vec<Point> = indices.iter().map(|&i| dst[i]).collect();
    let t_src = normalisation(&src_pts)?;
    let t_dst = normalisation(&dst_pts)?;

    let mut ata = SMatrix::<f64, 8, 8>::zeros();
    let mut atb = SVector::<f64, 8>::zeros();
    for (s, d) in src_pts.iter().zip(dst_pts.iter()) {
        let (x, y) = project(&t_src, *s)?;
        let (u, v) = project(&t_dst, *d)?;
        let rows = [
            (SVector::<f64, 8>::from([x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]), u),
            (SVector::<f64, 8>::from([0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]), v),
        ];
        for (row, rhs) in rows {
            ata += row * row.transpose();
            atb += row * rhs;
        }
    }
    let h = ata.lu().solve(&atb)?;
    let normalised = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    let denormalised = t_dst.try_inverse()? * normalised * t_src;
    let scale = denormalised[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    Some(denormalised / scale)
}

/// Similarity transform moving the centroid to the origin with mean distance
/// `sqrt(2)`.
fn normalisation(points: &[Point]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-9 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}
