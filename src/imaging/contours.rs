use image::GrayImage;

use crate::geometry::BBox;

/// A filled outer contour: the edge component plus everything it encloses.
#[derive(Clone, Debug)]
pub struct Region {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    /// Filled pixels (outline and interior).
    pub pixels: Vec<(u32, u32)>,
    /// Area of the convex hull of the outline, in pixel units.
    pub hull_area: f32,
}

impl Region {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    pub fn bbox(&self) -> BBox {
        BBox::new(
            self.min_x as f32,
            self.min_y as f32,
            (self.max_x + 1) as f32,
            (self.max_y + 1) as f32,
        )
    }

    /// Filled area over convex-hull area, in `[0, 1]`.
    pub fn solidity(&self) -> f32 {
        if self.hull_area <= 0.0 {
            return 0.0;
        }
        (self.area() as f32 / self.hull_area).clamp(0.0, 1.0)
    }
}

/// Outer regions of a binary edge map.
///
/// Edge pixels are grouped into 8-connected components; each component is
/// filled (pixels not reachable from outside its bounding box), and regions
/// nested inside a larger region are dropped. Regions smaller than
/// `min_area` filled pixels are discarded.
pub fn external_regions(edges: &GrayImage, min_area: usize) -> Vec<Region> {
    let (w, h) = (edges.width() as usize, edges.height() as usize);
    let mut visited = vec![false; w * h];
    let mut regions = Vec::new();

    for start_y in 0..h {
        for start_x in 0..w {
            let idx = start_y * w + start_x;
            if visited[idx] || edges.as_raw()[idx] == 0 {
                continue;
            }
            let component = collect_component(edges, &mut visited, start_x, start_y);
            if let Some(region) = fill_component(&component) {
                if region.area() >= min_area {
                    regions.push(region);
                }
            }
        }
    }

    // Largest first, then drop anything whose pixels were already claimed.
    regions.sort_by(|a, b| b.area().cmp(&a.area()));
    let mut claimed = vec![false; w * h];
    let mut outer = Vec::with_capacity(regions.len());
    for region in regions {
        let (px, py) = region.pixels[0];
        if claimed[py as usize * w + px as usize] {
            continue;
        }
        for &(x, y) in &region.pixels {
            claimed[y as usize * w + x as usize] = true;
        }
        outer.push(region);
    }
    outer
}

fn collect_component(
    edges: &GrayImage,
    visited: &mut [bool],
    start_x: usize,
    start_y: usize,
) -> Vec<(u32, u32)> {
    let (w, h) = (edges.width() as usize, edges.height() as usize);
    let raw = edges.as_raw();
    let mut component = Vec::new();
    let mut stack = vec![(start_x, start_y)];
    visited[start_y * w + start_x] = true;
    while let Some((x, y)) = stack.pop() {
        component.push((x as u32, y as u32));
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let idx = ny * w + nx;
                if !visited[idx] && raw[idx] > 0 {
                    visited[idx] = true;
                    stack.push((nx, ny));
                }
            }
        }
    }
    component
}

fn fill_component(component: &[(u32, u32)]) -> Option<Region> {
    let min_x = component.iter().map(|p| p.0).min()?;
    let max_x = component.iter().map(|p| p.0).max()?;
    let min_y = component.iter().map(|p| p.1).min()?;
    let max_y = component.iter().map(|p| p.1).max()?;

    // Local grid with a one pixel margin so the flood fill can wrap around.
    let lw = (max_x - min_x + 3) as usize;
    let lh = (max_y - min_y + 3) as usize;
    let mut wall = vec![false; lw * lh];
    for &(x, y) in component {
        let lx = (x - min_x + 1) as usize;
        let ly = (y - min_y + 1) as usize;
        wall[ly * lw + lx] = true;
    }

    let mut outside = vec![false; lw * lh];
    let mut stack = vec![(0usize, 0usize)];
    outside[0] = true;
    while let Some((x, y)) = stack.pop() {
        let mut visit = |nx: usize, ny: usize| {
            let idx = ny * lw + nx;
            if !outside[idx] && !wall[idx] {
                outside[idx] = true;
                stack.push((nx, ny));
            }
        };
        if x > 0 {
            visit(x - 1, y);
        }
        if x + 1 < lw {
            visit(x + 1, y);
        }
        if y > 0 {
            visit(x, y - 1);
        }
        if y + 1 < lh {
            visit(x, y + 1);
        }
    }

    let mut pixels = Vec::new();
    for ly in 1..lh - 1 {
        for lx in 1..lw - 1 {
            if !outside[ly * lw + lx] {
                pixels.push((min_x + lx as u32 - 1, min_y + ly as u32 - 1));
            }
        }
    }
    if pixels.is_empty() {
        return None;
    }

    // Hull over pixel corners so a filled w x h block has hull area w * h.
    let mut corners: Vec<(f64, f64)> = Vec::with_capacity(component.len() * 4);
    for &(x, y) in component {
        let (fx, fy) = (x as f64, y as f64);
        corners.extend_from_slice(&[(fx, fy), (fx + 1.0, fy), (fx, fy + 1.0), (fx + 1.0, fy + 1.0)]);
    }
    let hull = convex_hull(corners);

    Some(Region {
        min_x,
        min_y,
        max_x,
        max_y,
        pixels,
        hull_area: polygon_area(&hull) as f32,
    })
}

/// Andrew's monotone chain. Returns the hull counter-clockwise without repeats.
pub(crate) fn convex_hull(mut points: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }
    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };
    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Shoelace area of a simple polygon.
pub(crate) fn polygon_area(points: &[(f64, f64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..points.len() {
        let (x1, y1) = points[i];
        let (x2, y2) = points[(i + 1) % points.len()];
        twice += x1 * y2 - x2 * y1;
    }
    twice.abs() / 2.0
}
