use image::{GrayImage, Luma};

/// Contrast-limited adaptive histogram equalisation.
///
/// The image is split into a `tiles x tiles` grid; each tile's histogram is
/// clipped at `clip_limit` times the uniform bin height, the excess spread
/// evenly, and the resulting CDFs are bilinearly interpolated between tile
/// centres.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (w, h) = (gray.width(), gray.height());
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let tiles_x = tiles.clamp(1, w);
    let tiles_y = tiles.clamp(1, h);
    // Tile edges at multiples of w / tiles; every tile spans at least one pixel.
    let edge = |i: u32, n: u32, len: u32| (u64::from(i) * u64::from(len) / u64::from(n)) as u32;

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, x1) = (edge(tx, tiles_x, w), edge(tx + 1, tiles_x, w));
            let (y0, y1) = (edge(ty, tiles_y, h), edge(ty + 1, tiles_y, h));
            luts[(ty * tiles_x + tx) as usize] = tile_lut(gray, x0, y0, x1, y1, clip_limit);
        }
    }

    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;
    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;
        // Position relative to tile centres.
        let fx = (x as f32 + 0.5) / tile_w - 0.5;
        let fy = (y as f32 + 0.5) / tile_h - 0.5;
        let tx0 = fx.floor().clamp(0.0, (tiles_x - 1) as f32) as u32;
        let ty0 = fy.floor().clamp(0.0, (tiles_y - 1) as f32) as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let ax = (fx - tx0 as f32).clamp(0.0, 1.0);
        let ay = (fy - ty0 as f32).clamp(0.0, 1.0);

        let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f32;
        let top = lut(tx0, ty0) * (1.0 - ax) + lut(tx1, ty0) * ax;
        let bottom = lut(tx0, ty1) * (1.0 - ax) + lut(tx1, ty1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(gray: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[gray.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let total = (x1.saturating_sub(x0) * y1.saturating_sub(y0)).max(1);

    if clip_limit > 0.0 {
        let limit = ((clip_limit * total as f32 / 256.0).max(1.0)) as u32;
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let per_bin = excess / 256;
        let remainder = (excess % 256) as usize;
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin += per_bin + u32::from(i < remainder);
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    let scale = 255.0 / total as f32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_dimensions() {
        let gray = GrayImage::from_fn(37, 21, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]));
        let out = clahe(&gray, 2.5, 8);
        assert_eq!(out.dimensions(), gray.dimensions());
    }

    #[test]
    fn frames_smaller_than_the_tile_grid() {
        for (w, h) in [(10, 10), (3, 50), (9, 2), (1, 1)] {
            let gray = GrayImage::from_fn(w, h, |x, y| Luma([((x * 31 + y * 17) % 256) as u8]));
            let out = clahe(&gray, 2.5, 8);
            assert_eq!(out.dimensions(), (w, h));
            // A lookup table built from an empty tile would map everything to 0.
            assert!(out.pixels().any(|p| p[0] > 0), "{w}x{h} collapsed to black");
        }
    }

    #[test]
    fn stretches_low_contrast_ramp() {
        let gray = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x / 8) as u8]));
        let out = clahe(&gray, 4.0, 2);
        let min = out.pixels().map(|p| p[0]).min().unwrap();
        let max = out.pixels().map(|p| p[0]).max().unwrap();
        assert!(max - min > 7, "range {min}..{max} should widen beyond the input's 7 levels");
    }

    #[test]
    fn is_monotonic_within_a_tile() {
        let gray = GrayImage::from_fn(16, 16, |x, y| Luma([(x * 16 + y) as u8]));
        let out = clahe(&gray, 2.5, 1);
        let mut pairs: Vec<(u8, u8)> = gray.pixels().zip(out.pixels()).map(|(a, b)| (a[0], b[0])).collect();
        pairs.sort();
        assert!(pairs.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}
