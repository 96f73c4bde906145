use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel space, corner format `(x1, y1, x2, y2)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    #[inline]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from top-left corner and size.
    #[inline]
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    #[inline]
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    #[inline]
    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.x2 > self.x1 && self.y2 > self.y1)
            || !self.x1.is_finite()
            || !self.y1.is_finite()
            || !self.x2.is_finite()
            || !self.y2.is_finite()
    }

    /// Intersection over union. Always in `[0, 1]`; zero when the union is empty.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 && inter.is_finite() {
            (inter / union).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Euclidean distance between box centres.
    pub fn center_distance(&self, other: &BBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Scale the box about its centre.
    pub fn expand(&self, factor: f32) -> BBox {
        let (cx, cy) = self.center();
        let hw = self.width() * factor / 2.0;
        let hh = self.height() * factor / 2.0;
        BBox::new(cx - hw, cy - hh, cx + hw, cy + hh)
    }

    /// Clamp to an image of the given size. May return a degenerate box.
    pub fn clamp_to(&self, width: u32, height: u32) -> BBox {
        let w = width as f32;
        let h = height as f32;
        BBox::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }

    /// True when any side lies within `margin` pixels of the image border.
    pub fn touches_border(&self, width: u32, height: u32, margin: f32) -> bool {
        self.x1 < margin
            || self.y1 < margin
            || self.x2 > width as f32 - margin
            || self.y2 > height as f32 - margin
    }

    /// Integer pixel rectangle `(x, y, w, h)` covering the box, clipped to the image.
    pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let c = self.clamp_to(width, height);
        let x1 = c.x1.floor() as u32;
        let y1 = c.y1.floor() as u32;
        let x2 = (c.x2.ceil() as u32).min(width);
        let y2 = (c.y2.ceil() as u32).min(height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Component-wise median of a set of boxes.
pub fn median_box(boxes: &[BBox]) -> Option<BBox> {
    if boxes.is_empty() {
        return None;
    }
    let median = |mut values: Vec<f32>| {
        values.sort_by(|a, b| a.total_cmp(b));
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        }
    };
    Some(BBox::new(
        median(boxes.iter().map(|b| b.x1).collect()),
        median(boxes.iter().map(|b| b.y1).collect()),
        median(boxes.iter().map(|b| b.x2).collect()),
        median(boxes.iter().map(|b| b.y2).collect()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_box_with_itself_is_one() {
        let a = BBox::new(10.0, 20.0, 40.0, 60.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_is_symmetric_and_bounded() {
        let boxes = [
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(5.0, 5.0, 15.0, 15.0),
            BBox::new(20.0, 20.0, 30.0, 30.0),
            BBox::new(-5.0, -5.0, 100.0, 3.0),
            BBox::new(3.0, 3.0, 3.0, 3.0),
            BBox::new(8.0, 1.0, 2.0, 9.0),
        ];
        for a in &boxes {
            for b in &boxes {
                let ab = a.iou(b);
                let ba = b.iou(a);
                assert!((ab - ba).abs() < 1e-6, "{a:?} vs {b:?}");
                assert!((0.0..=1.0).contains(&ab));
            }
        }
    }

    #[test]
    fn iou_partial_overlap() {
        let a = BBox::from_xywh(0.0, 0.0, 10.0, 10.0);
        let b = BBox::from_xywh(5.0, 5.0, 10.0, 10.0);
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_box_has_zero_iou() {
        let a = BBox::new(5.0, 5.0, 5.0, 5.0);
        assert!(a.is_degenerate());
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn pixel_rect_is_clipped() {
        let b = BBox::new(-4.0, 2.5, 12.2, 30.0);
        assert_eq!(b.pixel_rect(10, 20), Some((0, 2, 10, 18)));
        assert_eq!(BBox::new(50.0, 50.0, 60.0, 60.0).pixel_rect(10, 10), None);
    }

    #[test]
    fn median_box_ignores_outlier() {
        let boxes = [
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(1.0, 1.0, 11.0, 11.0),
            BBox::new(90.0, 90.0, 99.0, 99.0),
        ];
        assert_eq!(median_box(&boxes), Some(BBox::new(1.0, 1.0, 11.0, 11.0)));
        assert_eq!(median_box(&[]), None);
    }
}
