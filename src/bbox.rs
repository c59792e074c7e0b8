//! Bounding box geometry: axis-aligned and rotated boxes, IoU batches

use ndarray::prelude::*;
use rayon::prelude::*;
use std::fmt;

/// Axis-aligned bounding box in corner form
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_x(&self) -> f32 {
        (self.xmin + self.xmax) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.ymin + self.ymax) / 2.0
    }

    /// Corner array [xmin, ymin, xmax, ymax]
    pub fn to_xyxy(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    pub fn from_xyxy(xyxy: &[f32; 4]) -> Self {
        Self::new(xyxy[0], xyxy[1], xyxy[2], xyxy[3])
    }

    /// Measurement form [center_x, center_y, aspect_ratio, height]
    /// for the aspect/height estimator variant
    pub fn to_xyah(&self) -> [f32; 4] {
        let h = self.height();
        let aspect = if h != 0.0 { self.width() / h } else { 1.0 };
        [self.center_x(), self.center_y(), aspect, h]
    }

    /// Measurement form [center_x, center_y, width, height]
    /// for the width/height estimator variant
    pub fn to_xywh(&self) -> [f32; 4] {
        [self.center_x(), self.center_y(), self.width(), self.height()]
    }

    pub fn from_xywh(xywh: &[f32; 4]) -> Self {
        let [cx, cy, w, h] = *xywh;
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bbox({}, {}, {}, {})",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}

/// Rotated bounding box [center_x, center_y, width, height, angle] with the
/// angle in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub angle: f32,
}

impl RotatedBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32, angle: f32) -> Self {
        Self { cx, cy, w, h, angle }
    }

    pub fn to_xywha(&self) -> [f32; 5] {
        [self.cx, self.cy, self.w, self.h, self.angle]
    }

    pub fn from_xywha(xywha: &[f32; 5]) -> Self {
        Self::new(xywha[0], xywha[1], xywha[2], xywha[3], xywha[4])
    }

    /// Tightest axis-aligned box enclosing the rotated box
    pub fn aabb(&self) -> Bbox {
        let (sin, cos) = self.angle.sin_cos();
        let half_w = (self.w / 2.0 * cos).abs() + (self.h / 2.0 * sin).abs();
        let half_h = (self.w / 2.0 * sin).abs() + (self.h / 2.0 * cos).abs();
        Bbox::new(
            self.cx - half_w,
            self.cy - half_h,
            self.cx + half_w,
            self.cy + half_h,
        )
    }

    /// Covariance entries (a, b, c) of the Gaussian the box is modeled as
    fn gaussian_form(&self) -> (f32, f32, f32) {
        let a = self.w * self.w / 12.0;
        let b = self.h * self.h / 12.0;
        let (sin, cos) = self.angle.sin_cos();
        (
            a * cos * cos + b * sin * sin,
            a * sin * sin + b * cos * cos,
            (a - b) * cos * sin,
        )
    }
}

/// Calculate exact IoU between two axis-aligned boxes
pub fn calculate_iou(bbox1: &Bbox, bbox2: &Bbox) -> f32 {
    let x1 = bbox1.xmin.max(bbox2.xmin);
    let y1 = bbox1.ymin.max(bbox2.ymin);
    let x2 = bbox1.xmax.min(bbox2.xmax);
    let y2 = bbox1.ymax.min(bbox2.ymax);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = bbox1.area() + bbox2.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

const PROBIOU_EPS: f32 = 1e-7;

/// Probabilistic IoU between two rotated boxes
///
/// Closed-form overlap measure: each box is modeled as a Gaussian and the
/// Bhattacharyya distance between the two Gaussians is mapped to [0, 1].
/// Tolerant of near-degenerate rotations where polygon intersection is
/// numerically fragile.
pub fn probiou(box1: &RotatedBox, box2: &RotatedBox) -> f32 {
    let (a1, b1, c1) = box1.gaussian_form();
    let (a2, b2, c2) = box2.gaussian_form();
    let (dx, dy) = (box2.cx - box1.cx, box2.cy - box1.cy);

    let denom = (a1 + a2) * (b1 + b2) - (c1 + c2) * (c1 + c2) + PROBIOU_EPS;
    let t1 = ((a1 + a2) * dy * dy + (b1 + b2) * dx * dx) / denom * 0.25;
    // quadratic form of the summed-covariance inverse: the cross term enters
    // with a negative sign
    let t2 = -(c1 + c2) * dx * dy / denom * 0.5;
    let t3 = (((a1 + a2) * (b1 + b2) - (c1 + c2) * (c1 + c2))
        / (4.0 * ((a1 * b1 - c1 * c1).max(0.0) * (a2 * b2 - c2 * c2).max(0.0)).sqrt()
            + PROBIOU_EPS)
        + PROBIOU_EPS)
        .ln()
        * 0.5;

    let bd = (t1 + t2 + t3).clamp(PROBIOU_EPS, 100.0);
    let hd = (1.0 - (-bd).exp()).sqrt();
    1.0 - hd
}

/// Compute the pairwise IoU matrix between two box lists in parallel
///
/// Returns an (N, M) matrix; empty inputs produce an empty matrix.
pub fn ious(aboxes: &[[f32; 4]], bboxes: &[[f32; 4]]) -> Array2<f32> {
    let n = aboxes.len();
    let m = bboxes.len();
    if n == 0 || m == 0 {
        return Array2::zeros((n, m));
    }

    let iou_data: Vec<f32> = aboxes
        .par_iter()
        .flat_map(|a| {
            let abox = Bbox::from_xyxy(a);
            bboxes
                .iter()
                .map(|b| calculate_iou(&abox, &Bbox::from_xyxy(b)))
                .collect::<Vec<_>>()
        })
        .collect();

    Array2::from_shape_vec((n, m), iou_data).expect("IoU matrix shape")
}

/// Compute the pairwise probabilistic IoU matrix between two rotated box
/// lists in parallel
pub fn batch_probiou(aboxes: &[RotatedBox], bboxes: &[RotatedBox]) -> Array2<f32> {
    let n = aboxes.len();
    let m = bboxes.len();
    if n == 0 || m == 0 {
        return Array2::zeros((n, m));
    }

    let iou_data: Vec<f32> = aboxes
        .par_iter()
        .flat_map(|a| bboxes.iter().map(|b| probiou(a, b)).collect::<Vec<_>>())
        .collect();

    Array2::from_shape_vec((n, m), iou_data).expect("ProbIoU matrix shape")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_bbox_properties() {
        let bbox = Bbox::new(0.0, 0.0, 10.0, 5.0);
        assert_eq!(bbox.width(), 10.0);
        assert_eq!(bbox.height(), 5.0);
        assert_eq!(bbox.area(), 50.0);
        assert_eq!(bbox.center_x(), 5.0);
        assert_eq!(bbox.center_y(), 2.5);
    }

    #[test]
    fn test_iou_calculation() {
        let bbox1 = Bbox::new(0.0, 0.0, 10.0, 10.0);
        let bbox2 = Bbox::new(5.0, 5.0, 15.0, 15.0);
        let iou = calculate_iou(&bbox1, &bbox2);
        assert_abs_diff_eq!(iou, 25.0 / 175.0, epsilon = 0.001);
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let bbox = Bbox::new(0.0, 0.0, 10.0, 10.0);
        assert_abs_diff_eq!(calculate_iou(&bbox, &bbox), 1.0, epsilon = 1e-6);

        let far = Bbox::new(100.0, 100.0, 110.0, 110.0);
        assert_eq!(calculate_iou(&bbox, &far), 0.0);
    }

    #[test]
    fn test_bbox_conversion_roundtrip() {
        let bbox = Bbox::new(2.0, 4.0, 12.0, 24.0);
        let back = Bbox::from_xywh(&bbox.to_xywh());
        assert_abs_diff_eq!(bbox.xmin, back.xmin, epsilon = 0.001);
        assert_abs_diff_eq!(bbox.ymax, back.ymax, epsilon = 0.001);

        let xyah = bbox.to_xyah();
        assert_abs_diff_eq!(xyah[2], 0.5, epsilon = 0.001);
        assert_abs_diff_eq!(xyah[3], 20.0, epsilon = 0.001);
    }

    #[test]
    fn test_ious_matrix_shape_and_empty() {
        let a = [[0.0, 0.0, 10.0, 10.0], [20.0, 20.0, 30.0, 30.0]];
        let b = [[5.0, 5.0, 15.0, 15.0]];
        let m = ious(&a, &b);
        assert_eq!(m.dim(), (2, 1));
        assert!(m[[0, 0]] > 0.0);
        assert_eq!(m[[1, 0]], 0.0);

        assert_eq!(ious(&[], &b).dim(), (0, 1));
        assert_eq!(ious(&a, &[]).dim(), (2, 0));
    }

    #[test]
    fn test_probiou_identical_boxes() {
        let b = RotatedBox::new(50.0, 50.0, 20.0, 10.0, 0.3);
        // Bhattacharyya distance is 0 for identical Gaussians
        assert_abs_diff_eq!(probiou(&b, &b), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_probiou_distant_boxes() {
        let b1 = RotatedBox::new(0.0, 0.0, 10.0, 10.0, 0.0);
        let b2 = RotatedBox::new(1000.0, 1000.0, 10.0, 10.0, 0.0);
        assert_abs_diff_eq!(probiou(&b1, &b2), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_probiou_decreases_with_rotation_mismatch() {
        let b1 = RotatedBox::new(0.0, 0.0, 40.0, 10.0, 0.0);
        let slight = RotatedBox::new(0.0, 0.0, 40.0, 10.0, 0.1);
        let strong = RotatedBox::new(0.0, 0.0, 40.0, 10.0, 1.2);
        assert!(probiou(&b1, &slight) > probiou(&b1, &strong));
    }

    #[test]
    fn test_probiou_favors_displacement_along_long_axis() {
        // An elongated box at 45 degrees: shifting a copy along its own long
        // axis keeps far more overlap than the same shift perpendicular to
        // it. Both displacements are diagonal, so the covariance cross term
        // is nonzero and its sign decides the ordering.
        let angle = std::f32::consts::FRAC_PI_4;
        let base = RotatedBox::new(0.0, 0.0, 40.0, 4.0, angle);
        let step = 8.0 / 2.0_f32.sqrt();
        let along = RotatedBox::new(step, step, 40.0, 4.0, angle);
        let perpendicular = RotatedBox::new(-step, step, 40.0, 4.0, angle);

        let overlap_along = probiou(&base, &along);
        let overlap_perp = probiou(&base, &perpendicular);
        assert!(overlap_along > overlap_perp);
        assert!(overlap_along > 0.5);
        assert!(overlap_perp < 0.05);
    }

    #[test]
    fn test_batch_probiou_shape() {
        let a = [RotatedBox::new(0.0, 0.0, 10.0, 10.0, 0.0)];
        let b = [
            RotatedBox::new(0.0, 0.0, 10.0, 10.0, 0.0),
            RotatedBox::new(500.0, 500.0, 10.0, 10.0, 0.0),
        ];
        let m = batch_probiou(&a, &b);
        assert_eq!(m.dim(), (1, 2));
        assert!(m[[0, 0]] > m[[0, 1]]);
    }
}
