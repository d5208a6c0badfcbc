//! Axis-aligned bounding boxes in `(x, y, w, h)` form.

use crate::camera::{Camera, CameraError, Resolution};
use nalgebra::{Matrix2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod assignment;

pub use assignment::{hungarian_assignment, match_boxes};

/// Rotation covered by the depth-crop expansion (30°).
pub const SWEEP_ANGLE: f64 = std::f64::consts::PI / 6.0;

/// A box with its top-left corner at `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        BoundingBox { x, y, w, h }
    }

    pub fn from_array(values: [f64; 4]) -> Self {
        BoundingBox::new(values[0], values[1], values[2], values[3])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.w, self.h]
    }

    pub fn corner(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    pub fn center(&self) -> Vector2<f64> {
        Vector2::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn max_side(&self) -> f64 {
        self.w.max(self.h)
    }

    pub fn diagonal(&self) -> f64 {
        (self.w * self.w + self.h * self.h).sqrt()
    }

    /// Intersection over union; 0 when the boxes do not overlap.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.w).min(other.x + other.w);
        let y1 = (self.y + self.h).min(other.y + other.h);

        let intersection = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Whether the box lies inside an image of the given size.
    pub fn within(&self, bounds: Resolution) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.w <= bounds.width as f64
            && self.y + self.h <= bounds.height as f64
    }

    /// Side of the square that contains the box rotated by up to `angle`.
    pub fn rotation_swept_side(&self, angle: f64) -> f64 {
        let (sine, cosine) = angle.sin_cos();
        let swept = Matrix2::new(cosine, sine, sine, cosine) * Vector2::new(self.w, self.h);
        swept.max()
    }
}

/// Tight box around the valid `(x, y, confidence)` keypoints, with each
/// side divided by `margin` around the same center. A margin below 1 grows
/// the box. Keypoints with non-positive confidence are ignored.
///
/// Returns `None` when no keypoint is valid.
pub fn box_from_keypoints(points: &[Vector3<f64>], margin: f64) -> Option<BoundingBox> {
    let mut valid = points.iter().filter(|p| p.z > 0.0).map(|p| p.xy());
    let first = valid.next()?;
    let (mut min, mut max) = (first, first);
    for point in valid {
        min = min.inf(&point);
        max = max.sup(&point);
    }
    let center = (min + max) / 2.0;
    let shape = (max - min) / margin;
    Some(BoundingBox::new(
        center.x - shape.x / 2.0,
        center.y - shape.y / 2.0,
        shape.x,
        shape.y,
    ))
}

/// Expresses a color-camera box in the paired depth camera.
///
/// The four corners are lifted to `subject_depth` (distance of the person
/// along the color optical axis), projected by the depth camera, and the
/// extent of the projections becomes the new box. The two cameras do not
/// share an optical center, so the subject depth is required.
pub fn transfer_bbox(
    bbox: &BoundingBox,
    color: &Camera,
    depth: &Camera,
    subject_depth: f64,
) -> Result<BoundingBox, CameraError> {
    let corners = [
        Vector2::new(bbox.x, bbox.y),
        Vector2::new(bbox.x + bbox.w, bbox.y),
        Vector2::new(bbox.x, bbox.y + bbox.h),
        Vector2::new(bbox.x + bbox.w, bbox.y + bbox.h),
    ];
    let projected = corners
        .iter()
        .map(|corner| {
            let world = color.image_to_world(corner, subject_depth)?;
            depth.world_to_image(&world)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (mut min, mut max) = (projected[0], projected[0]);
    for point in &projected {
        min = min.inf(point);
        max = max.sup(point);
    }
    Ok(BoundingBox::new(min.x, min.y, max.x - min.x, max.y - min.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::simple_camera;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    #[test]
    fn test_iou_partial_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 10.0, 10.0);
        assert_relative_eq!(a.iou(&b), 25.0 / 175.0, epsilon = 1e-12);
        assert_relative_eq!(a.iou(&b), b.iou(&a), epsilon = 1e-15);
    }

    #[test]
    fn test_iou_identity_and_disjoint() {
        let a = BoundingBox::new(12.0, 7.5, 40.0, 90.0);
        assert_relative_eq!(a.iou(&a), 1.0);

        let far = BoundingBox::new(100.0, 100.0, 5.0, 5.0);
        assert_eq!(a.iou(&far), 0.0);
        // touching edges share no area
        let touching = BoundingBox::new(52.0, 7.5, 10.0, 10.0);
        assert_eq!(a.iou(&touching), 0.0);
    }

    #[test]
    fn test_box_from_keypoints_with_margin() {
        let points = [
            Vector3::new(100.0, 120.0, 1.0),
            Vector3::new(150.0, 100.0, 0.7),
            Vector3::new(130.0, 150.0, 0.2),
        ];
        let bbox = box_from_keypoints(&points, 0.8).unwrap();
        assert_relative_eq!(bbox.center(), Vector2::new(125.0, 125.0));
        assert_relative_eq!(bbox.x, 93.75);
        assert_relative_eq!(bbox.y, 93.75);
        assert_relative_eq!(bbox.w, 62.5);
        assert_relative_eq!(bbox.h, 62.5);

        assert!(box_from_keypoints(&[], 0.8).is_none());
    }

    #[test]
    fn test_box_from_keypoints_ignores_untracked_joints() {
        let points = [
            Vector3::new(100.0, 100.0, 1.0),
            Vector3::new(200.0, 300.0, 0.5),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(900.0, 20.0, -1.0),
        ];
        let bbox = box_from_keypoints(&points, 1.0).unwrap();
        assert_relative_eq!(bbox.x, 100.0);
        assert_relative_eq!(bbox.y, 100.0);
        assert_relative_eq!(bbox.w, 100.0);
        assert_relative_eq!(bbox.h, 200.0);

        let untracked = [Vector3::new(10.0, 10.0, 0.0)];
        assert!(box_from_keypoints(&untracked, 1.0).is_none());
    }

    #[test]
    fn test_within_bounds() {
        let hd = Resolution {
            width: 1920,
            height: 1080,
        };
        assert!(BoundingBox::new(100.0, 100.0, 50.0, 50.0).within(hd));
        assert!(!BoundingBox::new(1900.0, 100.0, 50.0, 50.0).within(hd));
        assert!(!BoundingBox::new(-1.0, 100.0, 50.0, 50.0).within(hd));
    }

    #[test]
    fn test_rotation_swept_side() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 40.0);
        let side = bbox.rotation_swept_side(SWEEP_ANGLE);
        let expected = 100.0 * SWEEP_ANGLE.cos() + 40.0 * SWEEP_ANGLE.sin();
        assert_relative_eq!(side, expected, epsilon = 1e-12);
        assert_relative_eq!(bbox.rotation_swept_side(0.0), 100.0);
    }

    #[test]
    fn test_transfer_bbox_between_offset_cameras() {
        let color = simple_camera(640, 480, 500.0);
        let depth = Camera::new(
            Matrix3::identity(),
            Vector3::new(0.1, 0.0, 0.0),
            *color.intrinsic_matrix(),
            None,
            color.resolution(),
        )
        .unwrap();

        let bbox = BoundingBox::new(200.0, 100.0, 80.0, 160.0);
        let moved = transfer_bbox(&bbox, &color, &depth, 2.0).unwrap();
        // baseline 0.1 at depth 2 shifts by focal * 0.1 / 2 pixels
        assert_relative_eq!(moved.x, 200.0 - 25.0, epsilon = 1e-9);
        assert_relative_eq!(moved.y, 100.0, epsilon = 1e-9);
        assert_relative_eq!(moved.w, 80.0, epsilon = 1e-9);
        assert_relative_eq!(moved.h, 160.0, epsilon = 1e-9);
    }
}
