//! Face, landmark and eye-patch types.

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Number of points in the iBUG 68-point landmark layout.
pub const NUM_LANDMARKS: usize = 68;

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
}

impl BoundingBox {
    /// Creates a bounding box.
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a box from corner coordinates.
    #[must_use]
    pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self::new(x_min, y_min, (x_max - x_min).max(0.0), (y_max - y_min).max(0.0))
    }

    /// Right edge.
    #[must_use]
    pub fn x_max(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge.
    #[must_use]
    pub fn y_max(&self) -> f32 {
        self.y + self.height
    }

    /// Box area.
    #[must_use]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection over union with another box.
    #[must_use]
    pub fn iou(&self, other: &Self) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.x_max().min(other.x_max());
        let y2 = self.y_max().min(other.y_max());

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Returns true if the box lies entirely inside a `width x height` frame
    /// and has a non-zero area.
    #[must_use]
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f32, height as f32);
        self.width >= 1.0
            && self.height >= 1.0
            && self.x >= 0.0
            && self.y >= 0.0
            && self.x_max() <= w
            && self.y_max() <= h
    }
}

/// A 2-D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    /// Horizontal coordinate.
    pub x: f32,
    /// Vertical coordinate.
    pub y: f32,
}

impl Point2 {
    /// Creates a point.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Facial landmarks in image space, iBUG 68-point order.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    points: Vec<Point2>,
}

impl Landmarks {
    /// Wraps a point list. Returns `None` unless exactly 68 points are given.
    #[must_use]
    pub fn new(points: Vec<Point2>) -> Option<Self> {
        (points.len() == NUM_LANDMARKS).then_some(Self { points })
    }

    /// All points.
    #[must_use]
    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    /// Point at a landmark index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Point2> {
        self.points.get(index).copied()
    }
}

/// A square eye crop and where it came from in the frame.
#[derive(Debug, Clone)]
pub struct EyePatch {
    /// Resized square crop.
    pub image: RgbImage,
    /// Crop region in frame coordinates.
    pub bbox: BoundingBox,
}

/// One detected face in a frame, built fresh for every inference pass.
#[derive(Debug, Clone)]
pub struct Subject {
    /// Face region in frame coordinates.
    pub face_bbox: BoundingBox,
    /// Detector confidence.
    pub score: f32,
    /// Cropped color face image.
    pub face: RgbImage,
    /// Landmarks in frame coordinates.
    pub landmarks: Landmarks,
    /// Left eye patch, if extraction succeeded.
    pub left_eye: Option<EyePatch>,
    /// Right eye patch, if extraction succeeded.
    pub right_eye: Option<EyePatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_no_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 5.0, 5.0);
        let b = BoundingBox::new(6.0, 6.0, 4.0, 4.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_full_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = BoundingBox::from_corners(0.0, 0.0, 0.5, 0.5);
        let b = BoundingBox::from_corners(0.25, 0.25, 0.75, 0.75);
        let expected = 0.0625 / 0.4375;
        assert!((a.iou(&b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_fits_within() {
        assert!(BoundingBox::new(0.0, 0.0, 10.0, 10.0).fits_within(10, 10));
        assert!(!BoundingBox::new(-1.0, 0.0, 10.0, 10.0).fits_within(10, 10));
        assert!(!BoundingBox::new(5.0, 5.0, 10.0, 10.0).fits_within(10, 10));
        assert!(!BoundingBox::new(2.0, 2.0, 0.0, 3.0).fits_within(10, 10));
    }

    #[test]
    fn test_landmarks_require_68_points() {
        assert!(Landmarks::new(vec![Point2::default(); 67]).is_none());
        let lm = Landmarks::new(vec![Point2::new(1.0, 2.0); NUM_LANDMARKS]);
        assert!(lm.is_some_and(|l| l.get(67) == Some(Point2::new(1.0, 2.0))));
    }
}
