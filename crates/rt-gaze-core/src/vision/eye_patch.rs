//! Square eye-patch extraction from 68-point landmarks.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

use crate::domain::{BoundingBox, EyePatch, Landmarks};

/// Outer and inner corner of the subject's right eye (image left).
const RIGHT_EYE_CORNERS: (usize, usize) = (36, 39);
/// Inner and outer corner of the subject's left eye (image right).
const LEFT_EYE_CORNERS: (usize, usize) = (42, 45);

/// Margin added around the eye, as a fraction of the corner distance.
const MARGIN_RATIO: f32 = 1.0;

/// Square crop box around one eye, or `None` if the corners coincide.
#[must_use]
pub fn eye_box(landmarks: &Landmarks, corners: (usize, usize)) -> Option<BoundingBox> {
    let a = landmarks.get(corners.0)?;
    let b = landmarks.get(corners.1)?;

    let eye_width = (b.x - a.x).hypot(b.y - a.y);
    let side = eye_width * (1.0 + MARGIN_RATIO);
    if !side.is_finite() || side < 1.0 {
        return None;
    }

    let cx = (a.x + b.x) / 2.0;
    let cy = (a.y + b.y) / 2.0;
    Some(BoundingBox::new(
        (cx - side / 2.0).round(),
        (cy - side / 2.0).round(),
        side.round(),
        side.round(),
    ))
}

fn crop_eye(frame: &RgbImage, bbox: BoundingBox, size: u32) -> Option<EyePatch> {
    if !bbox.fits_within(frame.width(), frame.height()) {
        debug!("Eye box {bbox:?} falls outside the frame");
        return None;
    }
    let crop = imageops::crop_imm(
        frame,
        bbox.x as u32,
        bbox.y as u32,
        bbox.width as u32,
        bbox.height as u32,
    )
    .to_image();
    if crop.width() == 0 || crop.height() == 0 {
        return None;
    }
    let image = imageops::resize(&crop, size, size, FilterType::CatmullRom);
    Some(EyePatch { image, bbox })
}

/// Crops both eyes from `frame` and resizes them to `size x size`.
///
/// Returns `(left, right)` where left is the subject's left eye. `None` if
/// either patch is empty or leaves the frame.
#[must_use]
pub fn extract_eye_patches(
    frame: &RgbImage,
    landmarks: &Landmarks,
    size: u32,
) -> Option<(EyePatch, EyePatch)> {
    if size == 0 {
        return None;
    }
    let left = crop_eye(frame, eye_box(landmarks, LEFT_EYE_CORNERS)?, size)?;
    let right = crop_eye(frame, eye_box(landmarks, RIGHT_EYE_CORNERS)?, size)?;
    Some((left, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Point2, NUM_LANDMARKS};

    fn landmarks_with_eyes(right: (f32, f32, f32), left: (f32, f32, f32)) -> Landmarks {
        let mut points = vec![Point2::new(50.0, 50.0); NUM_LANDMARKS];
        points[36] = Point2::new(right.0, right.2);
        points[39] = Point2::new(right.1, right.2);
        points[42] = Point2::new(left.0, left.2);
        points[45] = Point2::new(left.1, left.2);
        Landmarks::new(points).unwrap_or_else(|| panic!("68 points"))
    }

    #[test]
    fn test_eye_box_is_square_and_centred() {
        let lm = landmarks_with_eyes((30.0, 50.0, 40.0), (70.0, 90.0, 40.0));
        let bbox = eye_box(&lm, RIGHT_EYE_CORNERS).unwrap_or_else(|| panic!("box"));
        assert!((bbox.width - 40.0).abs() < f32::EPSILON);
        assert!((bbox.height - bbox.width).abs() < f32::EPSILON);
        assert!((bbox.x + bbox.width / 2.0 - 40.0).abs() < 1.0);
        assert!((bbox.y + bbox.height / 2.0 - 40.0).abs() < 1.0);
    }

    #[test]
    fn test_extract_resizes_to_input_size() {
        let frame = RgbImage::from_pixel(200, 120, image::Rgb([90, 60, 30]));
        let lm = landmarks_with_eyes((60.0, 80.0, 60.0), (120.0, 140.0, 60.0));
        let (left, right) =
            extract_eye_patches(&frame, &lm, 36).unwrap_or_else(|| panic!("patches"));
        assert_eq!(left.image.dimensions(), (36, 36));
        assert_eq!(right.image.dimensions(), (36, 36));
        assert!(left.bbox.x > right.bbox.x);
    }

    #[test]
    fn test_out_of_frame_eye_fails() {
        let frame = RgbImage::new(100, 100);
        let lm = landmarks_with_eyes((2.0, 30.0, 5.0), (60.0, 80.0, 50.0));
        assert!(extract_eye_patches(&frame, &lm, 32).is_none());
    }

    #[test]
    fn test_collapsed_corners_fail() {
        let frame = RgbImage::new(100, 100);
        let lm = landmarks_with_eyes((40.0, 40.0, 40.0), (60.0, 80.0, 50.0));
        assert!(extract_eye_patches(&frame, &lm, 32).is_none());
    }
}
