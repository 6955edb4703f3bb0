//! Gaze visualization on eye patches.

#![allow(clippy::cast_precision_loss)]

use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::domain::GazeAngles;

/// Arrow length on a reference 224 px patch.
const ARROW_LENGTH: f32 = 50.0;
const REFERENCE_SIZE: f32 = 224.0;
const ARROW_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Draws the gaze direction as a line from the patch centre.
#[must_use]
pub fn draw_gaze(patch: &RgbImage, gaze: GazeAngles) -> RgbImage {
    let mut out = patch.clone();
    let (w, h) = out.dimensions();
    if w == 0 || h == 0 {
        return out;
    }

    let scale = w.min(h) as f32 / REFERENCE_SIZE;
    let length = ARROW_LENGTH * scale;
    let [dx, dy, _] = gaze.to_vector();

    let cx = (w / 2) as f32;
    let cy = (h / 2) as f32;
    let end = (dx.mul_add(length, cx), dy.mul_add(length, cy));

    // Two pixel wide stroke.
    draw_line_segment_mut(&mut out, (cx, cy), end, ARROW_COLOR);
    draw_line_segment_mut(&mut out, (cx + 1.0, cy), (end.0 + 1.0, end.1), ARROW_COLOR);
    out
}

/// Concatenates two patches horizontally, `first` on the left.
#[must_use]
pub fn side_by_side(first: &RgbImage, second: &RgbImage) -> RgbImage {
    let width = first.width() + second.width();
    let height = first.height().max(second.height());
    let mut out = RgbImage::new(width, height);
    imageops::replace(&mut out, first, 0, 0);
    imageops::replace(&mut out, second, i64::from(first.width()), 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_gaze_marks_pixels() {
        let patch = RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]));
        let drawn = draw_gaze(&patch, GazeAngles::new(0.0, 0.5));
        assert_eq!(drawn.dimensions(), patch.dimensions());
        assert_ne!(drawn, patch);
        assert_eq!(*drawn.get_pixel(32, 32), ARROW_COLOR);
    }

    #[test]
    fn test_side_by_side_layout() {
        let a = RgbImage::from_pixel(10, 8, Rgb([255, 0, 0]));
        let b = RgbImage::from_pixel(12, 8, Rgb([0, 255, 0]));
        let joined = side_by_side(&a, &b);
        assert_eq!(joined.dimensions(), (22, 8));
        assert_eq!(*joined.get_pixel(0, 0), Rgb([255, 0, 0]));
        assert_eq!(*joined.get_pixel(21, 7), Rgb([0, 255, 0]));
    }
}
