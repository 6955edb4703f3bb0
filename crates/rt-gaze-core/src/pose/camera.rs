//! Pinhole camera approximated from image size.

/// Intrinsics of an uncalibrated camera with zero distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in pixels (same on both axes).
    pub focal: f64,
    /// Principal point x.
    pub cx: f64,
    /// Principal point y.
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Approximates intrinsics from the frame size.
    ///
    /// The focal length is set to the image height and the principal point
    /// to the image centre.
    #[must_use]
    pub fn from_image(width: u32, height: u32) -> Self {
        let h = f64::from(height);
        Self {
            focal: h,
            cx: f64::from(width) / 2.0,
            cy: h / 2.0,
        }
    }

    /// Maps a pixel to normalized image coordinates.
    #[must_use]
    pub fn normalize(&self, u: f64, v: f64) -> (f64, f64) {
        ((u - self.cx) / self.focal, (v - self.cy) / self.focal)
    }

    /// Projects a camera-space point to pixel coordinates.
    #[must_use]
    pub fn project(&self, point: [f64; 3]) -> (f64, f64) {
        (
            self.focal * point[0] / point[2] + self.cx,
            self.focal * point[1] / point[2] + self.cy,
        )
    }
}
