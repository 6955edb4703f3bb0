//! Face and landmark detector port.

use crate::domain::{BoundingBox, Landmarks};

/// A face found by the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedFace {
    /// Face region in pixel coordinates.
    pub bbox: BoundingBox,
    /// Detection confidence (0.0 to 1.0).
    pub score: f32,
}

/// Port for the face detector and landmark regressor collaborator.
pub trait FaceLandmarker: Send + Sync {
    /// Detects faces, most confident first.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn detect_faces(&self, image: &image::DynamicImage) -> anyhow::Result<Vec<DetectedFace>>;

    /// Locates the 68 landmarks of a detected face, in frame coordinates.
    ///
    /// Returns `Ok(None)` if the landmarks cannot be placed.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn landmarks(
        &self,
        image: &image::DynamicImage,
        face: &DetectedFace,
    ) -> anyhow::Result<Option<Landmarks>>;
}
