//! Face detector plus landmark regressor behind the [`FaceLandmarker`] port.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::Device;
use tracing::debug;

use super::{BlazeFace, LazyModel, Landmarks68};
use crate::domain::Landmarks;
use crate::ports::{DetectedFace, FaceLandmarker};

/// Default minimum detector confidence.
pub const DEFAULT_MIN_FACE_SCORE: f32 = 0.75;

/// `BlazeFace` detection followed by `Landmarks68` regression.
///
/// Both networks load lazily, so constructing the landmarker is cheap and
/// missing weight files surface on the first frame.
pub struct CnnLandmarker {
    detector: LazyModel<BlazeFace>,
    regressor: LazyModel<Landmarks68>,
    min_score: f32,
}

impl CnnLandmarker {
    /// Creates a landmarker from the two weight files.
    #[must_use]
    pub fn new(
        detector_weights: impl AsRef<Path>,
        landmark_weights: impl AsRef<Path>,
        device: &Device,
    ) -> Self {
        Self {
            detector: LazyModel::new(detector_weights, device.clone(), BlazeFace::new),
            regressor: LazyModel::new(landmark_weights, device.clone(), Landmarks68::new),
            min_score: DEFAULT_MIN_FACE_SCORE,
        }
    }

    /// Sets the minimum detector confidence.
    #[must_use]
    pub const fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }
}

impl FaceLandmarker for CnnLandmarker {
    fn detect_faces(&self, image: &image::DynamicImage) -> Result<Vec<DetectedFace>> {
        let faces = self
            .detector
            .get()?
            .detect(image, self.min_score)
            .context("Face detection failed")?;
        debug!("Found {} faces", faces.len());
        Ok(faces)
    }

    fn landmarks(
        &self,
        image: &image::DynamicImage,
        face: &DetectedFace,
    ) -> Result<Option<Landmarks>> {
        self.regressor
            .get()?
            .predict(image, &face.bbox)
            .context("Landmark regression failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BoundingBox;

    #[test]
    fn test_missing_weights_fail_on_first_use() {
        let landmarker = CnnLandmarker::new(
            "/nonexistent/blazeface.safetensors",
            "/nonexistent/landmarks68.safetensors",
            &Device::Cpu,
        );
        let image = image::DynamicImage::new_rgb8(64, 64);
        assert!(landmarker.detect_faces(&image).is_err());
        let face = DetectedFace {
            bbox: BoundingBox::new(0.0, 0.0, 32.0, 32.0),
            score: 0.9,
        };
        assert!(landmarker.landmarks(&image, &face).is_err());
    }
}
