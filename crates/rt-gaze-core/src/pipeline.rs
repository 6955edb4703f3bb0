//! Per-frame inference: face, landmarks, eye patches, head pose, gaze.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::f32::consts::PI;

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use image::{imageops, RgbImage};
use tracing::debug;

use crate::domain::{
    BoundingBox, FrameOutcome, GazeEstimate, GazeRegressor, ImageInfo, SkipReason, Subject,
};
use crate::inference::DEFAULT_MIN_FACE_SCORE;
use crate::pose::{estimate_head_pose, FaceModel};
use crate::ports::FaceLandmarker;
use crate::training::{validate_input_size, DEFAULT_INPUT_SIZE};
use crate::vision::{draw_gaze, extract_eye_patches, normalize_patch, side_by_side};

/// Inference settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Eye patch resolution fed to the network.
    pub input_size: u32,
    /// Bound applied to the head-pose yaw, in radians.
    pub max_yaw: f32,
    /// 3-D model points for the head-pose solve.
    pub face_model: FaceModel,
    /// Detector confidence below which faces are ignored.
    pub min_face_score: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            max_yaw: PI,
            face_model: FaceModel::default(),
            min_face_score: DEFAULT_MIN_FACE_SCORE,
        }
    }
}

/// Runs the detector, head-pose solver and gaze regressor on single frames.
pub struct GazePipeline {
    landmarker: Box<dyn FaceLandmarker>,
    regressor: Box<dyn GazeRegressor>,
    config: PipelineConfig,
    device: Device,
}

impl GazePipeline {
    /// Creates a pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the input size is out of range or `max_yaw` is
    /// not a positive finite angle.
    pub fn new(
        landmarker: Box<dyn FaceLandmarker>,
        regressor: Box<dyn GazeRegressor>,
        config: PipelineConfig,
        device: Device,
    ) -> Result<Self> {
        validate_input_size(config.input_size)?;
        if !config.max_yaw.is_finite() || config.max_yaw <= 0.0 {
            anyhow::bail!("max yaw must be a positive angle, got {}", config.max_yaw);
        }
        Ok(Self {
            landmarker,
            regressor,
            config,
            device,
        })
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Estimates gaze for the most confident face in `image`.
    ///
    /// Frames without a usable face, eye patches or head pose come back as
    /// [`FrameOutcome::Skipped`].
    ///
    /// # Errors
    ///
    /// Returns an error if the detector or the regressor fails.
    pub fn process(&self, image: &ImageInfo) -> Result<FrameOutcome> {
        let subject = match self.subject(image)? {
            Ok(subject) => subject,
            Err(reason) => return Ok(FrameOutcome::Skipped(reason)),
        };
        let (Some(left), Some(right)) = (&subject.left_eye, &subject.right_eye) else {
            return Ok(FrameOutcome::Skipped(SkipReason::NoEyePatches));
        };

        let Some(head_pose) = estimate_head_pose(
            &subject.landmarks,
            &self.config.face_model,
            image.width,
            image.height,
            self.config.max_yaw,
        ) else {
            return Ok(FrameOutcome::Skipped(SkipReason::PoseUnsolved));
        };

        let size = self.config.input_size;
        let left_t = normalize_patch(&left.image, size, &self.device)?;
        let right_t = normalize_patch(&right.image, size, &self.device)?;
        let head_t = Tensor::from_slice(&head_pose.to_array(), (1, 2), &self.device)?;

        let gaze = self
            .regressor
            .predict(&left_t, &right_t, &head_t)
            .with_context(|| format!("Gaze regression failed for {}", image.path))?;
        debug!(
            "{}: head pose ({:.3}, {:.3}) gaze ({:.3}, {:.3})",
            image.path, head_pose.phi, head_pose.theta, gaze.theta, gaze.phi
        );

        Ok(FrameOutcome::Estimated(Box::new(GazeEstimate {
            subject,
            head_pose,
            gaze,
            models: self.regressor.members(),
        })))
    }

    /// Builds the subject for the first face above the score threshold.
    ///
    /// The inner result carries the skip reason when no subject can be
    /// built; the outer one carries detector errors.
    fn subject(&self, image: &ImageInfo) -> Result<Result<Subject, SkipReason>> {
        let faces = self
            .landmarker
            .detect_faces(&image.image)
            .with_context(|| format!("Face detection failed for {}", image.path))?;
        let Some(face) = faces
            .into_iter()
            .find(|f| f.score >= self.config.min_face_score)
        else {
            debug!("{}: no face", image.path);
            return Ok(Err(SkipReason::NoFace));
        };

        let Some(landmarks) = self
            .landmarker
            .landmarks(&image.image, &face)
            .with_context(|| format!("Landmark regression failed for {}", image.path))?
        else {
            debug!("{}: landmarks could not be placed", image.path);
            return Ok(Err(SkipReason::NoLandmarks));
        };

        let frame = image.image.to_rgb8();
        let Some(face_crop) = crop_clamped(&frame, &face.bbox) else {
            debug!("{}: face box {:?} lies outside the frame", image.path, face.bbox);
            return Ok(Err(SkipReason::NoFace));
        };
        let eyes = extract_eye_patches(&frame, &landmarks, self.config.input_size);
        let (left_eye, right_eye) = eyes.map_or((None, None), |(l, r)| (Some(l), Some(r)));

        Ok(Ok(Subject {
            face_bbox: face.bbox,
            score: face.score,
            face: face_crop,
            landmarks,
            left_eye,
            right_eye,
        }))
    }
}

/// Renders the estimate onto both eye patches, right eye first.
///
/// Returns `None` if the subject has no eye patches.
#[must_use]
pub fn render_estimate(estimate: &GazeEstimate) -> Option<RgbImage> {
    let left = estimate.subject.left_eye.as_ref()?;
    let right = estimate.subject.right_eye.as_ref()?;
    Some(side_by_side(
        &draw_gaze(&right.image, estimate.gaze),
        &draw_gaze(&left.image, estimate.gaze),
    ))
}

fn crop_clamped(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = (bbox.x_max().ceil().max(0.0) as u32).min(frame.width());
    let y1 = (bbox.y_max().ceil().max(0.0) as u32).min(frame.height());
    (x1 > x0 && y1 > y0).then(|| imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image())
}
