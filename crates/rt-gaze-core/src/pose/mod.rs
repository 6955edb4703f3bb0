//! Head pose estimation from 2-D landmarks.

mod camera;
mod face_model;
mod pnp;

pub use camera::CameraIntrinsics;
pub use face_model::FaceModel;
pub use pnp::{solve_pnp, PnpSolution, MIN_POINTS};

use crate::domain::{HeadPose, Landmarks};

/// Estimates head pose for a face in a `width x height` frame.
///
/// Returns `None` if the PnP solve fails.
#[must_use]
pub fn estimate_head_pose(
    landmarks: &Landmarks,
    model: &FaceModel,
    width: u32,
    height: u32,
    max_yaw: f32,
) -> Option<HeadPose> {
    let camera = CameraIntrinsics::from_image(width, height);
    let image_points = model.image_points(landmarks);
    let solution = solve_pnp(model.points(), &image_points, &camera)?;
    Some(HeadPose::from_rotation_vector(
        solution.rotation_f32(),
        max_yaw,
    ))
}
