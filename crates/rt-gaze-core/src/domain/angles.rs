//! Gaze and head-pose angle types.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Gaze direction as pitch (`theta`) and yaw (`phi`), in radians.
///
/// Network outputs and dataset labels store the pair in `[theta, phi]` order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazeAngles {
    /// Vertical angle, positive looking down.
    pub theta: f32,
    /// Horizontal angle.
    pub phi: f32,
}

impl GazeAngles {
    /// Creates gaze angles from pitch and yaw.
    #[must_use]
    pub const fn new(theta: f32, phi: f32) -> Self {
        Self { theta, phi }
    }

    /// Builds angles from the first two values of a network output row.
    ///
    /// Returns `None` when fewer than two values are present.
    #[must_use]
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match values {
            [theta, phi, ..] => Some(Self::new(*theta, *phi)),
            _ => None,
        }
    }

    /// Returns the `[theta, phi]` pair.
    #[must_use]
    pub const fn to_array(self) -> [f32; 2] {
        [self.theta, self.phi]
    }

    /// Unit gaze vector in camera coordinates.
    #[must_use]
    pub fn to_vector(self) -> [f32; 3] {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let (sin_p, cos_p) = self.phi.sin_cos();
        [-cos_t * sin_p, -sin_t, -cos_t * cos_p]
    }
}

/// Angle in degrees between two gaze directions.
///
/// The cosine is clamped to `[-1, 1]` before `acos`, so identical inputs
/// always give exactly zero.
#[must_use]
pub fn angular_error_deg(pred: GazeAngles, truth: GazeAngles) -> f32 {
    let p = normalize(pred.to_vector());
    let t = normalize(truth.to_vector());
    let dot = p[0].mul_add(t[0], p[1].mul_add(t[1], p[2] * t[2]));
    dot.clamp(-1.0, 1.0).acos().to_degrees()
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let norm = v[0].mul_add(v[0], v[1].mul_add(v[1], v[2] * v[2])).sqrt();
    if norm > 0.0 {
        [v[0] / norm, v[1] / norm, v[2] / norm]
    } else {
        v
    }
}

/// Head orientation fed to the gaze network, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    /// Horizontal head angle.
    pub phi: f32,
    /// Vertical head angle.
    pub theta: f32,
}

impl HeadPose {
    /// Creates a head pose from its two angles.
    #[must_use]
    pub const fn new(phi: f32, theta: f32) -> Self {
        Self { phi, theta }
    }

    /// Converts a solved rotation vector into the network's head-pose pair.
    ///
    /// The rotation vector components are read as Euler angles with the sign
    /// convention `roll = -rz`, `pitch = -rx`, `yaw = ry + pi`. Yaw is then
    /// passed through [`limit_yaw`] before `phi = -yaw`, `theta = -pitch`.
    #[must_use]
    pub fn from_rotation_vector(rotation: [f32; 3], max_yaw: f32) -> Self {
        let pitch = -rotation[0];
        let yaw = limit_yaw(rotation[1] + PI, max_yaw);
        Self::new(-yaw, -pitch)
    }

    /// Returns the `[phi, theta]` pair in network input order.
    #[must_use]
    pub const fn to_array(self) -> [f32; 2] {
        [self.phi, self.theta]
    }
}

/// Rotates yaw by half a turn, wraps it into `(-pi, pi]` and clamps it to
/// `[-max_yaw, max_yaw]`.
#[must_use]
pub fn limit_yaw(yaw: f32, max_yaw: f32) -> f32 {
    let bound = max_yaw.abs().min(PI);
    wrap_to_pi(yaw + PI).clamp(-bound, bound)
}

/// Wraps an angle into `(-pi, pi]`.
#[must_use]
pub fn wrap_to_pi(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_gaze_vector() {
        let v = GazeAngles::new(0.0, 0.0).to_vector();
        assert!(v[0].abs() < 1e-6);
        assert!(v[1].abs() < 1e-6);
        assert!((v[2] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_angular_error_identical_is_zero() {
        let g = GazeAngles::new(0.3, -0.2);
        assert!(angular_error_deg(g, g).abs() < 1e-3);
    }

    #[test]
    fn test_angular_error_pure_yaw() {
        let a = GazeAngles::new(0.0, 0.0);
        let b = GazeAngles::new(0.0, 10_f32.to_radians());
        assert!((angular_error_deg(a, b) - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_from_slice_ignores_spread() {
        let g = GazeAngles::from_slice(&[0.1, 0.2, 0.9]);
        assert_eq!(g, Some(GazeAngles::new(0.1, 0.2)));
        assert!(GazeAngles::from_slice(&[0.1]).is_none());
    }

    #[test]
    fn test_wrap_to_pi_range() {
        for i in -40..=40 {
            let a = wrap_to_pi(i as f32 * 0.37);
            assert!(a > -PI - 1e-6 && a <= PI + 1e-6, "{a}");
        }
        assert!((wrap_to_pi(PI) - PI).abs() < 1e-5);
        assert!((wrap_to_pi(-PI) - PI).abs() < 1e-5);
    }

    #[test]
    fn test_limit_yaw_respects_bound() {
        let bound = 0.5;
        for i in -60..=60 {
            let yaw = limit_yaw(i as f32 * 0.11, bound);
            assert!(yaw.abs() <= bound + 1e-6);
        }
    }

    #[test]
    fn test_head_pose_frontal_face() {
        // A frontal face gives a rotation vector near zero: yaw is rotated by
        // a full turn and ends up back at zero.
        let pose = HeadPose::from_rotation_vector([0.0, 0.0, 0.0], PI);
        assert!(pose.phi.abs() < 1e-5);
        assert!(pose.theta.abs() < 1e-5);
    }

    #[test]
    fn test_head_pose_signs() {
        let pose = HeadPose::from_rotation_vector([0.2, 0.3, 0.1], PI);
        assert!((pose.theta - 0.2).abs() < 1e-5);
        assert!((pose.phi + 0.3).abs() < 1e-5);
    }
}
