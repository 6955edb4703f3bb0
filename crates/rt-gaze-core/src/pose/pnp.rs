//! Perspective-n-point solver.
//!
//! Two steps: a non-iterative direct linear transform gives an initial pose,
//! then Levenberg-Marquardt refinement minimises the reprojection error in
//! normalized image coordinates. The refinement also starts from a frontal
//! prior (identity rotation, depth from the landmark spread) and keeps the
//! better of the two.
//!
//! The linear system: the 3x4 projection matrix is the null vector of a
//! `2n x 12` system, the left 3x3 block is projected onto the nearest
//! rotation and the translation is rescaled to match. Model points are
//! centred and scaled first so the system stays well conditioned for
//! millimetre-scale inputs.

#![allow(clippy::many_single_char_names)]

use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x4, Matrix6, Rotation3, Vector3, Vector6};
use tracing::debug;

use super::CameraIntrinsics;
use crate::domain::Point2;

/// Minimum number of correspondences the linear system needs.
pub const MIN_POINTS: usize = 6;

/// Smallest acceptable `|det|` of the recovered 3x3 block.
const DEGENERATE_DET: f64 = 1e-12;

/// Largest accepted RMS reprojection error relative to the landmark spread.
const MAX_RESIDUAL_RATIO: f64 = 0.15;

const MAX_ITERATIONS: usize = 100;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e10;
const DAMPING_FLOOR: f64 = 1e-12;
const COST_TOLERANCE: f64 = 1e-12;
const STEP_TOLERANCE: f64 = 1e-10;
const DIFF_STEP: f64 = 1e-6;

/// Rotation vector followed by translation.
type Params = Vector6<f64>;

/// A solved camera-from-model pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnpSolution {
    /// Axis-angle rotation vector.
    pub rotation: [f64; 3],
    /// Translation in model units.
    pub translation: [f64; 3],
    /// RMS reprojection error in pixels.
    pub rms_error: f64,
}

impl PnpSolution {
    /// Rotation vector as `f32`, the precision the network consumes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn rotation_f32(&self) -> [f32; 3] {
        [
            self.rotation[0] as f32,
            self.rotation[1] as f32,
            self.rotation[2] as f32,
        ]
    }
}

/// Solves for the pose that maps `model` points onto `image` points.
///
/// Returns `None` when the solve does not produce a usable pose: too few or
/// mismatched correspondences, non-finite input, collapsed landmarks, a
/// solution placing the model behind the camera, or a fit whose residual is
/// too large for a rigid face.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn solve_pnp(
    model: &[[f64; 3]],
    image: &[Point2],
    camera: &CameraIntrinsics,
) -> Option<PnpSolution> {
    let n = model.len();
    if n < MIN_POINTS || n != image.len() {
        debug!("PnP needs {MIN_POINTS}+ matched points, got {n}/{}", image.len());
        return None;
    }
    if model.iter().flatten().any(|v| !v.is_finite())
        || image.iter().any(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return None;
    }

    let points: Vec<Vector3<f64>> = model
        .iter()
        .map(|q| Vector3::new(q[0], q[1], q[2]))
        .collect();
    let observed: Vec<(f64, f64)> = image
        .iter()
        .map(|p| camera.normalize(f64::from(p.x), f64::from(p.y)))
        .collect();

    let spread = image_spread(&observed);
    if spread <= f64::EPSILON {
        debug!("PnP landmarks are collapsed");
        return None;
    }

    let starts = [
        linear_init(&points, &observed),
        frontal_init(&points, &observed, spread),
    ];
    let (params, cost) = starts
        .into_iter()
        .flatten()
        .filter_map(|init| refine(&points, &observed, init))
        .min_by(|(_, a), (_, b)| a.total_cmp(b))?;

    let rms = (cost / n as f64).sqrt();
    if !rms.is_finite() || rms > MAX_RESIDUAL_RATIO * spread {
        debug!("PnP residual too large ({rms:.4} for spread {spread:.4})");
        return None;
    }

    let rotvec = Rotation3::from_scaled_axis(params.fixed_rows::<3>(0).into_owned()).scaled_axis();
    Some(PnpSolution {
        rotation: [rotvec.x, rotvec.y, rotvec.z],
        translation: [params[3], params[4], params[5]],
        rms_error: rms * camera.focal,
    })
}

/// RMS distance of the normalized observations from their mean.
#[allow(clippy::cast_precision_loss)]
fn image_spread(observed: &[(f64, f64)]) -> f64 {
    let n = observed.len() as f64;
    let (mu, mv) = observed
        .iter()
        .fold((0.0, 0.0), |(su, sv), (u, v)| (su + u / n, sv + v / n));
    let var = observed
        .iter()
        .map(|(u, v)| (u - mu).powi(2) + (v - mv).powi(2))
        .sum::<f64>()
        / n;
    var.sqrt()
}

/// Identity rotation with the model centroid placed on the ray through the
/// landmark centroid, at the depth that matches the landmark spread.
#[allow(clippy::cast_precision_loss)]
fn frontal_init(
    points: &[Vector3<f64>],
    observed: &[(f64, f64)],
    spread: f64,
) -> Option<Params> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector3::<f64>::zeros(), |acc, q| acc + q) / n;
    let model_spread = (points
        .iter()
        .map(|q| (q.x - centroid.x).powi(2) + (q.y - centroid.y).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();
    let (mu, mv) = observed
        .iter()
        .fold((0.0, 0.0), |(su, sv), (u, v)| (su + u / n, sv + v / n));
    let depth = model_spread / spread;
    if !depth.is_finite() || depth <= 0.0 {
        return None;
    }
    let t = Vector3::new(mu * depth, mv * depth, depth) - centroid;
    Some(Params::new(0.0, 0.0, 0.0, t.x, t.y, t.z))
}

/// Direct linear transform over normalized coordinates.
fn linear_init(points: &[Vector3<f64>], observed: &[(f64, f64)]) -> Option<Params> {
    let n = points.len();
    let (centroid, scale) = conditioning(points)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (q, &(u, v))) in points.iter().zip(observed).enumerate() {
        let c = (q - centroid) / scale;
        let (x, y, z) = (c.x, c.y, c.z);

        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = z;
        a[(r, 3)] = 1.0;
        a[(r, 8)] = -u * x;
        a[(r, 9)] = -u * y;
        a[(r, 10)] = -u * z;
        a[(r, 11)] = -u;

        a[(r + 1, 4)] = x;
        a[(r + 1, 5)] = y;
        a[(r + 1, 6)] = z;
        a[(r + 1, 7)] = 1.0;
        a[(r + 1, 8)] = -v * x;
        a[(r + 1, 9)] = -v * y;
        a[(r + 1, 10)] = -v * z;
        a[(r + 1, 11)] = -v;
    }

    // 2n >= 12, so V^T is square and holds the full right null space candidate.
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_index, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|(_, x), (_, y)| x.total_cmp(y))?;
    let p: Vec<f64> = v_t.row(min_index).iter().copied().collect();

    let conditioned = Matrix3x4::from_row_slice(&p);

    // Undo the conditioning: P = P' * [I/s | -c/s]
    let m_cond = conditioned.fixed_view::<3, 3>(0, 0).into_owned();
    let t_cond = conditioned.column(3).into_owned();
    let mut m = m_cond / scale;
    let mut t = t_cond - m * centroid;

    let det = m.determinant();
    if !det.is_finite() || det.abs() < DEGENERATE_DET {
        debug!("PnP linear system is degenerate (det = {det:e})");
        return None;
    }
    if det < 0.0 {
        m = -m;
        t = -t;
    }

    let (rotation, lambda) = nearest_rotation(&m)?;
    let t = t / lambda;
    let rotvec = Rotation3::from_matrix_unchecked(rotation).scaled_axis();
    Some(Params::new(rotvec.x, rotvec.y, rotvec.z, t.x, t.y, t.z))
}

/// Centroid and RMS distance of the model points.
#[allow(clippy::cast_precision_loss)]
fn conditioning(points: &[Vector3<f64>]) -> Option<(Vector3<f64>, f64)> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector3::<f64>::zeros(), |acc, q| acc + q) / n;
    let spread = points
        .iter()
        .map(|q| (q - centroid).norm_squared())
        .sum::<f64>()
        / n;
    let scale = spread.sqrt();
    (scale > f64::EPSILON).then_some((centroid, scale))
}

/// Projects `m = lambda * R` onto SO(3), returning `R` and the scale.
fn nearest_rotation(m: &Matrix3<f64>) -> Option<(Matrix3<f64>, f64)> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let rotation = u * v_t;
    if rotation.determinant() <= 0.0 {
        return None;
    }
    let lambda = svd.singular_values.mean();
    (lambda > 0.0).then_some((rotation, lambda))
}

/// Reprojection residuals in normalized coordinates, `None` if any point
/// falls behind the camera.
fn residuals(
    points: &[Vector3<f64>],
    observed: &[(f64, f64)],
    params: &Params,
) -> Option<DVector<f64>> {
    let rotation = Rotation3::from_scaled_axis(params.fixed_rows::<3>(0).into_owned());
    let t = params.fixed_rows::<3>(3).into_owned();
    let mut r = DVector::zeros(2 * points.len());
    for (i, (q, &(u, v))) in points.iter().zip(observed).enumerate() {
        let c = rotation * q + t;
        if c.z <= f64::EPSILON {
            return None;
        }
        r[2 * i] = c.x / c.z - u;
        r[2 * i + 1] = c.y / c.z - v;
    }
    Some(r)
}

/// Central-difference Jacobian of [`residuals`].
fn jacobian(
    points: &[Vector3<f64>],
    observed: &[(f64, f64)],
    params: &Params,
) -> Option<DMatrix<f64>> {
    let mut j = DMatrix::zeros(2 * points.len(), 6);
    for k in 0..6 {
        let h = DIFF_STEP * params[k].abs().max(1.0);
        let mut plus = *params;
        plus[k] += h;
        let mut minus = *params;
        minus[k] -= h;
        let diff = (residuals(points, observed, &plus)? - residuals(points, observed, &minus)?)
            / (2.0 * h);
        j.set_column(k, &diff);
    }
    Some(j)
}

/// Levenberg-Marquardt on the reprojection error. Returns the refined
/// parameters and their squared residual norm.
fn refine(
    points: &[Vector3<f64>],
    observed: &[(f64, f64)],
    init: Params,
) -> Option<(Params, f64)> {
    let mut params = init;
    let mut r = residuals(points, observed, &params)?;
    let mut cost = r.norm_squared();
    let mut damping = INITIAL_DAMPING;

    for _ in 0..MAX_ITERATIONS {
        let Some(j) = jacobian(points, observed, &params) else {
            break;
        };
        let jt = j.transpose();
        let jtj = Matrix6::from_iterator((&jt * &j).iter().copied());
        let gradient = Vector6::from_iterator((&jt * &r).iter().copied());

        let mut accepted = None;
        while damping < MAX_DAMPING {
            let mut damped = jtj;
            for k in 0..6 {
                damped[(k, k)] += damping * jtj[(k, k)].max(DAMPING_FLOOR);
            }
            let Some(step) = damped.cholesky().map(|c| c.solve(&-gradient)) else {
                damping *= 10.0;
                continue;
            };
            let candidate = params + step;
            match residuals(points, observed, &candidate) {
                Some(rc) if rc.norm_squared() < cost => {
                    accepted = Some((candidate, rc, step.norm()));
                    break;
                }
                _ => damping *= 10.0,
            }
        }

        let Some((candidate, rc, step_norm)) = accepted else {
            break;
        };
        let new_cost = rc.norm_squared();
        let converged = cost - new_cost <= COST_TOLERANCE * cost || step_norm <= STEP_TOLERANCE;
        params = candidate;
        r = rc;
        cost = new_cost;
        damping = (damping / 10.0).max(DAMPING_FLOOR);
        if converged {
            break;
        }
    }
    Some((params, cost))
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::pose::FaceModel;

    #[allow(clippy::cast_possible_truncation)]
    fn project_model(
        model: &[[f64; 3]],
        rotation: [f64; 3],
        translation: [f64; 3],
        camera: &CameraIntrinsics,
    ) -> Vec<Point2> {
        let r = Rotation3::from_scaled_axis(Vector3::new(rotation[0], rotation[1], rotation[2]));
        let t = Vector3::new(translation[0], translation[1], translation[2]);
        model
            .iter()
            .map(|q| {
                let c = r * Vector3::new(q[0], q[1], q[2]) + t;
                let (u, v) = camera.project([c.x, c.y, c.z]);
                Point2::new(u as f32, v as f32)
            })
            .collect()
    }

    #[test]
    fn test_recovers_known_pose() {
        let model = FaceModel::generic();
        let camera = CameraIntrinsics::from_image(640, 480);
        let truth = [0.1, -0.25, 0.05];
        let image = project_model(model.points(), truth, [20.0, -10.0, 1500.0], &camera);

        let solution = solve_pnp(model.points(), &image, &camera);
        assert!(solution.is_some());
        let solution = solution.unwrap_or_else(|| panic!("solve failed"));
        for k in 0..3 {
            assert!(
                (solution.rotation[k] - truth[k]).abs() < 1e-2,
                "{:?} vs {truth:?}",
                solution.rotation
            );
        }
        assert!((solution.translation[2] - 1500.0).abs() < 15.0);
    }

    #[test]
    fn test_frontal_face_gives_identity() {
        let model = FaceModel::generic();
        let camera = CameraIntrinsics::from_image(640, 480);
        let image = project_model(model.points(), [0.0; 3], [0.0, 0.0, 1200.0], &camera);

        let solution = solve_pnp(model.points(), &image, &camera)
            .unwrap_or_else(|| panic!("solve failed"));
        for v in solution.rotation {
            assert!(v.abs() < 1e-2);
        }
    }

    #[test]
    fn test_too_few_points() {
        let model = FaceModel::generic();
        let camera = CameraIntrinsics::from_image(640, 480);
        let image = project_model(model.points(), [0.0; 3], [0.0, 0.0, 1200.0], &camera);
        assert!(solve_pnp(&model.points()[..5], &image[..5], &camera).is_none());
    }

    #[test]
    fn test_mismatched_lengths() {
        let model = FaceModel::generic();
        let camera = CameraIntrinsics::from_image(640, 480);
        let image = vec![Point2::new(1.0, 1.0); 7];
        assert!(solve_pnp(model.points(), &image, &camera).is_none());
    }

    #[test]
    fn test_collapsed_landmarks_fail() {
        let model = FaceModel::generic();
        let camera = CameraIntrinsics::from_image(640, 480);
        let image = vec![Point2::new(320.0, 240.0); 6];
        assert!(solve_pnp(model.points(), &image, &camera).is_none());
    }

    #[test]
    fn test_non_finite_input_fails() {
        let model = FaceModel::generic();
        let camera = CameraIntrinsics::from_image(640, 480);
        let mut image = project_model(model.points(), [0.0; 3], [0.0, 0.0, 1200.0], &camera);
        image[2] = Point2::new(f32::NAN, 3.0);
        assert!(solve_pnp(model.points(), &image, &camera).is_none());
    }

    /// Rotation errors in degrees over `trials` random head poses with
    /// uniform pixel jitter of `noise` on every landmark; `None` entries are
    /// failed solves.
    #[allow(clippy::cast_possible_truncation)]
    fn jittered_errors(
        model: &FaceModel,
        noise: f32,
        trials: usize,
        seed: u64,
    ) -> Vec<Option<f64>> {
        let camera = CameraIntrinsics::from_image(640, 480);
        let mut rng = StdRng::seed_from_u64(seed);
        (0..trials)
            .map(|_| {
                let truth = [
                    rng.gen_range(-0.3..=0.3),
                    rng.gen_range(-0.5..=0.5),
                    rng.gen_range(-0.2..=0.2),
                ];
                let translation = [
                    rng.gen_range(-100.0..=100.0),
                    rng.gen_range(-60.0..=60.0),
                    1500.0,
                ];
                let image: Vec<Point2> = project_model(model.points(), truth, translation, &camera)
                    .into_iter()
                    .map(|p| {
                        Point2::new(
                            p.x + rng.gen_range(-noise..=noise),
                            p.y + rng.gen_range(-noise..=noise),
                        )
                    })
                    .collect();
                solve_pnp(model.points(), &image, &camera).map(|solution| {
                    let expected =
                        Rotation3::from_scaled_axis(Vector3::new(truth[0], truth[1], truth[2]));
                    let r = solution.rotation;
                    let solved = Rotation3::from_scaled_axis(Vector3::new(r[0], r[1], r[2]));
                    (solved * expected.inverse()).angle().to_degrees()
                })
            })
            .collect()
    }

    fn median(values: &mut [f64]) -> f64 {
        values.sort_by(f64::total_cmp);
        values[values.len() / 2]
    }

    #[test]
    fn test_dense_model_stable_under_pixel_jitter() {
        let errors = jittered_errors(&FaceModel::dense(), 2.0, 200, 7);
        let mut solved: Vec<f64> = errors.iter().flatten().copied().collect();
        assert_eq!(solved.len(), errors.len(), "every jittered frame must solve");

        let worst = solved.iter().copied().fold(0.0, f64::max);
        assert!(median(&mut solved) < 2.0, "median error too large");
        assert!(worst < 6.0, "worst error {worst:.2} deg");
    }

    #[test]
    fn test_generic_model_solves_under_pixel_jitter() {
        let errors = jittered_errors(&FaceModel::generic(), 1.0, 200, 11);
        let mut solved: Vec<f64> = errors.iter().flatten().copied().collect();
        assert_eq!(solved.len(), errors.len(), "every jittered frame must solve");
        assert!(median(&mut solved) < 4.0);
    }

    #[test]
    fn test_refinement_reports_small_residual() {
        let model = FaceModel::dense();
        let camera = CameraIntrinsics::from_image(640, 480);
        let image = project_model(model.points(), [0.2, 0.3, -0.1], [0.0, 0.0, 1500.0], &camera);
        let solution = solve_pnp(model.points(), &image, &camera)
            .unwrap_or_else(|| panic!("solve failed"));
        assert!(solution.rms_error < 0.05, "{}", solution.rms_error);
    }

    #[test]
    fn test_non_rigid_landmarks_fail() {
        let model = FaceModel::dense();
        let camera = CameraIntrinsics::from_image(640, 480);
        let mut image = vec![Point2::new(320.0, 240.0); model.len()];
        image[39] = Point2::new(350.0, 240.0);
        image[42] = Point2::new(290.0, 240.0);
        assert!(solve_pnp(model.points(), &image, &camera).is_none());
    }
}
