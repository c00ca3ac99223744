//! Manifold operators on samples: integration, error, relative pose,
//! and the Jacobians required by the reachability gradient chain rule.
//!
//! Velocity convention: translation components integrate additively in the
//! world frame; rotation components integrate by left-multiplying the
//! exponential of the angular velocity. `sample_error` and
//! `rel_vel_to_vel_mat` follow the same convention, so gradients propagated
//! through them match finite differences of the integration step.

use nalgebra::{DMatrix, DVector, Matrix3, UnitQuaternion, Vector3};

use crate::sampling::space::{quat_from_sample, SamplingSpace};

/// Normalize an angle to [-pi, pi]
pub fn wrap_to_pi(mut angle: f64) -> f64 {
    while angle > std::f64::consts::PI {
        angle -= 2.0 * std::f64::consts::PI;
    }
    while angle < -std::f64::consts::PI {
        angle += 2.0 * std::f64::consts::PI;
    }
    angle
}

/// Integrate a velocity into a sample in place, assuming unit time step
pub fn integrate_vel_to_sample(space: SamplingSpace, sample: &mut DVector<f64>, vel: &DVector<f64>) {
    debug_assert_eq!(sample.len(), space.sample_dim());
    debug_assert_eq!(vel.len(), space.vel_dim());
    match space {
        SamplingSpace::R2 | SamplingSpace::R3 => {
            for i in 0..sample.len() {
                sample[i] += vel[i];
            }
        }
        SamplingSpace::SO2 => sample[0] += vel[0],
        SamplingSpace::SE2 => {
            sample[0] += vel[0];
            sample[1] += vel[1];
            sample[2] += vel[2];
        }
        SamplingSpace::SO3 => integrate_quat_block(sample, 0, &Vector3::new(vel[0], vel[1], vel[2])),
        SamplingSpace::SE3 => {
            sample[0] += vel[0];
            sample[1] += vel[1];
            sample[2] += vel[2];
            integrate_quat_block(sample, 3, &Vector3::new(vel[3], vel[4], vel[5]));
        }
    }
}

/// Velocity that carries `pre` onto `suc` when integrated for one step.
///
/// Exact for every space under this crate's conventions; callers should
/// still treat rotation-bearing differences as first-order quantities when
/// used inside linearized constraints.
pub fn sample_error(space: SamplingSpace, pre: &DVector<f64>, suc: &DVector<f64>) -> DVector<f64> {
    debug_assert_eq!(pre.len(), space.sample_dim());
    debug_assert_eq!(suc.len(), space.sample_dim());
    match space {
        SamplingSpace::R2 | SamplingSpace::R3 => suc - pre,
        SamplingSpace::SO2 => DVector::from_vec(vec![wrap_to_pi(suc[0] - pre[0])]),
        SamplingSpace::SE2 => DVector::from_vec(vec![
            suc[0] - pre[0],
            suc[1] - pre[1],
            wrap_to_pi(suc[2] - pre[2]),
        ]),
        SamplingSpace::SO3 => {
            let w = quat_log_diff(pre, suc, 0);
            DVector::from_vec(vec![w[0], w[1], w[2]])
        }
        SamplingSpace::SE3 => {
            let w = quat_log_diff(pre, suc, 3);
            DVector::from_vec(vec![
                suc[0] - pre[0],
                suc[1] - pre[1],
                suc[2] - pre[2],
                w[0],
                w[1],
                w[2],
            ])
        }
    }
}

/// Sample of `suc` expressed in the local frame of `pre`
/// (group inverse-compose, not vector subtraction)
pub fn rel_sample(space: SamplingSpace, pre: &DVector<f64>, suc: &DVector<f64>) -> DVector<f64> {
    let pre_pose = space.sample_to_pose(pre);
    let suc_pose = space.sample_to_pose(suc);
    space.pose_to_sample(&pre_pose.inv_mul(&suc_pose))
}

/// Jacobian mapping a velocity of `suc` (or of `pre` when `wrt_suc` is
/// false) to the velocity of `rel_sample(pre, suc)`.
///
/// Well-defined at identity and at zero rotation angle: the rotation blocks
/// degenerate to plus/minus identity.
pub fn rel_vel_to_vel_mat(
    space: SamplingSpace,
    pre: &DVector<f64>,
    suc: &DVector<f64>,
    wrt_suc: bool,
) -> DMatrix<f64> {
    let dim = space.vel_dim();
    let sign = if wrt_suc { 1.0 } else { -1.0 };
    match space {
        SamplingSpace::R2 | SamplingSpace::SO2 | SamplingSpace::R3 => {
            DMatrix::identity(dim, dim) * sign
        }
        SamplingSpace::SE2 => {
            let (c, s) = (pre[2].cos(), pre[2].sin());
            // transpose of the planar rotation of pre
            let mut mat = DMatrix::zeros(3, 3);
            mat[(0, 0)] = sign * c;
            mat[(0, 1)] = sign * s;
            mat[(1, 0)] = sign * -s;
            mat[(1, 1)] = sign * c;
            mat[(2, 2)] = sign;
            if !wrt_suc {
                // motion of the pre frame also sweeps the relative translation
                let dx = suc[0] - pre[0];
                let dy = suc[1] - pre[1];
                mat[(0, 2)] = c * dy - s * dx;
                mat[(1, 2)] = -s * dy - c * dx;
            }
            mat
        }
        SamplingSpace::SO3 => {
            let rt = quat_from_sample(pre, 0).to_rotation_matrix().matrix().transpose();
            let mut mat = DMatrix::zeros(3, 3);
            set_block3(&mut mat, 0, 0, &(rt * sign));
            mat
        }
        SamplingSpace::SE3 => {
            let rt = quat_from_sample(pre, 3).to_rotation_matrix().matrix().transpose();
            let mut mat = DMatrix::zeros(6, 6);
            set_block3(&mut mat, 0, 0, &(rt * sign));
            set_block3(&mut mat, 3, 3, &(rt * sign));
            if !wrt_suc {
                let dt = Vector3::new(suc[0] - pre[0], suc[1] - pre[1], suc[2] - pre[2]);
                set_block3(&mut mat, 0, 3, &(rt * skew(&dt)));
            }
            mat
        }
    }
}

/// Jacobian of `sample_to_input` with respect to the velocity at `sample`
/// (input_dim x vel_dim)
pub fn input_vel_mat(space: SamplingSpace, sample: &DVector<f64>) -> DMatrix<f64> {
    match space {
        SamplingSpace::R2 | SamplingSpace::R3 => {
            DMatrix::identity(space.input_dim(), space.vel_dim())
        }
        SamplingSpace::SO2 => {
            let mut mat = DMatrix::zeros(2, 1);
            mat[(0, 0)] = -sample[0].sin();
            mat[(1, 0)] = sample[0].cos();
            mat
        }
        SamplingSpace::SE2 => {
            let mut mat = DMatrix::zeros(4, 3);
            mat[(0, 0)] = 1.0;
            mat[(1, 1)] = 1.0;
            mat[(2, 2)] = -sample[2].sin();
            mat[(3, 2)] = sample[2].cos();
            mat
        }
        SamplingSpace::SO3 => {
            let mut mat = DMatrix::zeros(4, 3);
            fill_quat_vel_block(&mut mat, 0, 0, sample, 0);
            mat
        }
        SamplingSpace::SE3 => {
            let mut mat = DMatrix::zeros(7, 6);
            mat[(0, 0)] = 1.0;
            mat[(1, 1)] = 1.0;
            mat[(2, 2)] = 1.0;
            fill_quat_vel_block(&mut mat, 3, 3, sample, 3);
            mat
        }
    }
}

// d(quaternion coords)/d(angular velocity) for left multiplication by
// exp(omega): rows (x, y, z) = 0.5 (w I - [v]x), row w = -0.5 v^T.
fn fill_quat_vel_block(
    mat: &mut DMatrix<f64>,
    row: usize,
    col: usize,
    sample: &DVector<f64>,
    offset: usize,
) {
    let q = quat_from_sample(sample, offset).coords;
    let v = Vector3::new(q[0], q[1], q[2]);
    let top = (Matrix3::identity() * q[3] - skew(&v)) * 0.5;
    set_block3(mat, row, col, &top);
    for k in 0..3 {
        mat[(row + 3, col + k)] = -0.5 * v[k];
    }
}

fn integrate_quat_block(sample: &mut DVector<f64>, offset: usize, omega: &Vector3<f64>) {
    let q = quat_from_sample(sample, offset);
    let dq = UnitQuaternion::from_scaled_axis(*omega);
    let new_q = (dq * q).coords;
    for k in 0..4 {
        sample[offset + k] = new_q[k];
    }
}

// Rotation vector of suc * pre^-1, taking the short way around
fn quat_log_diff(pre: &DVector<f64>, suc: &DVector<f64>, offset: usize) -> Vector3<f64> {
    let q_pre = quat_from_sample(pre, offset);
    let q_suc = quat_from_sample(suc, offset);
    let mut q_err = (q_suc * q_pre.inverse()).into_inner();
    if q_err.w < 0.0 {
        q_err = -q_err;
    }
    UnitQuaternion::from_quaternion(q_err).scaled_axis()
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v[2], v[1], v[2], 0.0, -v[0], -v[1], v[0], 0.0)
}

fn set_block3(mat: &mut DMatrix<f64>, row: usize, col: usize, block: &Matrix3<f64>) {
    for i in 0..3 {
        for j in 0..3 {
            mat[(row + i, col + j)] = block[(i, j)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_sample(space: SamplingSpace, rng: &mut StdRng) -> DVector<f64> {
        space.pose_to_sample(&space.random_pose(rng))
    }

    #[test]
    fn test_integrate_zero_vel_is_identity() {
        let mut rng = StdRng::seed_from_u64(11);
        for &space in SamplingSpace::ALL.iter() {
            for _ in 0..100 {
                let sample = random_sample(space, &mut rng);
                let mut integrated = sample.clone();
                let zero = DVector::zeros(space.vel_dim());
                integrate_vel_to_sample(space, &mut integrated, &zero);
                assert!((&sample - &integrated).norm() < 1e-12, "space {}", space);
            }
        }
    }

    #[test]
    fn test_sample_error_integrates_back() {
        let mut rng = StdRng::seed_from_u64(13);
        for &space in SamplingSpace::ALL.iter() {
            for _ in 0..200 {
                let pre = random_sample(space, &mut rng);
                let suc = random_sample(space, &mut rng);
                let err = sample_error(space, &pre, &suc);
                assert_eq!(err.len(), space.vel_dim());
                let mut integrated = pre.clone();
                integrate_vel_to_sample(space, &mut integrated, &err);
                let pose_a = space.sample_to_pose(&integrated);
                let pose_b = space.sample_to_pose(&suc);
                assert!(
                    (pose_a.translation.vector - pose_b.translation.vector).norm() < 1e-9
                        && pose_a.rotation.angle_to(&pose_b.rotation) < 1e-9,
                    "space {}",
                    space
                );
            }
        }
    }

    #[test]
    fn test_rel_sample_composition() {
        let mut rng = StdRng::seed_from_u64(17);
        for &space in SamplingSpace::ALL.iter() {
            for _ in 0..200 {
                let pre = random_sample(space, &mut rng);
                let suc = random_sample(space, &mut rng);
                let rel = rel_sample(space, &pre, &suc);
                let composed = space.sample_to_pose(&pre) * space.sample_to_pose(&rel);
                let suc_pose = space.sample_to_pose(&suc);
                assert!(
                    (composed.translation.vector - suc_pose.translation.vector).norm() < 1e-9
                        && composed.rotation.angle_to(&suc_pose.rotation) < 1e-9,
                    "space {}",
                    space
                );
            }
        }
    }

    #[test]
    fn test_rel_sample_at_identity() {
        for &space in SamplingSpace::ALL.iter() {
            let identity = space.identity_sample();
            let rel = rel_sample(space, &identity, &identity);
            assert!((&rel - &identity).norm() < 1e-12);
            // Jacobians must stay finite at zero rotation angle
            for &wrt_suc in [true, false].iter() {
                let mat = rel_vel_to_vel_mat(space, &identity, &identity, wrt_suc);
                assert!(mat.iter().all(|v| v.is_finite()));
            }
        }
    }

    #[test]
    fn test_rel_vel_mat_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(19);
        let h = 1e-6;
        for &space in SamplingSpace::ALL.iter() {
            for _ in 0..20 {
                let pre = random_sample(space, &mut rng);
                let suc = random_sample(space, &mut rng);
                for &wrt_suc in [true, false].iter() {
                    let mat = rel_vel_to_vel_mat(space, &pre, &suc, wrt_suc);
                    for k in 0..space.vel_dim() {
                        let mut dv = DVector::zeros(space.vel_dim());
                        dv[k] = h;
                        let (mut pre_p, mut suc_p) = (pre.clone(), suc.clone());
                        let (mut pre_m, mut suc_m) = (pre.clone(), suc.clone());
                        if wrt_suc {
                            integrate_vel_to_sample(space, &mut suc_p, &dv);
                            dv[k] = -h;
                            integrate_vel_to_sample(space, &mut suc_m, &dv);
                        } else {
                            integrate_vel_to_sample(space, &mut pre_p, &dv);
                            dv[k] = -h;
                            integrate_vel_to_sample(space, &mut pre_m, &dv);
                        }
                        let rel_p = rel_sample(space, &pre_p, &suc_p);
                        let rel_m = rel_sample(space, &pre_m, &suc_m);
                        let fd = sample_error(space, &rel_m, &rel_p) / (2.0 * h);
                        for i in 0..space.vel_dim() {
                            assert!(
                                (fd[i] - mat[(i, k)]).abs() < 1e-5,
                                "space {} wrt_suc {} row {} col {}: fd {} vs {}",
                                space,
                                wrt_suc,
                                i,
                                k,
                                fd[i],
                                mat[(i, k)]
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_input_vel_mat_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(23);
        let h = 1e-6;
        for &space in SamplingSpace::ALL.iter() {
            for _ in 0..20 {
                let sample = random_sample(space, &mut rng);
                let mat = input_vel_mat(space, &sample);
                assert_eq!(mat.nrows(), space.input_dim());
                assert_eq!(mat.ncols(), space.vel_dim());
                for k in 0..space.vel_dim() {
                    let mut dv = DVector::zeros(space.vel_dim());
                    dv[k] = h;
                    let mut sample_p = sample.clone();
                    integrate_vel_to_sample(space, &mut sample_p, &dv);
                    dv[k] = -h;
                    let mut sample_m = sample.clone();
                    integrate_vel_to_sample(space, &mut sample_m, &dv);
                    let fd = (space.sample_to_input(&sample_p) - space.sample_to_input(&sample_m))
                        / (2.0 * h);
                    for i in 0..space.input_dim() {
                        assert!(
                            (fd[i] - mat[(i, k)]).abs() < 1e-6,
                            "space {} row {} col {}: fd {} vs {}",
                            space,
                            i,
                            k,
                            fd[i],
                            mat[(i, k)]
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_wrap_to_pi() {
        assert!((wrap_to_pi(3.0 * std::f64::consts::PI) - std::f64::consts::PI).abs() < 1e-12);
        assert!((wrap_to_pi(-4.0)).abs() < std::f64::consts::PI);
        assert_eq!(wrap_to_pi(0.5), 0.5);
    }
}
