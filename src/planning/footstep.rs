//! Fixed-horizon footstep sequence planning
//!
//! Plans `footstep_num` successive stance poses so that every step, expressed
//! in the previous stance frame, stays on the reachable side of the learned
//! decision boundary. Step 0 is constrained relative to the identity stance.
//! For the planar rigid-motion space with alternating left/right stances, odd
//! steps mirror the lateral and yaw components of the relative sample (and
//! the matching Jacobian rows) before evaluating reachability, since the
//! classifier is trained for a single stance side.

use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use nalgebra::{DMatrix, DVector, Isometry3, Vector3};

use crate::common::{PlanningError, PlanningResult};
use crate::grid::{grid_divide_ratios_to_idxs, loop_grid, GridSet};
use crate::planning::core::{adjacent_reg_matrix, damping_weight, PlanningConfig, PlanningCore};
use crate::qp::QpSolver;
use crate::sampling::{
    integrate_vel_to_sample, rel_sample, rel_vel_to_vel_mat, sample_error, SamplingSpace,
};
use crate::svm::SvmModel;

#[derive(Debug, Clone)]
pub struct FootstepConfig {
    pub planning: PlanningConfig,
    /// Horizon length
    pub footstep_num: usize,
    /// Mirror odd steps for alternating left/right stances (SE2 only)
    pub alternate_lr: bool,
    /// Step pose used to seed every waypoint at setup
    pub initial_sample_pose: Isometry3<f64>,
    /// Contact polygon vertices in the foot frame
    pub foot_vertices: Vec<Vector3<f64>>,
}

impl Default for FootstepConfig {
    fn default() -> Self {
        FootstepConfig {
            planning: PlanningConfig::default(),
            footstep_num: 3,
            alternate_lr: true,
            initial_sample_pose: Isometry3::identity(),
            foot_vertices: vec![
                Vector3::new(-0.05, -0.05, 0.0),
                Vector3::new(0.1, -0.05, 0.0),
                Vector3::new(0.1, 0.05, 0.0),
                Vector3::new(-0.05, 0.05, 0.0),
            ],
        }
    }
}

pub struct FootstepPlanner {
    space: SamplingSpace,
    config: FootstepConfig,
    svm: Arc<SvmModel>,
    grid: Option<GridSet>,
    core: PlanningCore,
    adjacent_reg_mat: DMatrix<f64>,
    current_sample_seq: Vec<DVector<f64>>,
    target_sample: DVector<f64>,
    identity_sample: DVector<f64>,
}

impl FootstepPlanner {
    pub fn new(
        config: FootstepConfig,
        svm: Arc<SvmModel>,
        grid: Option<GridSet>,
    ) -> PlanningResult<Self> {
        config.planning.validate()?;
        if config.footstep_num == 0 {
            return Err(PlanningError::ConfigError(
                "footstep_num must be positive".to_string(),
            ));
        }
        let space = svm.space();
        if let Some(ref grid) = grid {
            if grid.space() != space {
                return Err(PlanningError::DimensionMismatch(format!(
                    "grid space {} does not match classifier space {}",
                    grid.space(),
                    space
                )));
            }
        }
        let n = config.footstep_num;
        let vel_dim = space.vel_dim();
        let core = PlanningCore::new(n * vel_dim, n, config.planning.delta_config_limit);
        let adjacent_reg_mat = adjacent_reg_matrix(n, vel_dim, config.planning.adjacent_reg_weight);
        let identity_sample = space.identity_sample();
        let mut planner = FootstepPlanner {
            space,
            config,
            svm,
            grid,
            core,
            adjacent_reg_mat,
            current_sample_seq: Vec::new(),
            target_sample: identity_sample.clone(),
            identity_sample,
        };
        planner.setup();
        Ok(planner)
    }

    /// Reset the trajectory by accumulating the configured step pose,
    /// mirroring odd steps when alternating stances are enabled
    pub fn setup(&mut self) {
        let mirror = self.config.alternate_lr && self.space == SamplingSpace::SE2;
        self.current_sample_seq.clear();
        let mut accum = Isometry3::identity();
        for i in 0..self.config.footstep_num {
            let mut step_sample = self.space.pose_to_sample(&self.config.initial_sample_pose);
            if mirror && i % 2 == 1 {
                step_sample[1] = -step_sample[1];
                step_sample[2] = -step_sample[2];
            }
            accum *= self.space.sample_to_pose(&step_sample);
            self.current_sample_seq.push(self.space.pose_to_sample(&accum));
        }
        self.core.solve_failed = false;
    }

    pub fn set_target_pose(&mut self, pose: &Isometry3<f64>) {
        self.target_sample = self.space.pose_to_sample(pose);
    }

    pub fn set_solver(&mut self, solver: Box<dyn QpSolver>) {
        self.core.set_solver(solver);
    }

    pub fn space(&self) -> SamplingSpace {
        self.space
    }

    pub fn solve_failed(&self) -> bool {
        self.core.solve_failed
    }

    pub fn current_sample_seq(&self) -> &[DVector<f64>] {
        &self.current_sample_seq
    }

    /// Stance poses including the fixed identity stance in front
    pub fn current_poses(&self) -> Vec<Isometry3<f64>> {
        std::iter::once(Isometry3::identity())
            .chain(self.current_sample_seq.iter().map(|s| self.space.sample_to_pose(s)))
            .collect()
    }

    /// Contact polygons of every stance, in world coordinates
    pub fn foot_polygons(&self) -> Vec<Vec<Vector3<f64>>> {
        self.current_poses()
            .iter()
            .map(|pose| {
                self.config
                    .foot_vertices
                    .iter()
                    .map(|v| pose.rotation * v + pose.translation.vector)
                    .collect()
            })
            .collect()
    }

    /// Relative sample of step `i` in its predecessor's stance frame, with
    /// alternating-stance mirroring applied
    fn step_rel_sample(&self, i: usize) -> DVector<f64> {
        let pre = if i == 0 {
            &self.identity_sample
        } else {
            &self.current_sample_seq[i - 1]
        };
        let mut rel = rel_sample(self.space, pre, &self.current_sample_seq[i]);
        if self.config.alternate_lr && self.space == SamplingSpace::SE2 && i % 2 == 1 {
            rel[1] = -rel[1];
            rel[2] = -rel[2];
        }
        rel
    }

    /// Cell centers of the reachable grid slice for step `i`, projected to
    /// the ground plane of the predecessor stance frame. Returns None
    /// without a loaded grid.
    pub fn reachable_footprint(&self, i: usize) -> Option<Vec<Vector3<f64>>> {
        let grid = self.grid.as_ref()?;
        let dim = self.space.sample_dim();
        let range = grid.sample_range();
        let rel = self.step_rel_sample(i);
        let ratios = DVector::from_fn(dim, |d, _| (rel[d] - grid.sample_min()[d]) / range[d]);
        let fixed_idxs = grid_divide_ratios_to_idxs(&ratios, grid.divide_nums());
        let update_dims: Vec<usize> = (0..dim.min(2)).collect();
        let mirror_y =
            self.config.alternate_lr && self.space == SamplingSpace::SE2 && i % 2 == 1;
        let mut points = Vec::new();
        for (grid_idx, sample) in loop_grid(
            grid.divide_nums(),
            grid.sample_min(),
            &range,
            Some(&update_dims),
            &fixed_idxs,
        ) {
            if grid.value(grid_idx) > self.config.planning.svm_thre {
                let mut pos = self.space.sample_to_cloud_pos(&sample);
                pos.z = 0.0;
                if mirror_y {
                    pos.y = -pos.y;
                }
                points.push(pos);
            }
        }
        Some(points)
    }

    /// One linearize-solve-integrate iteration. Returns false when the QP
    /// solve failed; the trajectory is left untouched in that case.
    pub fn run_once(&mut self) -> bool {
        let vel_dim = self.space.vel_dim();
        let n = self.config.footstep_num;
        let config_dim = n * vel_dim;
        let mirror = self.config.alternate_lr && self.space == SamplingSpace::SE2;

        // Objective: goal tracking on the last waypoint with damped velocity
        // regularization, adjacency smoothing, slack penalty
        self.core.qp_coeff.clear();
        let target_error = sample_error(
            self.space,
            &self.target_sample,
            &self.current_sample_seq[n - 1],
        );
        let lambda = damping_weight(&target_error, self.config.planning.reg_weight);
        {
            let qp = &mut self.core.qp_coeff;
            qp.obj_vec
                .rows_mut(config_dim - vel_dim, vel_dim)
                .copy_from(&target_error);
            for k in 0..vel_dim {
                qp.obj_mat[(config_dim - vel_dim + k, config_dim - vel_dim + k)] = 1.0;
            }
            for k in 0..config_dim {
                qp.obj_mat[(k, k)] += lambda;
            }
        }
        // Smoothing evaluates waypoints in a flat tangent chart, which is an
        // approximation for rotation-bearing spaces
        let mut current_config = DVector::zeros(config_dim);
        for (i, sample) in self.current_sample_seq.iter().enumerate() {
            current_config
                .rows_mut(i * vel_dim, vel_dim)
                .copy_from(&sample_error(self.space, &self.identity_sample, sample));
        }
        {
            let qp = &mut self.core.qp_coeff;
            let reg_vec = &self.adjacent_reg_mat * &current_config;
            for k in 0..config_dim {
                qp.obj_vec[k] += reg_vec[k];
            }
            let mut obj_block = qp.obj_mat.view_mut((0, 0), (config_dim, config_dim));
            obj_block += &self.adjacent_reg_mat;
        }

        // One reachability row per step, linearized at the current trajectory
        let pre_seq: Vec<&DVector<f64>> = std::iter::once(&self.identity_sample)
            .chain(self.current_sample_seq.iter())
            .collect();
        for (i, (pre, suc)) in pre_seq.iter().copied().tuple_windows().enumerate() {
            let mut rel = rel_sample(self.space, pre, suc);
            if mirror && i % 2 == 1 {
                rel[1] = -rel[1];
                rel[2] = -rel[2];
            }
            let svm_grad = self.svm.calc_svm_grad(&rel);
            let mut rel_vel_mat_suc = rel_vel_to_vel_mat(self.space, pre, suc, true);
            if mirror && i % 2 == 1 {
                negate_rows(&mut rel_vel_mat_suc, 1, 2);
            }
            let row_suc = -rel_vel_mat_suc.transpose() * &svm_grad;
            let qp = &mut self.core.qp_coeff;
            for k in 0..vel_dim {
                qp.ineq_mat[(i, i * vel_dim + k)] = row_suc[k];
            }
            qp.ineq_vec[i] = self.svm.calc_svm_value(&rel) - self.config.planning.svm_thre;
            if i > 0 {
                let mut rel_vel_mat_pre = rel_vel_to_vel_mat(self.space, pre, suc, false);
                if mirror && i % 2 == 1 {
                    negate_rows(&mut rel_vel_mat_pre, 1, 2);
                }
                let row_pre = -rel_vel_mat_pre.transpose() * &svm_grad;
                let qp = &mut self.core.qp_coeff;
                for k in 0..vel_dim {
                    qp.ineq_mat[(i, (i - 1) * vel_dim + k)] = row_pre[k];
                }
            }
        }
        self.core.apply_slack_terms(self.config.planning.svm_ineq_weight);

        let vel_all = self.core.solve();
        if self.core.solve_failed {
            return false;
        }
        for (i, sample) in self.current_sample_seq.iter_mut().enumerate() {
            let vel = DVector::from_column_slice(
                &vel_all.as_slice()[i * vel_dim..(i + 1) * vel_dim],
            );
            integrate_vel_to_sample(self.space, sample, &vel);
        }
        true
    }

    /// Fixed-rate planning loop. The publish callback fires every
    /// `publish_interval` iterations and cancels the loop by returning false.
    pub fn run_loop<F>(&mut self, loop_num: usize, mut on_publish: F)
    where
        F: FnMut(&Self) -> bool,
    {
        let sleep = Duration::from_secs_f64(1.0 / self.config.planning.loop_rate);
        for loop_idx in 0..loop_num {
            self.run_once();
            if loop_idx % self.config.planning.publish_interval == 0 && !on_publish(self) {
                return;
            }
            std::thread::sleep(sleep);
        }
    }
}

fn negate_rows(mat: &mut DMatrix<f64>, first: usize, last: usize) {
    for i in first..=last {
        for j in 0..mat.ncols() {
            mat[(i, j)] = -mat[(i, j)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qp::QpCoeff;
    use crate::sampling::planar_pose;

    /// Classifier whose positive region is the disk of radius 0.5 around
    /// the local origin: a single support vector at the identity input
    fn disk_svm() -> Arc<SvmModel> {
        let space = SamplingSpace::SE2;
        let mut sv_mat = DMatrix::zeros(4, 1);
        sv_mat.set_column(0, &space.sample_to_input(&space.identity_sample()));
        Arc::new(SvmModel::new(space, sv_mat, DVector::from_element(1, 1.0), 1.0, 0.0).unwrap())
    }

    /// Decision value at relative distance 0.5 with aligned yaw
    fn disk_thre() -> f64 {
        (-0.25f64).exp()
    }

    fn disk_config() -> FootstepConfig {
        let mut config = FootstepConfig::default();
        config.planning.svm_thre = disk_thre();
        config.planning.delta_config_limit = 0.04;
        config.footstep_num = 3;
        config.alternate_lr = false;
        config.initial_sample_pose = planar_pose(0.2, 0.0, 0.0);
        config
    }

    struct FailingSolver;

    impl QpSolver for FailingSolver {
        fn solve(&mut self, _coeff: &QpCoeff) -> Option<DVector<f64>> {
            None
        }
    }

    #[test]
    fn test_setup_accumulates_and_mirrors() {
        let mut config = disk_config();
        config.alternate_lr = true;
        config.initial_sample_pose = planar_pose(0.2, 0.1, 0.3);
        let planner = FootstepPlanner::new(config, disk_svm(), None).unwrap();
        let seq = planner.current_sample_seq();
        assert_eq!(seq.len(), 3);
        let s0 = &seq[0];
        assert!((s0[0] - 0.2).abs() < 1e-12);
        assert!((s0[1] - 0.1).abs() < 1e-12);
        assert!((s0[2] - 0.3).abs() < 1e-12);
        // step 1 composes the mirrored step pose onto step 0
        let expected =
            planar_pose(0.2, 0.1, 0.3) * planar_pose(0.2, -0.1, -0.3);
        let s1_pose = SamplingSpace::SE2.sample_to_pose(&seq[1]);
        assert!((s1_pose.translation.vector - expected.translation.vector).norm() < 1e-9);
        assert!(s1_pose.rotation.angle_to(&expected.rotation) < 1e-9);
    }

    #[test]
    fn test_qp_layout_has_one_slack_per_step() {
        let planner = FootstepPlanner::new(disk_config(), disk_svm(), None).unwrap();
        let vel_dim = SamplingSpace::SE2.vel_dim();
        assert_eq!(planner.core.qp_coeff.dim_var, 3 * vel_dim + 3);
        assert_eq!(planner.core.qp_coeff.dim_ineq, 3);
    }

    #[test]
    fn test_plan_reaches_target_inside_disk() {
        let config = disk_config();
        let thre = config.planning.svm_thre;
        let svm = disk_svm();
        let mut planner = FootstepPlanner::new(config, svm.clone(), None).unwrap();
        planner.set_target_pose(&planar_pose(1.5, 0.0, 0.0));

        let initial_dist = {
            let last = planner.current_sample_seq().last().unwrap();
            ((last[0] - 1.5).powi(2) + last[1].powi(2)).sqrt()
        };
        let mut dists = Vec::new();
        for _ in 0..300 {
            let ok = planner.run_once();
            let last = planner.current_sample_seq().last().unwrap();
            let dist = ((last[0] - 1.5).powi(2) + last[1].powi(2)).sqrt();
            if ok {
                dists.push(dist);
            }
        }
        let final_dist = *dists.last().unwrap();
        assert!(
            final_dist < initial_dist,
            "distance to target did not shrink: {} -> {}",
            initial_dist,
            final_dist
        );
        assert!(final_dist < 0.1, "final distance {}", final_dist);
        // every successful iteration keeps the distance non-increasing
        for pair in dists.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-6, "{} -> {}", pair[0], pair[1]);
        }
        // every relative step stays on the reachable side of the boundary
        for i in 0..3 {
            let rel = planner.step_rel_sample(i);
            let value = svm.calc_svm_value(&rel);
            assert!(
                value >= thre - 1e-2,
                "step {} decision value {} below threshold {}",
                i,
                value,
                thre
            );
        }
    }

    #[test]
    fn test_mirrored_inequality_rows_match_finite_difference() {
        let mut config = disk_config();
        config.alternate_lr = true;
        config.initial_sample_pose = planar_pose(0.2, 0.1, 0.2);
        let svm = disk_svm();
        let mut planner = FootstepPlanner::new(config, svm.clone(), None).unwrap();
        planner.set_target_pose(&planar_pose(1.0, 0.3, 0.0));
        // assemble one iteration without moving the trajectory
        planner.set_solver(Box::new(FailingSolver));
        assert!(!planner.run_once());

        let space = SamplingSpace::SE2;
        let vel_dim = space.vel_dim();
        let seq = planner.current_sample_seq().to_vec();
        let value_of = |seq: &[DVector<f64>], i: usize| {
            let pre = if i == 0 {
                space.identity_sample()
            } else {
                seq[i - 1].clone()
            };
            let mut rel = rel_sample(space, &pre, &seq[i]);
            if i % 2 == 1 {
                rel[1] = -rel[1];
                rel[2] = -rel[2];
            }
            svm.calc_svm_value(&rel)
        };
        let h = 1e-6;
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..vel_dim {
                    let mut perturbed = seq.clone();
                    let mut vel = DVector::zeros(vel_dim);
                    vel[k] = h;
                    integrate_vel_to_sample(space, &mut perturbed[j], &vel);
                    let fd = (value_of(&perturbed, i) - value_of(&seq, i)) / h;
                    // the row holds the negated decision-value gradient
                    let entry = planner.core.qp_coeff.ineq_mat[(i, j * vel_dim + k)];
                    assert!(
                        (entry + fd).abs() < 1e-5,
                        "row {} waypoint {} component {}: {} vs {}",
                        i,
                        j,
                        k,
                        entry,
                        -fd
                    );
                }
            }
        }
    }

    #[test]
    fn test_solver_failure_leaves_trajectory_unchanged() {
        let mut planner = FootstepPlanner::new(disk_config(), disk_svm(), None).unwrap();
        planner.set_target_pose(&planar_pose(1.5, 0.0, 0.0));
        planner.set_solver(Box::new(FailingSolver));
        let before: Vec<DVector<f64>> = planner.current_sample_seq().to_vec();
        assert!(!planner.run_once());
        assert!(planner.solve_failed());
        for (a, b) in before.iter().zip(planner.current_sample_seq()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_foot_polygons_follow_poses() {
        let planner = FootstepPlanner::new(disk_config(), disk_svm(), None).unwrap();
        let polys = planner.foot_polygons();
        assert_eq!(polys.len(), 4); // identity stance + 3 steps
        // the identity stance polygon equals the raw vertices
        for (p, v) in polys[0].iter().zip(&planner.config.foot_vertices) {
            assert!((p - v).norm() < 1e-12);
        }
        // later polygons are translated along with their stance
        assert!((polys[1][0].x - (planner.config.foot_vertices[0].x + 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_reachable_footprint_filters_by_threshold() {
        let svm = disk_svm();
        let space = SamplingSpace::SE2;
        let min = DVector::from_vec(vec![-1.0, -1.0, -std::f64::consts::PI]);
        let max = DVector::from_vec(vec![1.0, 1.0, std::f64::consts::PI]);
        let grid = GridSet::from_svm(&svm, vec![20, 20, 9], min, max).unwrap();
        let planner = FootstepPlanner::new(disk_config(), svm, Some(grid)).unwrap();
        let footprint = planner.reachable_footprint(0).unwrap();
        assert!(!footprint.is_empty());
        // slice cells beyond the disk are filtered out
        for pos in &footprint {
            assert!(pos.x.hypot(pos.y) < 0.75, "cell at ({}, {})", pos.x, pos.y);
            assert_eq!(pos.z, 0.0);
        }
    }

    #[test]
    fn test_zero_footstep_num_rejected() {
        let mut config = disk_config();
        config.footstep_num = 0;
        assert!(FootstepPlanner::new(config, disk_svm(), None).is_err());
    }
}
