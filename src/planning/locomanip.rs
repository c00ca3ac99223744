//! Coordinated foot and hand trajectory planning in one QP
//!
//! Two interleaved horizons of length `motion_len` over the planar
//! rigid-motion space share one variable vector: all foot velocity blocks
//! first, then all hand blocks. Foot-to-foot reachability rows alternate
//! between the left-foot and right-foot classifiers. Foot-to-hand rows are
//! an extension point: their count is part of the inequality layout so that
//! enabling them never shifts the foot rows, but they are currently left
//! disabled and their rows stay zero.

use std::sync::Arc;
use std::time::Duration;

use nalgebra::{DMatrix, DVector, Isometry3, Vector3};

use crate::common::{PlanningError, PlanningResult};
use crate::planning::core::{adjacent_reg_matrix, damping_weight, PlanningConfig, PlanningCore};
use crate::qp::QpSolver;
use crate::sampling::{
    integrate_vel_to_sample, rel_sample, rel_vel_to_vel_mat, sample_error, SamplingSpace,
};
use crate::svm::SvmModel;

const SPACE: SamplingSpace = SamplingSpace::SE2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limb {
    LeftFoot,
    RightFoot,
    LeftHand,
}

impl Limb {
    pub const ALL: [Limb; 3] = [Limb::LeftFoot, Limb::RightFoot, Limb::LeftHand];
}

/// One shared classifier per limb; safe to share across planner instances
#[derive(Clone)]
pub struct LimbSvmSet {
    pub left_foot: Arc<SvmModel>,
    pub right_foot: Arc<SvmModel>,
    pub left_hand: Arc<SvmModel>,
}

impl LimbSvmSet {
    fn get(&self, limb: Limb) -> &Arc<SvmModel> {
        match limb {
            Limb::LeftFoot => &self.left_foot,
            Limb::RightFoot => &self.right_foot,
            Limb::LeftHand => &self.left_hand,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocomanipConfig {
    pub planning: PlanningConfig,
    /// Length of each of the two horizons
    pub motion_len: usize,
    pub initial_left_foot_pose: Isometry3<f64>,
    pub initial_right_foot_pose: Isometry3<f64>,
    pub initial_hand_pose: Isometry3<f64>,
    /// Contact polygon vertices in the foot frame
    pub foot_vertices: Vec<Vector3<f64>>,
}

impl Default for LocomanipConfig {
    fn default() -> Self {
        LocomanipConfig {
            planning: PlanningConfig::default(),
            motion_len: 4,
            initial_left_foot_pose: Isometry3::identity(),
            initial_right_foot_pose: Isometry3::identity(),
            initial_hand_pose: Isometry3::identity(),
            foot_vertices: vec![
                Vector3::new(-0.05, -0.05, 0.0),
                Vector3::new(0.1, -0.05, 0.0),
                Vector3::new(0.1, 0.05, 0.0),
                Vector3::new(-0.05, 0.05, 0.0),
            ],
        }
    }
}

pub struct LocomanipPlanner {
    config: LocomanipConfig,
    svm_set: LimbSvmSet,
    core: PlanningCore,
    adjacent_reg_mat: DMatrix<f64>,
    start_samples: [DVector<f64>; 3],
    current_foot_sample_seq: Vec<DVector<f64>>,
    current_hand_sample_seq: Vec<DVector<f64>>,
    target_hand_sample: DVector<f64>,
    identity_sample: DVector<f64>,
    hand_start_config_idx: usize,
}

impl LocomanipPlanner {
    pub fn new(config: LocomanipConfig, svm_set: LimbSvmSet) -> PlanningResult<Self> {
        config.planning.validate()?;
        if config.motion_len == 0 {
            return Err(PlanningError::ConfigError(
                "motion_len must be positive".to_string(),
            ));
        }
        for &limb in Limb::ALL.iter() {
            if svm_set.get(limb).space() != SPACE {
                return Err(PlanningError::DimensionMismatch(format!(
                    "classifier for {:?} has space {}, expected {}",
                    limb,
                    svm_set.get(limb).space(),
                    SPACE
                )));
            }
        }
        let motion_len = config.motion_len;
        let vel_dim = SPACE.vel_dim();
        let config_dim = 2 * motion_len * vel_dim;
        let svm_ineq_dim = motion_len + 2 * motion_len - 1;
        let core = PlanningCore::new(config_dim, svm_ineq_dim, config.planning.delta_config_limit);

        // Two independent smoothing chains, feet then hands
        let chain = adjacent_reg_matrix(motion_len, vel_dim, config.planning.adjacent_reg_weight);
        let mut adjacent_reg_mat = DMatrix::zeros(config_dim, config_dim);
        let half = motion_len * vel_dim;
        adjacent_reg_mat.view_mut((0, 0), (half, half)).copy_from(&chain);
        adjacent_reg_mat.view_mut((half, half), (half, half)).copy_from(&chain);

        let start_samples = [
            SPACE.pose_to_sample(&config.initial_left_foot_pose),
            SPACE.pose_to_sample(&config.initial_right_foot_pose),
            SPACE.pose_to_sample(&config.initial_hand_pose),
        ];
        let identity_sample = SPACE.identity_sample();
        let mut planner = LocomanipPlanner {
            config,
            svm_set,
            core,
            adjacent_reg_mat,
            start_samples,
            current_foot_sample_seq: Vec::new(),
            current_hand_sample_seq: Vec::new(),
            target_hand_sample: identity_sample.clone(),
            identity_sample,
            hand_start_config_idx: half,
        };
        planner.setup();
        Ok(planner)
    }

    fn start_sample(&self, limb: Limb) -> &DVector<f64> {
        match limb {
            Limb::LeftFoot => &self.start_samples[0],
            Limb::RightFoot => &self.start_samples[1],
            Limb::LeftHand => &self.start_samples[2],
        }
    }

    /// Limb taking step `i`: feet alternate starting with the left
    fn stepping_foot(i: usize) -> Limb {
        if i % 2 == 0 {
            Limb::LeftFoot
        } else {
            Limb::RightFoot
        }
    }

    /// Reset both horizons from the configured start poses
    pub fn setup(&mut self) {
        self.current_foot_sample_seq = (0..self.config.motion_len)
            .map(|i| self.start_sample(Self::stepping_foot(i)).clone())
            .collect();
        self.current_hand_sample_seq = (0..self.config.motion_len)
            .map(|_| self.start_sample(Limb::LeftHand).clone())
            .collect();
        self.core.solve_failed = false;
    }

    pub fn set_target_hand_pose(&mut self, pose: &Isometry3<f64>) {
        self.target_hand_sample = SPACE.pose_to_sample(pose);
    }

    pub fn set_solver(&mut self, solver: Box<dyn QpSolver>) {
        self.core.set_solver(solver);
    }

    pub fn solve_failed(&self) -> bool {
        self.core.solve_failed
    }

    pub fn foot_ineq_num(&self) -> usize {
        self.config.motion_len
    }

    /// Reserved rows for the foot-to-hand constraint group (disabled)
    pub fn hand_ineq_num(&self) -> usize {
        2 * self.config.motion_len - 1
    }

    pub fn svm_ineq_dim(&self) -> usize {
        self.foot_ineq_num() + self.hand_ineq_num()
    }

    pub fn config_dim(&self) -> usize {
        self.core.config_dim()
    }

    pub fn current_foot_sample_seq(&self) -> &[DVector<f64>] {
        &self.current_foot_sample_seq
    }

    pub fn current_hand_sample_seq(&self) -> &[DVector<f64>] {
        &self.current_hand_sample_seq
    }

    pub fn current_foot_poses(&self) -> Vec<Isometry3<f64>> {
        self.current_foot_sample_seq
            .iter()
            .map(|s| SPACE.sample_to_pose(s))
            .collect()
    }

    pub fn current_hand_poses(&self) -> Vec<Isometry3<f64>> {
        self.current_hand_sample_seq
            .iter()
            .map(|s| SPACE.sample_to_pose(s))
            .collect()
    }

    /// Contact polygons of the planned steps followed by the two start
    /// stances, in world coordinates
    pub fn foot_polygons(&self) -> Vec<Vec<Vector3<f64>>> {
        let mut poses = self.current_foot_poses();
        poses.push(SPACE.sample_to_pose(self.start_sample(Limb::LeftFoot)));
        poses.push(SPACE.sample_to_pose(self.start_sample(Limb::RightFoot)));
        poses
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

    /// One linearize-solve-integrate iteration over both horizons. Returns
    /// false when the QP solve failed; both horizons stay untouched then.
    pub fn run_once(&mut self) -> bool {
        let vel_dim = SPACE.vel_dim();
        let motion_len = self.config.motion_len;
        let config_dim = self.core.config_dim();
        let hand_start = self.hand_start_config_idx;

        self.core.qp_coeff.clear();
        // The hand target is tracked from the last hand waypoint
        let target_error = sample_error(
            SPACE,
            &self.target_hand_sample,
            &self.current_hand_sample_seq[motion_len - 1],
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
        // Flat-tangent smoothing over both chains
        let mut current_config = DVector::zeros(config_dim);
        for i in 0..motion_len {
            current_config.rows_mut(i * vel_dim, vel_dim).copy_from(&sample_error(
                SPACE,
                &self.identity_sample,
                &self.current_foot_sample_seq[i],
            ));
            current_config
                .rows_mut(hand_start + i * vel_dim, vel_dim)
                .copy_from(&sample_error(
                    SPACE,
                    &self.identity_sample,
                    &self.current_hand_sample_seq[i],
                ));
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

        // Foot-to-foot reachability rows; step i uses the classifier of the
        // limb taking that step and the previous stance as reference frame
        for i in 0..motion_len {
            let pre_sample = if i == 0 {
                self.start_sample(Limb::RightFoot).clone()
            } else {
                self.current_foot_sample_seq[i - 1].clone()
            };
            let suc_sample = &self.current_foot_sample_seq[i];
            let svm = self.svm_set.get(Self::stepping_foot(i));
            let rel = rel_sample(SPACE, &pre_sample, suc_sample);
            let svm_grad = svm.calc_svm_grad(&rel);
            let row_suc =
                -rel_vel_to_vel_mat(SPACE, &pre_sample, suc_sample, true).transpose() * &svm_grad;
            let row_pre = if i > 0 {
                Some(
                    -rel_vel_to_vel_mat(SPACE, &pre_sample, suc_sample, false).transpose()
                        * &svm_grad,
                )
            } else {
                None
            };
            let value = svm.calc_svm_value(&rel);
            let qp = &mut self.core.qp_coeff;
            for k in 0..vel_dim {
                qp.ineq_mat[(i, i * vel_dim + k)] = row_suc[k];
            }
            if let Some(row_pre) = row_pre {
                for k in 0..vel_dim {
                    qp.ineq_mat[(i, (i - 1) * vel_dim + k)] = row_pre[k];
                }
            }
            qp.ineq_vec[i] = value - self.config.planning.svm_thre;
        }
        // Foot-to-hand rows [foot_ineq_num, svm_ineq_dim) stay zero while
        // that constraint group is disabled
        self.core.apply_slack_terms(self.config.planning.svm_ineq_weight);

        let vel_all = self.core.solve();
        if self.core.solve_failed {
            return false;
        }
        for i in 0..motion_len {
            let foot_vel = DVector::from_column_slice(
                &vel_all.as_slice()[i * vel_dim..(i + 1) * vel_dim],
            );
            integrate_vel_to_sample(SPACE, &mut self.current_foot_sample_seq[i], &foot_vel);
            let hand_vel = DVector::from_column_slice(
                &vel_all.as_slice()[hand_start + i * vel_dim..hand_start + (i + 1) * vel_dim],
            );
            integrate_vel_to_sample(SPACE, &mut self.current_hand_sample_seq[i], &hand_vel);
        }
        true
    }

    /// Fixed-rate planning loop with a cancellable publish callback
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qp::QpCoeff;
    use crate::sampling::planar_pose;

    fn disk_svm(gamma: f64) -> Arc<SvmModel> {
        let mut sv_mat = DMatrix::zeros(4, 1);
        sv_mat.set_column(0, &SPACE.sample_to_input(&SPACE.identity_sample()));
        Arc::new(SvmModel::new(SPACE, sv_mat, DVector::from_element(1, 1.0), gamma, 0.0).unwrap())
    }

    fn disk_svm_set() -> LimbSvmSet {
        LimbSvmSet {
            left_foot: disk_svm(1.0),
            right_foot: disk_svm(1.0),
            left_hand: disk_svm(0.5),
        }
    }

    fn test_config() -> LocomanipConfig {
        let mut config = LocomanipConfig::default();
        config.planning.svm_thre = (-0.25f64).exp();
        config.planning.delta_config_limit = 0.04;
        config.initial_left_foot_pose = planar_pose(0.0, 0.1, 0.0);
        config.initial_right_foot_pose = planar_pose(0.0, -0.1, 0.0);
        config.initial_hand_pose = planar_pose(0.3, 0.0, 0.0);
        config
    }

    struct FailingSolver;

    impl QpSolver for FailingSolver {
        fn solve(&mut self, _coeff: &QpCoeff) -> Option<DVector<f64>> {
            None
        }
    }

    #[test]
    fn test_inequality_row_count_contract() {
        for motion_len in [1usize, 3, 4, 7] {
            let mut config = test_config();
            config.motion_len = motion_len;
            let planner = LocomanipPlanner::new(config, disk_svm_set()).unwrap();
            // only foot rows are active, hand rows are reserved
            assert_eq!(planner.foot_ineq_num(), motion_len);
            assert_eq!(planner.hand_ineq_num(), 2 * motion_len - 1);
            assert_eq!(planner.svm_ineq_dim(), 3 * motion_len - 1);
            assert_eq!(planner.core.qp_coeff.dim_ineq, 3 * motion_len - 1);
            assert_eq!(
                planner.core.qp_coeff.dim_var,
                2 * motion_len * SPACE.vel_dim() + 3 * motion_len - 1
            );
        }
    }

    #[test]
    fn test_setup_alternates_feet() {
        let planner = LocomanipPlanner::new(test_config(), disk_svm_set()).unwrap();
        let feet = planner.current_foot_sample_seq();
        assert_eq!(feet.len(), 4);
        assert!((feet[0][1] - 0.1).abs() < 1e-12);
        assert!((feet[1][1] + 0.1).abs() < 1e-12);
        assert!((feet[2][1] - 0.1).abs() < 1e-12);
        let hands = planner.current_hand_sample_seq();
        assert!(hands.iter().all(|s| (s[0] - 0.3).abs() < 1e-12));
    }

    #[test]
    fn test_hand_tracks_target_while_feet_stay_reachable() {
        let config = test_config();
        let thre = config.planning.svm_thre;
        let svm_set = disk_svm_set();
        let mut planner = LocomanipPlanner::new(config, svm_set.clone()).unwrap();
        planner.set_target_hand_pose(&planar_pose(0.8, 0.2, 0.0));

        for _ in 0..200 {
            planner.run_once();
        }
        let last_hand = planner.current_hand_sample_seq().last().unwrap();
        let hand_dist = ((last_hand[0] - 0.8).powi(2) + (last_hand[1] - 0.2).powi(2)).sqrt();
        assert!(hand_dist < 0.1, "hand distance to target {}", hand_dist);
        // every foot step stays on the reachable side of its classifier
        for i in 0..4 {
            let pre = if i == 0 {
                planner.start_sample(Limb::RightFoot).clone()
            } else {
                planner.current_foot_sample_seq()[i - 1].clone()
            };
            let rel = rel_sample(SPACE, &pre, &planner.current_foot_sample_seq()[i]);
            let value = svm_set.get(LocomanipPlanner::stepping_foot(i)).calc_svm_value(&rel);
            assert!(value >= thre - 1e-2, "step {} value {}", i, value);
        }
        // all samples stay finite
        for s in planner
            .current_foot_sample_seq()
            .iter()
            .chain(planner.current_hand_sample_seq())
        {
            assert!(s.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_solver_failure_leaves_both_horizons_unchanged() {
        let mut planner = LocomanipPlanner::new(test_config(), disk_svm_set()).unwrap();
        planner.set_target_hand_pose(&planar_pose(0.8, 0.2, 0.0));
        planner.set_solver(Box::new(FailingSolver));
        let feet_before = planner.current_foot_sample_seq().to_vec();
        let hands_before = planner.current_hand_sample_seq().to_vec();
        assert!(!planner.run_once());
        assert!(planner.solve_failed());
        assert_eq!(feet_before, planner.current_foot_sample_seq());
        assert_eq!(hands_before, planner.current_hand_sample_seq());
    }

    #[test]
    fn test_wrong_space_classifier_rejected() {
        let r2_svm = Arc::new(
            SvmModel::new(
                SamplingSpace::R2,
                DMatrix::zeros(2, 1),
                DVector::from_element(1, 1.0),
                1.0,
                0.0,
            )
            .unwrap(),
        );
        let svm_set = LimbSvmSet {
            left_foot: disk_svm(1.0),
            right_foot: r2_svm,
            left_hand: disk_svm(1.0),
        };
        assert!(LocomanipPlanner::new(test_config(), svm_set).is_err());
    }
}
