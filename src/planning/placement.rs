//! Manipulator placement planning with reaching-point validation
//!
//! Optimizes one placement-base pose together with `reaching_num` reaching
//! poses. Each reaching pose, expressed in the placement frame, carries one
//! linearized reachability row; the objective tracks per-point reaching
//! targets while a smaller weight keeps the placement base near its own
//! target. After each QP step an external inverse-kinematics collaborator
//! can validate every reaching pose under the real kinematic model, retried
//! with randomized seeds.

use std::sync::Arc;
use std::time::Duration;

use nalgebra::{DVector, Isometry3};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::{PlanningError, PlanningResult};
use crate::planning::core::{PlanningConfig, PlanningCore};
use crate::qp::QpSolver;
use crate::sampling::{
    integrate_vel_to_sample, rel_sample, rel_vel_to_vel_mat, sample_error, SamplingSpace,
};
use crate::svm::SvmModel;

/// External inverse-kinematics collaborator validating a reaching pose.
///
/// Returns the residual error after `loop_num` iterations from the given
/// randomized seed; the planner accepts the first trial under its error
/// threshold and otherwise records the best trial.
pub trait IkSolver {
    fn solve(
        &mut self,
        reaching_idx: usize,
        target: &Isometry3<f64>,
        seed: u64,
        loop_num: usize,
    ) -> f64;
}

#[derive(Debug, Clone)]
pub struct PlacementConfig {
    pub planning: PlanningConfig,
    /// Number of reaching points
    pub reaching_num: usize,
    /// Objective weight on the placement-base motion
    pub placement_weight: f64,
    /// Randomized-seed IK retries per reaching point
    pub ik_trial_num: usize,
    /// Iterations per IK trial
    pub ik_loop_num: usize,
    /// Acceptance threshold on the IK residual
    pub ik_error_thre: f64,
    pub initial_placement_pose: Isometry3<f64>,
    /// One initial pose per reaching point; empty means identity for all
    pub initial_reaching_poses: Vec<Isometry3<f64>>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        PlacementConfig {
            planning: PlanningConfig::default(),
            reaching_num: 2,
            placement_weight: 1e-3,
            ik_trial_num: 10,
            ik_loop_num: 50,
            ik_error_thre: 1e-2,
            initial_placement_pose: Isometry3::identity(),
            initial_reaching_poses: Vec::new(),
        }
    }
}

pub struct PlacementPlanner {
    space: SamplingSpace,
    config: PlacementConfig,
    svm: Arc<SvmModel>,
    core: PlanningCore,
    ik_solver: Option<Box<dyn IkSolver>>,
    rng: StdRng,
    current_placement_sample: DVector<f64>,
    target_placement_sample: DVector<f64>,
    current_reaching_samples: Vec<DVector<f64>>,
    target_reaching_samples: Vec<DVector<f64>>,
    /// Best IK residual per reaching point from the last iteration
    ik_errors: Vec<f64>,
}

impl PlacementPlanner {
    pub fn new(config: PlacementConfig, svm: Arc<SvmModel>) -> PlanningResult<Self> {
        config.planning.validate()?;
        if config.reaching_num == 0 {
            return Err(PlanningError::ConfigError(
                "reaching_num must be positive".to_string(),
            ));
        }
        if !config.initial_reaching_poses.is_empty()
            && config.initial_reaching_poses.len() != config.reaching_num
        {
            return Err(PlanningError::ConfigError(format!(
                "{} initial reaching poses for reaching_num {}",
                config.initial_reaching_poses.len(),
                config.reaching_num
            )));
        }
        if config.ik_trial_num == 0 || config.ik_loop_num == 0 {
            return Err(PlanningError::ConfigError(
                "IK trial and loop counts must be positive".to_string(),
            ));
        }
        let space = svm.space();
        let vel_dim = space.vel_dim();
        let config_dim = (1 + config.reaching_num) * vel_dim;
        let core = PlanningCore::new(
            config_dim,
            config.reaching_num,
            config.planning.delta_config_limit,
        );
        let identity = space.identity_sample();
        let mut planner = PlacementPlanner {
            space,
            config,
            svm,
            core,
            ik_solver: None,
            rng: StdRng::seed_from_u64(0),
            current_placement_sample: identity.clone(),
            target_placement_sample: identity.clone(),
            current_reaching_samples: Vec::new(),
            target_reaching_samples: Vec::new(),
            ik_errors: Vec::new(),
        };
        planner.setup();
        Ok(planner)
    }

    /// Reset the placement and reaching samples from the configured poses
    pub fn setup(&mut self) {
        self.current_placement_sample =
            self.space.pose_to_sample(&self.config.initial_placement_pose);
        self.current_reaching_samples = (0..self.config.reaching_num)
            .map(|i| {
                let pose = self
                    .config
                    .initial_reaching_poses
                    .get(i)
                    .cloned()
                    .unwrap_or_else(Isometry3::identity);
                self.space.pose_to_sample(&pose)
            })
            .collect();
        if self.target_reaching_samples.len() != self.config.reaching_num {
            self.target_reaching_samples = self.current_reaching_samples.clone();
        }
        self.ik_errors = vec![0.0; self.config.reaching_num];
        self.core.solve_failed = false;
    }

    pub fn set_ik_solver(&mut self, solver: Box<dyn IkSolver>) {
        self.ik_solver = Some(solver);
    }

    pub fn set_solver(&mut self, solver: Box<dyn QpSolver>) {
        self.core.set_solver(solver);
    }

    pub fn set_target_placement_pose(&mut self, pose: &Isometry3<f64>) {
        self.target_placement_sample = self.space.pose_to_sample(pose);
    }

    pub fn set_target_reaching_poses(&mut self, poses: &[Isometry3<f64>]) -> PlanningResult<()> {
        if poses.len() != self.config.reaching_num {
            return Err(PlanningError::DimensionMismatch(format!(
                "{} target reaching poses for reaching_num {}",
                poses.len(),
                self.config.reaching_num
            )));
        }
        self.target_reaching_samples =
            poses.iter().map(|p| self.space.pose_to_sample(p)).collect();
        Ok(())
    }

    pub fn space(&self) -> SamplingSpace {
        self.space
    }

    pub fn solve_failed(&self) -> bool {
        self.core.solve_failed
    }

    pub fn current_placement_pose(&self) -> Isometry3<f64> {
        self.space.sample_to_pose(&self.current_placement_sample)
    }

    pub fn current_reaching_poses(&self) -> Vec<Isometry3<f64>> {
        self.current_reaching_samples
            .iter()
            .map(|s| self.space.sample_to_pose(s))
            .collect()
    }

    pub fn ik_errors(&self) -> &[f64] {
        &self.ik_errors
    }

    /// Reaching sample `i` expressed in the placement frame
    pub fn rel_reaching_sample(&self, i: usize) -> DVector<f64> {
        rel_sample(
            self.space,
            &self.current_placement_sample,
            &self.current_reaching_samples[i],
        )
    }

    /// One linearize-solve-integrate iteration followed by IK validation.
    /// Returns false when the QP solve failed; samples stay untouched then.
    pub fn run_once(&mut self) -> bool {
        let vel_dim = self.space.vel_dim();
        let reaching_num = self.config.reaching_num;
        let config_dim = self.core.config_dim();

        self.core.qp_coeff.clear();
        // Reaching blocks track their targets; the placement block tracks
        // its own target with a smaller weight
        let mut total_error_sq = 0.0;
        for i in 0..reaching_num {
            let err = sample_error(
                self.space,
                &self.target_reaching_samples[i],
                &self.current_reaching_samples[i],
            );
            total_error_sq += err.norm_squared();
            let qp = &mut self.core.qp_coeff;
            qp.obj_vec.rows_mut((1 + i) * vel_dim, vel_dim).copy_from(&err);
            for k in 0..vel_dim {
                qp.obj_mat[((1 + i) * vel_dim + k, (1 + i) * vel_dim + k)] = 1.0;
            }
        }
        let placement_error = sample_error(
            self.space,
            &self.target_placement_sample,
            &self.current_placement_sample,
        );
        {
            let qp = &mut self.core.qp_coeff;
            let weighted = &placement_error * self.config.placement_weight;
            qp.obj_vec.rows_mut(0, vel_dim).copy_from(&weighted);
            for k in 0..vel_dim {
                qp.obj_mat[(k, k)] = self.config.placement_weight;
            }
            let lambda = total_error_sq + self.config.planning.reg_weight;
            for k in 0..config_dim {
                qp.obj_mat[(k, k)] += lambda;
            }
        }

        // One reachability row per reaching point, linearized in the
        // placement frame
        for i in 0..reaching_num {
            let rel = self.rel_reaching_sample(i);
            let svm_grad = self.svm.calc_svm_grad(&rel);
            let pre = &self.current_placement_sample;
            let suc = &self.current_reaching_samples[i];
            let row_pre = -rel_vel_to_vel_mat(self.space, pre, suc, false).transpose() * &svm_grad;
            let row_suc = -rel_vel_to_vel_mat(self.space, pre, suc, true).transpose() * &svm_grad;
            let value = self.svm.calc_svm_value(&rel);
            let qp = &mut self.core.qp_coeff;
            for k in 0..vel_dim {
                qp.ineq_mat[(i, k)] = row_pre[k];
                qp.ineq_mat[(i, (1 + i) * vel_dim + k)] = row_suc[k];
            }
            qp.ineq_vec[i] = value - self.config.planning.svm_thre;
        }
        self.core.apply_slack_terms(self.config.planning.svm_ineq_weight);

        let vel_all = self.core.solve();
        if self.core.solve_failed {
            return false;
        }
        let placement_vel = DVector::from_column_slice(&vel_all.as_slice()[0..vel_dim]);
        integrate_vel_to_sample(self.space, &mut self.current_placement_sample, &placement_vel);
        for (i, sample) in self.current_reaching_samples.iter_mut().enumerate() {
            let vel = DVector::from_column_slice(
                &vel_all.as_slice()[(1 + i) * vel_dim..(2 + i) * vel_dim],
            );
            integrate_vel_to_sample(self.space, sample, &vel);
        }

        self.validate_with_ik();
        true
    }

    /// Run the IK collaborator on every reaching pose: accept the first
    /// trial under the error threshold, otherwise keep the best trial
    fn validate_with_ik(&mut self) {
        let solver = match self.ik_solver.as_mut() {
            Some(solver) => solver,
            None => return,
        };
        for i in 0..self.config.reaching_num {
            let target = self.space.sample_to_pose(&self.current_reaching_samples[i]);
            let mut best = f64::INFINITY;
            for _ in 0..self.config.ik_trial_num {
                let seed = self.rng.gen();
                let error = solver.solve(i, &target, seed, self.config.ik_loop_num);
                best = std::cmp::min(OrderedFloat(best), OrderedFloat(error)).0;
                if error < self.config.ik_error_thre {
                    break;
                }
            }
            self.ik_errors[i] = best;
        }
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
