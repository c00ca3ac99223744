//! Shared QP machinery for the planning variants
//!
//! Each variant owns a [`PlanningCore`] (composition, not inheritance) and
//! fills its coefficients every iteration: Levenberg-style damping scaled by
//! the distance to the goal, a graph-Laplacian adjacency regularizer over
//! consecutive waypoints, a large penalty on the reachability slacks, and one
//! linearized reachability row per constrained pair.

use nalgebra::{DMatrix, DVector};

use crate::common::{PlanningError, PlanningResult};
use crate::qp::{ClarabelQpSolver, QpCoeff, QpSolver};

/// Weights and limits shared by all planning variants
#[derive(Debug, Clone)]
pub struct PlanningConfig {
    /// Component-wise bound on each waypoint velocity per iteration
    pub delta_config_limit: f64,
    /// Decision-value cutoff separating reachable from unreachable
    pub svm_thre: f64,
    /// Weight of the waypoint-to-waypoint smoothing term
    pub adjacent_reg_weight: f64,
    /// Penalty on the reachability slack variables
    pub svm_ineq_weight: f64,
    /// Floor of the Levenberg damping factor
    pub reg_weight: f64,
    /// Iterations per second of `run_loop`
    pub loop_rate: f64,
    /// Publish callback period in iterations
    pub publish_interval: usize,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        PlanningConfig {
            delta_config_limit: 0.05,
            svm_thre: 0.0,
            adjacent_reg_weight: 1e-3,
            svm_ineq_weight: 1e6,
            reg_weight: 1e-6,
            loop_rate: 100.0,
            publish_interval: 20,
        }
    }
}

impl PlanningConfig {
    pub fn validate(&self) -> PlanningResult<()> {
        if !(self.delta_config_limit > 0.0) {
            return Err(PlanningError::ConfigError(format!(
                "delta_config_limit must be positive, got {}",
                self.delta_config_limit
            )));
        }
        if self.adjacent_reg_weight < 0.0 || self.svm_ineq_weight < 0.0 || self.reg_weight < 0.0 {
            return Err(PlanningError::ConfigError(
                "regularization weights must be non-negative".to_string(),
            ));
        }
        if !(self.loop_rate > 0.0) {
            return Err(PlanningError::ConfigError(format!(
                "loop_rate must be positive, got {}",
                self.loop_rate
            )));
        }
        if self.publish_interval == 0 {
            return Err(PlanningError::ConfigError(
                "publish_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// QP buffers, the boxed solver, and the per-iteration failure flag
pub struct PlanningCore {
    pub qp_coeff: QpCoeff,
    solver: Box<dyn QpSolver>,
    /// True when the last solve failed and the velocity was forced to zero
    pub solve_failed: bool,
    config_dim: usize,
}

impl PlanningCore {
    /// Size the QP: one velocity block per waypoint (`config_dim` total) plus
    /// one slack per inequality row, with box bounds `delta_limit` on the
    /// velocities and effectively unbounded slacks
    pub fn new(config_dim: usize, ineq_dim: usize, delta_limit: f64) -> Self {
        let dim_var = config_dim + ineq_dim;
        let mut qp_coeff = QpCoeff::new(dim_var, ineq_dim);
        for i in 0..config_dim {
            qp_coeff.x_min[i] = -delta_limit;
            qp_coeff.x_max[i] = delta_limit;
        }
        PlanningCore {
            qp_coeff,
            solver: Box::new(ClarabelQpSolver::default()),
            solve_failed: false,
            config_dim,
        }
    }

    /// Replace the solver backend (tests inject failing stubs here)
    pub fn set_solver(&mut self, solver: Box<dyn QpSolver>) {
        self.solver = solver;
    }

    pub fn config_dim(&self) -> usize {
        self.config_dim
    }

    pub fn ineq_dim(&self) -> usize {
        self.qp_coeff.dim_ineq
    }

    /// Write the `-1` slack diagonal into the right columns of the
    /// inequality matrix and the slack penalty into the objective diagonal
    pub fn apply_slack_terms(&mut self, svm_ineq_weight: f64) {
        let ineq_dim = self.qp_coeff.dim_ineq;
        for j in 0..ineq_dim {
            self.qp_coeff.ineq_mat[(j, self.config_dim + j)] = -1.0;
            self.qp_coeff.obj_mat[(self.config_dim + j, self.config_dim + j)] = svm_ineq_weight;
        }
    }

    /// Solve the assembled QP. On solver failure the returned velocity is
    /// all zeros and `solve_failed` is raised; the caller's trajectory must
    /// stay untouched for that iteration.
    pub fn solve(&mut self) -> DVector<f64> {
        match self.solver.solve(&self.qp_coeff) {
            Some(x) => {
                self.solve_failed = false;
                x
            }
            None => {
                self.solve_failed = true;
                DVector::zeros(self.qp_coeff.dim_var)
            }
        }
    }
}

/// Levenberg-style damping: dominates far from the goal, vanishes near it
pub fn damping_weight(target_error: &DVector<f64>, reg_weight: f64) -> f64 {
    target_error.norm_squared() + reg_weight
}

/// Block-tridiagonal smoothing matrix over a chain of `n` waypoints:
/// `w` on the first and last diagonal blocks, `2w` on interior blocks,
/// `-w` on neighbor off-diagonal blocks
pub fn adjacent_reg_matrix(n: usize, vel_dim: usize, weight: f64) -> DMatrix<f64> {
    let dim = n * vel_dim;
    let mut mat = DMatrix::zeros(dim, dim);
    for i in 0..n {
        let diag_weight = if n > 1 && i > 0 && i < n - 1 {
            2.0 * weight
        } else {
            weight
        };
        for k in 0..vel_dim {
            mat[(i * vel_dim + k, i * vel_dim + k)] = diag_weight;
        }
        if i + 1 < n {
            for k in 0..vel_dim {
                mat[((i + 1) * vel_dim + k, i * vel_dim + k)] = -weight;
                mat[(i * vel_dim + k, (i + 1) * vel_dim + k)] = -weight;
            }
        }
    }
    mat
}
