//! Differentiable reachability function
//!
//! Wraps an externally trained kernel classifier (Gaussian kernel) and
//! evaluates its decision value and gradient at arbitrary samples. The
//! gradient is taken with respect to the sample's velocity-space
//! representation via the manifold input Jacobian, so it can be chained
//! with `rel_vel_to_vel_mat` inside linearized reachability constraints.

use nalgebra::{DMatrix, DVector};

use crate::common::{PlanningError, PlanningResult};
use crate::sampling::{input_vel_mat, SamplingSpace};

/// Trained kernel classifier over a sampling space's input encoding.
///
/// Read-only after construction; safe to share across planner instances.
#[derive(Debug, Clone)]
pub struct SvmModel {
    space: SamplingSpace,
    /// One support vector per column (input_dim x n_sv)
    sv_mat: DMatrix<f64>,
    /// Dual coefficients, one per support vector
    coeff_vec: DVector<f64>,
    /// Gaussian kernel width
    gamma: f64,
    /// Decision bias added to the kernel sum
    bias: f64,
}

impl SvmModel {
    /// Build a model from trained classifier parameters.
    ///
    /// Fails fast when the classifier is empty or its dimensions do not
    /// match the sampling space, since planners cannot run without it.
    pub fn new(
        space: SamplingSpace,
        sv_mat: DMatrix<f64>,
        coeff_vec: DVector<f64>,
        gamma: f64,
        bias: f64,
    ) -> PlanningResult<Self> {
        if sv_mat.ncols() == 0 {
            return Err(PlanningError::ClassifierError(
                "classifier has no support vectors".to_string(),
            ));
        }
        if sv_mat.nrows() != space.input_dim() {
            return Err(PlanningError::DimensionMismatch(format!(
                "support vectors have {} rows, expected input dim {} for {}",
                sv_mat.nrows(),
                space.input_dim(),
                space
            )));
        }
        if coeff_vec.len() != sv_mat.ncols() {
            return Err(PlanningError::DimensionMismatch(format!(
                "{} dual coefficients for {} support vectors",
                coeff_vec.len(),
                sv_mat.ncols()
            )));
        }
        if !(gamma > 0.0) {
            return Err(PlanningError::ClassifierError(format!(
                "kernel gamma must be positive, got {}",
                gamma
            )));
        }
        Ok(SvmModel {
            space,
            sv_mat,
            coeff_vec,
            gamma,
            bias,
        })
    }

    pub fn space(&self) -> SamplingSpace {
        self.space
    }

    pub fn num_support_vectors(&self) -> usize {
        self.sv_mat.ncols()
    }

    /// Signed decision value at a sample (positive side = reachable).
    ///
    /// Finite for any input: far from the support vectors the kernel sum
    /// decays and the value approaches the bias.
    pub fn calc_svm_value(&self, sample: &DVector<f64>) -> f64 {
        let input = self.space.sample_to_input(sample);
        let mut value = self.bias;
        for j in 0..self.sv_mat.ncols() {
            let diff = &input - self.sv_mat.column(j);
            value += self.coeff_vec[j] * (-self.gamma * diff.norm_squared()).exp();
        }
        value
    }

    /// Gradient of the decision value with respect to the sample's
    /// velocity-space representation (length vel_dim)
    pub fn calc_svm_grad(&self, sample: &DVector<f64>) -> DVector<f64> {
        let input = self.space.sample_to_input(sample);
        let mut input_grad = DVector::zeros(self.space.input_dim());
        for j in 0..self.sv_mat.ncols() {
            let diff = &input - self.sv_mat.column(j);
            let k = (-self.gamma * diff.norm_squared()).exp();
            input_grad += diff * (-2.0 * self.gamma * k * self.coeff_vec[j]);
        }
        input_vel_mat(self.space, sample).transpose() * input_grad
    }
}
