//! Standard-form QP coefficients and the solver seam
//!
//! The planners assemble `min 0.5 x' P x + q' x` subject to box bounds and
//! linear inequalities. The numeric solver is an external collaborator
//! behind the [`QpSolver`] trait; the default backend is Clarabel, a pure
//! Rust interior-point solver. A solve that fails to converge is reported
//! as `None`, never as a panic.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::NonnegativeConeT,
};
use nalgebra::{DMatrix, DVector};

/// QP coefficients in standard form:
/// minimize `0.5 x' obj_mat x + obj_vec' x`
/// subject to `ineq_mat x <= ineq_vec` and `x_min <= x <= x_max`
#[derive(Debug, Clone)]
pub struct QpCoeff {
    pub dim_var: usize,
    pub dim_ineq: usize,
    pub obj_mat: DMatrix<f64>,
    pub obj_vec: DVector<f64>,
    pub ineq_mat: DMatrix<f64>,
    pub ineq_vec: DVector<f64>,
    pub x_min: DVector<f64>,
    pub x_max: DVector<f64>,
}

impl QpCoeff {
    pub fn new(dim_var: usize, dim_ineq: usize) -> Self {
        QpCoeff {
            dim_var,
            dim_ineq,
            obj_mat: DMatrix::zeros(dim_var, dim_var),
            obj_vec: DVector::zeros(dim_var),
            ineq_mat: DMatrix::zeros(dim_ineq, dim_var),
            ineq_vec: DVector::zeros(dim_ineq),
            // Finite moderate defaults; the bound rows go into the solver's
            // cone, so their magnitude has to stay within its scaling range
            x_min: DVector::from_element(dim_var, -1e3),
            x_max: DVector::from_element(dim_var, 1e3),
        }
    }

    /// Zero the objective and inequality coefficients before reassembly
    pub fn clear(&mut self) {
        self.obj_mat.fill(0.0);
        self.obj_vec.fill(0.0);
        self.ineq_mat.fill(0.0);
        self.ineq_vec.fill(0.0);
    }
}

/// External numeric collaborator solving the standard QP form.
///
/// Returns the optimal variable vector, or `None` when the solve fails
/// (infeasible or not converged). Callers treat `None` as a transient
/// per-iteration condition.
pub trait QpSolver {
    fn solve(&mut self, coeff: &QpCoeff) -> Option<DVector<f64>>;
}

/// Clarabel interior-point backend
pub struct ClarabelQpSolver {
    pub max_iter: u32,
}

impl Default for ClarabelQpSolver {
    fn default() -> Self {
        ClarabelQpSolver { max_iter: 200 }
    }
}

impl QpSolver for ClarabelQpSolver {
    fn solve(&mut self, coeff: &QpCoeff) -> Option<DVector<f64>> {
        let n = coeff.dim_var;
        let m = coeff.dim_ineq;

        // Box bounds become inequality rows: [A; I; -I] x <= [b; x_max; -x_min]
        let mut a_all = DMatrix::zeros(m + 2 * n, n);
        let mut b_all = DVector::zeros(m + 2 * n);
        a_all.view_mut((0, 0), (m, n)).copy_from(&coeff.ineq_mat);
        b_all.rows_mut(0, m).copy_from(&coeff.ineq_vec);
        for i in 0..n {
            a_all[(m + i, i)] = 1.0;
            b_all[m + i] = coeff.x_max[i];
            a_all[(m + n + i, i)] = -1.0;
            b_all[m + n + i] = -coeff.x_min[i];
        }

        let p_csc = dmatrix_to_csc_upper_tri(&coeff.obj_mat);
        let a_csc = dmatrix_to_csc(&a_all);
        let q: Vec<f64> = coeff.obj_vec.iter().copied().collect();
        let b: Vec<f64> = b_all.iter().copied().collect();
        let cones = vec![NonnegativeConeT(m + 2 * n)];

        let settings = DefaultSettingsBuilder::default()
            .verbose(false)
            .max_iter(self.max_iter)
            .build()
            .ok()?;

        let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &b, &cones, settings).ok()?;
        solver.solve();
        if !matches!(
            solver.solution.status,
            SolverStatus::Solved | SolverStatus::AlmostSolved
        ) {
            return None;
        }
        Some(DVector::from_vec(solver.solution.x.clone()))
    }
}

/// Convert a dense nalgebra matrix to Clarabel's CSC format
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }
    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric dense matrix to upper-triangular CSC, as Clarabel
/// expects for the objective
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for j in 0..ncols {
        for i in 0..=j.min(nrows.saturating_sub(1)) {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }
    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
