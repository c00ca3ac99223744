//! Grid index over a bounding box in sample space
//!
//! Maps continuous samples to discretized cell indices and iterates cells
//! of a precomputed reachable-set grid. Grids are read-only after load and
//! are used for constraint seeding and visualization, never mutated by
//! planning.

use nalgebra::DVector;

use crate::common::{PlanningError, PlanningResult};
use crate::sampling::SamplingSpace;
use crate::svm::SvmModel;

/// Precomputed scalar decision field over a bounding box in sample space
#[derive(Debug, Clone)]
pub struct GridSet {
    space: SamplingSpace,
    divide_nums: Vec<usize>,
    sample_min: DVector<f64>,
    sample_max: DVector<f64>,
    values: Vec<f64>,
}

impl GridSet {
    /// Build a grid from externally supplied values.
    ///
    /// The value array is one scalar per cell, length equal to the product
    /// of the divide counts, cells ordered with dimension 0 fastest.
    pub fn new(
        space: SamplingSpace,
        divide_nums: Vec<usize>,
        sample_min: DVector<f64>,
        sample_max: DVector<f64>,
        values: Vec<f64>,
    ) -> PlanningResult<Self> {
        let dim = space.sample_dim();
        if divide_nums.len() != dim || sample_min.len() != dim || sample_max.len() != dim {
            return Err(PlanningError::DimensionMismatch(format!(
                "grid bounds must have dimension {} for {}",
                dim, space
            )));
        }
        if divide_nums.iter().any(|&n| n == 0) {
            return Err(PlanningError::ConfigError(
                "grid divide counts must be positive".to_string(),
            ));
        }
        if (0..dim).any(|i| sample_max[i] < sample_min[i]) {
            return Err(PlanningError::ConfigError(
                "grid sample_max must not be below sample_min".to_string(),
            ));
        }
        let expected: usize = divide_nums.iter().product();
        if values.len() != expected {
            return Err(PlanningError::DimensionMismatch(format!(
                "grid has {} values, expected {}",
                values.len(),
                expected
            )));
        }
        Ok(GridSet {
            space,
            divide_nums,
            sample_min,
            sample_max,
            values,
        })
    }

    /// Precompute the decision value of a classifier over each cell center
    pub fn from_svm(
        svm: &SvmModel,
        divide_nums: Vec<usize>,
        sample_min: DVector<f64>,
        sample_max: DVector<f64>,
    ) -> PlanningResult<Self> {
        let space = svm.space();
        let total: usize = divide_nums.iter().product();
        let mut values = vec![0.0; total];
        let range = &sample_max - &sample_min;
        for (grid_idx, sample) in loop_grid(&divide_nums, &sample_min, &range, None, &[]) {
            values[grid_idx] = svm.calc_svm_value(&sample);
        }
        GridSet::new(space, divide_nums, sample_min, sample_max, values)
    }

    pub fn space(&self) -> SamplingSpace {
        self.space
    }

    pub fn divide_nums(&self) -> &[usize] {
        &self.divide_nums
    }

    pub fn sample_min(&self) -> &DVector<f64> {
        &self.sample_min
    }

    pub fn sample_max(&self) -> &DVector<f64> {
        &self.sample_max
    }

    pub fn sample_range(&self) -> DVector<f64> {
        &self.sample_max - &self.sample_min
    }

    pub fn value(&self, grid_idx: usize) -> f64 {
        self.values[grid_idx]
    }

    pub fn num_cells(&self) -> usize {
        self.values.len()
    }
}

/// Map per-dimension fractional positions in [0, 1] to cell indices,
/// truncating toward the lower cell and clamping into the grid
pub fn grid_divide_ratios_to_idxs(ratios: &DVector<f64>, divide_nums: &[usize]) -> Vec<usize> {
    debug_assert_eq!(ratios.len(), divide_nums.len());
    divide_nums
        .iter()
        .enumerate()
        .map(|(i, &n)| {
            let idx = (ratios[i] * n as f64).floor();
            if idx < 0.0 {
                0
            } else {
                (idx as usize).min(n - 1)
            }
        })
        .collect()
}

/// Per-dimension cell size of a grid, for rendering cell cubes
pub fn calc_grid_cube_scale(divide_nums: &[usize], range: &DVector<f64>) -> DVector<f64> {
    DVector::from_fn(range.len(), |i, _| range[i] / divide_nums[i] as f64)
}

/// Lazy iterator over grid cells yielding (linear cell index, cell-center
/// sample) pairs.
///
/// Created by [`loop_grid`]; restartable by creating it again.
pub struct GridIter {
    divide_nums: Vec<usize>,
    sample_min: DVector<f64>,
    sample_range: DVector<f64>,
    update_dims: Vec<usize>,
    idxs: Vec<usize>,
    done: bool,
}

/// Iterate the cells of a grid.
///
/// With `update_dims = None` every cell is visited, dimension 0 fastest.
/// With a restriction, only the listed dimensions are swept while the
/// remaining dimensions stay fixed at `fixed_idxs`, which yields a slice
/// of a higher-dimensional grid (e.g. a 2-D footprint at fixed yaw).
pub fn loop_grid(
    divide_nums: &[usize],
    sample_min: &DVector<f64>,
    sample_range: &DVector<f64>,
    update_dims: Option<&[usize]>,
    fixed_idxs: &[usize],
) -> GridIter {
    let dim = divide_nums.len();
    let update_dims: Vec<usize> = match update_dims {
        Some(dims) => dims.to_vec(),
        None => (0..dim).collect(),
    };
    let mut idxs = vec![0; dim];
    if fixed_idxs.len() == dim {
        idxs.copy_from_slice(fixed_idxs);
    }
    for &d in &update_dims {
        idxs[d] = 0;
    }
    let done = divide_nums.is_empty();
    GridIter {
        divide_nums: divide_nums.to_vec(),
        sample_min: sample_min.clone(),
        sample_range: sample_range.clone(),
        update_dims,
        idxs,
        done,
    }
}

impl GridIter {
    fn linear_idx(&self) -> usize {
        let mut idx = 0;
        let mut stride = 1;
        for d in 0..self.divide_nums.len() {
            idx += self.idxs[d] * stride;
            stride *= self.divide_nums[d];
        }
        idx
    }

    fn cell_center(&self) -> DVector<f64> {
        DVector::from_fn(self.divide_nums.len(), |d, _| {
            self.sample_min[d]
                + (self.idxs[d] as f64 + 0.5) * self.sample_range[d] / self.divide_nums[d] as f64
        })
    }

    // Odometer step over the swept dimensions, first listed dimension fastest
    fn advance(&mut self) {
        for pos in 0..self.update_dims.len() {
            let d = self.update_dims[pos];
            self.idxs[d] += 1;
            if self.idxs[d] < self.divide_nums[d] {
                return;
            }
            self.idxs[d] = 0;
        }
        self.done = true;
    }
}

impl Iterator for GridIter {
    type Item = (usize, DVector<f64>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = (self.linear_idx(), self.cell_center());
        self.advance();
        Some(item)
    }
}
