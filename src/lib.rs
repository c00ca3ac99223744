//! ReachmapPlanning - trajectory planning over learned reachability maps
//!
//! This crate plans placement, footstep, and locomanipulation trajectories
//! whose every step stays inside the reachable region of a kernel classifier
//! trained offline on labeled pose samples. The decision boundary enters the
//! planner as a differentiable inequality constraint inside an iterative QP.

// Core modules
pub mod common;
pub mod sampling;

// Reachability model modules
pub mod grid;
pub mod sample_set;
pub mod svm;

// Planning modules
pub mod planning;
pub mod qp;

// Re-export common types for convenience
pub use common::{PlanningError, PlanningResult};
pub use planning::{FootstepPlanner, LocomanipPlanner, PlacementPlanner, PlanningConfig};
pub use qp::{QpCoeff, QpSolver};
pub use sampling::SamplingSpace;
pub use svm::SvmModel;
