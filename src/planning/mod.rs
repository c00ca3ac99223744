//! QP planning core and the three planning variants

pub mod core;
pub mod footstep;
pub mod locomanip;
pub mod placement;

pub use self::core::{adjacent_reg_matrix, damping_weight, PlanningConfig, PlanningCore};
pub use footstep::{FootstepConfig, FootstepPlanner};
pub use locomanip::{Limb, LimbSvmSet, LocomanipConfig, LocomanipPlanner};
pub use placement::{IkSolver, PlacementConfig, PlacementPlanner};
