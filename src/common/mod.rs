//! Common error definitions for reachmap_planning
//!
//! This module provides the foundational building blocks used across
//! the sampling, reachability, and planning modules of this crate.

pub mod error;

pub use error::*;
