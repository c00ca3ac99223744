//! Error types for reachmap_planning

use std::fmt;

/// Main error type for reachability-map planning
#[derive(Debug)]
pub enum PlanningError {
    /// Malformed or missing configuration value
    ConfigError(String),
    /// Unrecognized sampling space passed to a factory
    UnsupportedSpace(String),
    /// Missing or invalid reachability classifier
    ClassifierError(String),
    /// Vector or matrix size does not match the sampling space
    DimensionMismatch(String),
}

impl fmt::Display for PlanningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanningError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            PlanningError::UnsupportedSpace(msg) => write!(f, "Unsupported sampling space: {}", msg),
            PlanningError::ClassifierError(msg) => write!(f, "Classifier error: {}", msg),
            PlanningError::DimensionMismatch(msg) => write!(f, "Dimension mismatch: {}", msg),
        }
    }
}

impl std::error::Error for PlanningError {}

/// Result type alias for planning operations
pub type PlanningResult<T> = Result<T, PlanningError>;
