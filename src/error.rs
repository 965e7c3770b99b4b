// src/error.rs
// Planner error types
//
// All of these are programming/construction errors, not user errors: the
// caller should not retry with the same input.

use std::fmt;

/// Planner error
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerError {
    /// Sort was constructed with an empty key list
    EmptySort,
    /// FoldLeft was constructed with no tails
    EmptyFoldLeft,
    /// A user reshape or grouping binds one of the reserved labels
    /// (`lEft`, `rIght`, `value`) at the top level
    ReservedLabel(String),
    /// A second $geoNear was constructed in the same single-source chain
    DuplicateGeoNear,
    /// A FoldLeft tail did not lower to a map-reduce task at crush time
    InvalidFoldLeftTail(String),
    /// Serialization error while rendering a plan
    Serialization(String),
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::EmptySort => {
                write!(f, "Sort requires at least one sort key")
            }
            PlannerError::EmptyFoldLeft => {
                write!(f, "FoldLeft requires at least one tail")
            }
            PlannerError::ReservedLabel(name) => {
                write!(f, "Field label is reserved for the planner: {}", name)
            }
            PlannerError::DuplicateGeoNear => {
                write!(f, "A pipeline chain may contain at most one $geoNear")
            }
            PlannerError::InvalidFoldLeftTail(detail) => {
                write!(f, "FoldLeft tail did not lower to a map-reduce task: {}", detail)
            }
            PlannerError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
        }
    }
}

impl std::error::Error for PlannerError {}

impl From<serde_json::Error> for PlannerError {
    fn from(err: serde_json::Error) -> Self {
        PlannerError::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PlannerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_reserved_label() {
        let err = PlannerError::ReservedLabel("lEft".to_string());
        assert!(err.to_string().contains("lEft"));
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_display_fold_left_tail() {
        let err = PlannerError::InvalidFoldLeftTail("tail was a pipeline".to_string());
        assert!(err.to_string().contains("map-reduce"));
    }
}
