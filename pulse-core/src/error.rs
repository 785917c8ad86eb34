//! Input validation errors
//!
//! Raised before any shared state is touched.

use thiserror::Error;

/// Malformed or out-of-range input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must have {expected} values, got {actual}")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{field} contains a non-finite value")]
    NonFinite { field: &'static str },

    #[error("{field} is empty or missing")]
    Missing { field: &'static str },

    #[error("score {value} outside domain [{min}, {max}]")]
    OutOfDomain { value: f64, min: f64, max: f64 },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
