//! Error types for verification operations.

use thiserror::Error;

/// Errors that prevent a verification pass from running.
///
/// Elements outside the tolerance are not errors; they are reported as
/// [`Mismatch`](crate::verification::Mismatch) entries.
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Cannot verify {actual} computed values against {expected} reference values")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid {kind} tolerance {value}: must be finite and greater than 0")]
    InvalidTolerance { kind: &'static str, value: f32 },
}
