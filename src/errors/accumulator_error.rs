//! Error types for chained accumulation runs.

use thiserror::Error;

use super::{ConfigError, RuntimeError, VerificationError};

/// Errors that abort an accumulation run.
///
/// None of these are retried: a compile or launch failure ends the run and the
/// remaining launches of the chain are never enqueued.
#[derive(Error, Debug)]
pub enum AccumulatorError {
    #[error("Kernel `{entry_name}` could not be built: {source}")]
    Compile {
        entry_name: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Launch {launch_index} of {launch_count} was rejected: {source}")]
    Launch {
        launch_index: usize,
        launch_count: usize,
        #[source]
        source: RuntimeError,
    },

    #[error("At least one input vector is required")]
    NoInputs,

    #[error("An accumulation chain needs at least 2 inputs, got {count}")]
    InsufficientInputs { count: usize },

    #[error("Input {index} has {actual} elements, but the first input has {expected}")]
    InputLengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Vector length {len} exceeds the addressable range of a launch")]
    VectorTooLong { len: usize },

    #[error("Partial sum {partial} was bound before it was produced or after it was consumed")]
    BrokenChain { partial: usize },

    #[error("Invalid accumulator configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Verification(#[from] VerificationError),
}
