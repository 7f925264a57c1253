//! Error types for the chained accumulator library.
//!
//! Each concern has its own error enum and result alias, avoiding generic
//! wrappers like `anyhow` or `Box<dyn Error>`.

mod accumulator_error;
mod config_error;
mod runtime_error;
mod verification_error;

pub use accumulator_error::AccumulatorError;
pub use config_error::ConfigError;
pub use runtime_error::RuntimeError;
pub use verification_error::VerificationError;

/// Result type alias for accumulation runs.
pub type AccumulatorResult<T> = std::result::Result<T, AccumulatorError>;

/// Result type alias for compute runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Result type alias for verification operations.
pub type VerificationResult<T> = std::result::Result<T, VerificationError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
