//! Chained elementwise vector accumulation on a compute device.
//!
//! This library sums any number of equal-length `f32` vectors by chaining
//! launches of a small elementwise-sum kernel: each launch adds two (or three)
//! operands into a fresh buffer, and the partial sum of one launch feeds the
//! next. All launches go to one in-order queue, so the chain needs no
//! synchronization besides a single drain before the result is read back.
//!
//! Two runtimes implement the device seam: [`gpu::WgpuRuntime`] for real GPUs
//! and [`runtime::HostRuntime`], a CPU reference device used by the tests.

pub mod accumulation_plan;
pub mod accumulator;
pub mod config;
pub mod errors;
pub mod gpu;
pub mod runtime;
pub mod verification;

pub use accumulation_plan::{AccumulationPlan, KernelArity};
pub use accumulator::{AccumulationOutput, ChainedAccumulator};
pub use config::{AccumulatorConfig, ConfigLoader, DeviceConfig};
pub use runtime::{BufferAccess, ComputeRuntime, HostRuntime};
pub use verification::{Tolerance, VerificationReport};
