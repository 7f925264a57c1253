//! GPU compute runtime built on wgpu.
//!
//! # Architecture
//!
//! [`DeviceContext`] selects an adapter from an explicit
//! [`DeviceConfig`](crate::config::DeviceConfig) and opens a device with one
//! queue. [`WgpuRuntime`] implements
//! [`ComputeRuntime`](crate::runtime::ComputeRuntime) on top of it: kernels
//! are WGSL, validated with naga before pipeline creation, and every launch is
//! submitted to the single queue in call order.
//!
//! # Usage
//!
//! ```ignore
//! use chained_accumulator::config::AccumulatorConfig;
//! use chained_accumulator::gpu::WgpuRuntime;
//! use chained_accumulator::ChainedAccumulator;
//!
//! let config = AccumulatorConfig::default();
//! let runtime = WgpuRuntime::new(&config.device)?;
//! let mut accumulator = ChainedAccumulator::new(runtime, &config)?;
//! let output = accumulator.accumulate(&[a, b, c, d])?;
//! ```

pub mod device_context;
pub mod errors;
pub mod shaders;
pub mod wgpu_runtime;

pub use device_context::DeviceContext;
pub use errors::{GpuContextError, GpuContextResult};
pub use shaders::{DEFAULT_WORKGROUP_SIZE, ELEMENTWISE_SUM_ENTRY, elementwise_sum_wgsl};
pub use wgpu_runtime::WgpuRuntime;
