//! GPU device context errors.

use thiserror::Error;

/// Errors raised while creating a [`DeviceContext`](crate::gpu::DeviceContext).
#[derive(Error, Debug)]
pub enum GpuContextError {
    #[error("No suitable GPU adapter found for backends {backends:?}")]
    NoAdapter { backends: wgpu::Backends },

    #[error("Adapter index {index} is out of range: {available} adapters available")]
    AdapterIndexOutOfRange { index: usize, available: usize },

    #[error("Failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

pub type GpuContextResult<T> = std::result::Result<T, GpuContextError>;
