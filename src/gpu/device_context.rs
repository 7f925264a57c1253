//! wgpu instance, adapter, device and queue creation.

use log::info;
use pollster::FutureExt;

use crate::config::{BackendSelection, DeviceConfig, PowerPreference};
use crate::gpu::errors::{GpuContextError, GpuContextResult};

/// A device and its single command queue, selected from an explicit [`DeviceConfig`].
pub struct DeviceContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl DeviceContext {
    /// Create a context, blocking until the device is ready.
    pub fn new(config: &DeviceConfig) -> GpuContextResult<Self> {
        Self::new_async(config).block_on()
    }

    pub async fn new_async(config: &DeviceConfig) -> GpuContextResult<Self> {
        let backends = wgpu_backends(config.backends);
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = match config.adapter_index {
            Some(index) => {
                let mut adapters = instance.enumerate_adapters(backends);
                let available = adapters.len();
                if index >= available {
                    return Err(GpuContextError::AdapterIndexOutOfRange { index, available });
                }
                adapters.swap_remove(index)
            }
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu_power_preference(config.power_preference),
                    compatible_surface: None,
                    force_fallback_adapter: config.force_fallback_adapter,
                })
                .await
                .ok_or(GpuContextError::NoAdapter { backends })?,
        };

        let adapter_info = adapter.get_info();
        info!(
            "Selected adapter {} ({:?}, {:?})",
            adapter_info.name, adapter_info.backend, adapter_info.device_type
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("chained-accumulator"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    ..Default::default()
                },
                None,
            )
            .await?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }
}

fn wgpu_backends(selection: BackendSelection) -> wgpu::Backends {
    match selection {
        BackendSelection::All => wgpu::Backends::all(),
        BackendSelection::Primary => wgpu::Backends::PRIMARY,
        BackendSelection::Vulkan => wgpu::Backends::VULKAN,
        BackendSelection::Metal => wgpu::Backends::METAL,
        BackendSelection::Dx12 => wgpu::Backends::DX12,
        BackendSelection::Gl => wgpu::Backends::GL,
    }
}

fn wgpu_power_preference(preference: PowerPreference) -> wgpu::PowerPreference {
    match preference {
        PowerPreference::None => wgpu::PowerPreference::None,
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
    }
}
