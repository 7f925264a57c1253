//! [`ComputeRuntime`] backed by a wgpu device.

use std::collections::HashMap;

use log::debug;
use pollster::FutureExt;
use wgpu::util::DeviceExt;

use crate::config::DeviceConfig;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::gpu::device_context::DeviceContext;
use crate::gpu::errors::GpuContextResult;
use crate::runtime::{
    BoundBuffer, BufferAccess, BufferId, ComputeRuntime, KernelId, KernelSignature, ScalarArg,
    check_launch_bindings, checked_buffer_len, pack_scalars,
};

struct WgpuKernel {
    signature: KernelSignature,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    len: usize,
    access: BufferAccess,
}

/// A compute runtime on one wgpu device and its queue.
///
/// Every launch is recorded into its own command buffer and submitted
/// immediately; wgpu executes submissions on a queue in submission order.
pub struct WgpuRuntime {
    context: DeviceContext,
    kernels: HashMap<KernelId, WgpuKernel>,
    buffers: HashMap<BufferId, WgpuBuffer>,
    next_id: usize,
}

impl WgpuRuntime {
    /// Create a runtime on the device selected by `config`.
    pub fn new(config: &DeviceConfig) -> GpuContextResult<Self> {
        Ok(Self::from_context(DeviceContext::new(config)?))
    }

    pub fn from_context(context: DeviceContext) -> Self {
        Self {
            context,
            kernels: HashMap::new(),
            buffers: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, id: BufferId) -> RuntimeResult<&WgpuBuffer> {
        self.buffers
            .get(&id)
            .ok_or(RuntimeError::UnknownBuffer { id: id.index() })
    }
}

impl ComputeRuntime for WgpuRuntime {
    fn compile_kernel(&mut self, source: &str, entry_name: &str) -> RuntimeResult<KernelId> {
        let signature = KernelSignature::reflect(source, entry_name)?;
        if signature.bindings().is_empty() {
            return Err(RuntimeError::UnsupportedKernel {
                entry_name: entry_name.to_string(),
                reason: "kernel binds no buffers".to_string(),
            });
        }

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(entry_name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry_name),
            layout: None,
            module: &module,
            entry_point: Some(entry_name),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(error) = device.pop_error_scope().block_on() {
            return Err(RuntimeError::ShaderCompilationFailed {
                entry_name: entry_name.to_string(),
                message: error.to_string(),
            });
        }
        let bind_group_layout = pipeline.get_bind_group_layout(0);

        let id = KernelId(self.next_id());
        debug!(
            "Compiled compute pipeline `{}` as {:?}, workgroup size {:?}",
            entry_name,
            id,
            signature.workgroup_size()
        );
        self.kernels.insert(
            id,
            WgpuKernel {
                signature,
                pipeline,
                bind_group_layout,
            },
        );
        Ok(id)
    }

    fn allocate_buffer(
        &mut self,
        size_bytes: u64,
        access: BufferAccess,
        initial_contents: Option<&[f32]>,
    ) -> RuntimeResult<BufferId> {
        let len = checked_buffer_len(size_bytes, initial_contents)?;

        let device = &self.context.device;
        let max = device.limits().max_storage_buffer_binding_size as u64;
        if size_bytes > max {
            return Err(RuntimeError::BufferCreationFailed {
                message: format!(
                    "{size_bytes} bytes exceeds the storage binding limit of {max} bytes"
                ),
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("accumulator-buffer"),
            size: size_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(error) = device.pop_error_scope().block_on() {
            return Err(RuntimeError::BufferCreationFailed {
                message: error.to_string(),
            });
        }

        if let Some(contents) = initial_contents.filter(|c| !c.is_empty()) {
            self.context
                .queue
                .write_buffer(&buffer, 0, bytemuck::cast_slice(contents));
        }

        let id = BufferId(self.next_id());
        self.buffers.insert(id, WgpuBuffer { buffer, len, access });
        Ok(id)
    }

    fn enqueue_launch(
        &mut self,
        kernel: KernelId,
        buffers: &[BufferId],
        scalar_args: &[ScalarArg],
        global_work_size: u32,
    ) -> RuntimeResult<()> {
        let compiled = self
            .kernels
            .get(&kernel)
            .ok_or(RuntimeError::UnknownKernel { id: kernel.index() })?;

        let bound = buffers
            .iter()
            .map(|&id| {
                self.buffer(id).map(|b| BoundBuffer {
                    id,
                    access: b.access,
                    len: b.len,
                })
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        check_launch_bindings(&compiled.signature, &bound, scalar_args)?;

        let device = &self.context.device;
        let workgroup_x = compiled.signature.workgroup_size()[0].max(1) as u64;
        let workgroups = (global_work_size as u64).div_ceil(workgroup_x);
        let max = device.limits().max_compute_workgroups_per_dimension;
        if workgroups > max as u64 {
            return Err(RuntimeError::WorkgroupLimitExceeded { workgroups, max });
        }

        let uniform = (!scalar_args.is_empty()).then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("launch-scalars"),
                contents: bytemuck::cast_slice(&pack_scalars(scalar_args)),
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });

        let mut entries = Vec::with_capacity(buffers.len() + 1);
        for (binding, &id) in buffers.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: self.buffer(id)?.buffer.as_entire_binding(),
            });
        }
        if let Some(uniform) = &uniform {
            entries.push(wgpu::BindGroupEntry {
                binding: buffers.len() as u32,
                resource: uniform.as_entire_binding(),
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("launch-bind-group"),
            layout: &compiled.bind_group_layout,
            entries: &entries,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("launch-encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("launch-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compiled.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups as u32, 1, 1);
        }
        self.context.queue.submit(Some(encoder.finish()));
        if let Some(error) = device.pop_error_scope().block_on() {
            return Err(RuntimeError::DispatchFailed {
                message: error.to_string(),
            });
        }

        debug!(
            "Submitted {:?} with {} workgroups of {}",
            kernel, workgroups, workgroup_x
        );
        Ok(())
    }

    fn drain(&mut self) -> RuntimeResult<()> {
        self.context.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, destination: &mut [f32]) -> RuntimeResult<()> {
        let source = self.buffer(buffer)?;
        if source.len != destination.len() {
            return Err(RuntimeError::DestinationSizeMismatch {
                expected: source.len,
                actual: destination.len(),
            });
        }

        let device = &self.context.device;
        let size = source.buffer.size();
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging-readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback-encoder"),
        });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging, 0, size);
        self.context.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| RuntimeError::ReadbackFailed {
                message: e.to_string(),
            })?
            .map_err(|e| RuntimeError::ReadbackFailed {
                message: e.to_string(),
            })?;

        let data = slice.get_mapped_range();
        destination.copy_from_slice(bytemuck::cast_slice(&data));
        drop(data);
        staging.unmap();
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferId) -> RuntimeResult<()> {
        // Dropping defers the free until submitted work that uses the buffer completes.
        self.buffers
            .remove(&buffer)
            .ok_or(RuntimeError::UnknownBuffer { id: buffer.index() })?;
        Ok(())
    }
}
