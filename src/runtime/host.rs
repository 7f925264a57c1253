//! CPU reference device.
//!
//! [`HostRuntime`] behaves like a single-queue compute device living in host
//! memory. Kernel source is parsed and validated with naga exactly as the GPU
//! runtime does, and the entry point's body must be one the host can execute
//! natively (see [`KernelBody`]). Launches queue up until
//! [`drain`](ComputeRuntime::drain) runs them in enqueue order; work-items of
//! one launch run on the rayon pool.

use std::collections::{HashMap, VecDeque};

use log::debug;
use rayon::prelude::*;

use crate::errors::{RuntimeError, RuntimeResult};
use crate::runtime::kernel_body::KernelBody;
use crate::runtime::{
    BoundBuffer, BufferAccess, BufferId, ComputeRuntime, KernelId, KernelSignature, ScalarArg,
    check_launch_bindings, checked_buffer_len,
};

/// Counters describing what a [`HostRuntime`] has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub kernels_compiled: usize,
    pub buffers_allocated: usize,
    pub buffers_live: usize,
    pub launches_enqueued: usize,
    pub launches_executed: usize,
    pub drains: usize,
}

struct HostKernel {
    signature: KernelSignature,
    body: KernelBody,
}

struct HostBuffer {
    data: Vec<f32>,
    access: BufferAccess,
}

struct PendingLaunch {
    kernel: KernelId,
    buffers: Vec<BufferId>,
    scalars: Vec<ScalarArg>,
    global_work_size: u32,
}

/// What one work-item did.
enum WorkItem {
    Skipped,
    Wrote(f32),
    WritePastEnd,
    ReadPastEnd { binding: u32, len: usize },
}

#[derive(Default)]
pub struct HostRuntime {
    kernels: HashMap<KernelId, HostKernel>,
    buffers: HashMap<BufferId, HostBuffer>,
    queue: VecDeque<PendingLaunch>,
    next_id: usize,
    stats: RuntimeStats,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    /// Number of launches enqueued but not yet executed.
    pub fn pending_launches(&self) -> usize {
        self.queue.len()
    }

    fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, id: BufferId) -> RuntimeResult<&HostBuffer> {
        self.buffers
            .get(&id)
            .ok_or(RuntimeError::UnknownBuffer { id: id.index() })
    }

    fn execute(&mut self, launch: PendingLaunch) -> RuntimeResult<()> {
        let kernel = self
            .kernels
            .get(&launch.kernel)
            .ok_or(RuntimeError::UnknownKernel {
                id: launch.kernel.index(),
            })?;
        let body = kernel.body;
        let output_position = kernel.signature.output_positions()[0];
        let output_id = launch.buffers[output_position];

        let mut output = match self.buffers.get_mut(&output_id) {
            Some(buffer) => std::mem::take(&mut buffer.data),
            None => {
                return Err(RuntimeError::UnknownBuffer {
                    id: output_id.index(),
                });
            }
        };
        let result = self.run_work_items(body, &launch, output_position, &mut output);

        if let Some(buffer) = self.buffers.get_mut(&output_id) {
            buffer.data = output;
        }
        self.stats.launches_executed += 1;
        debug!(
            "Executed {:?} over {} work-items",
            launch.kernel, launch.global_work_size
        );
        result
    }

    fn run_work_items(
        &self,
        body: KernelBody,
        launch: &PendingLaunch,
        output_position: usize,
        output: &mut [f32],
    ) -> RuntimeResult<()> {
        let KernelBody::ElementwiseSum { guard, .. } = body;

        // Storage bindings are numbered by position, so the index is the binding.
        let operands = launch
            .buffers
            .iter()
            .enumerate()
            .filter(|&(position, _)| position != output_position)
            .map(|(position, &id)| self.buffer(id).map(|b| (position as u32, b.data.as_slice())))
            .collect::<RuntimeResult<Vec<(u32, &[f32])>>>()?;
        let count = guard.map(|member| {
            launch
                .scalars
                .get(member as usize)
                .map_or(0, |s| s.to_bits() as usize)
        });

        let len = output.len();
        let items: Vec<WorkItem> = (0..launch.global_work_size as usize)
            .into_par_iter()
            .map(|gid| elementwise_sum(gid, &operands, count, len))
            .collect();

        for (gid, item) in items.into_iter().enumerate() {
            match item {
                WorkItem::Skipped => {}
                WorkItem::Wrote(value) => output[gid] = value,
                WorkItem::WritePastEnd => {
                    return Err(RuntimeError::OutOfBoundsWrite { index: gid, len });
                }
                WorkItem::ReadPastEnd { binding, len } => {
                    return Err(RuntimeError::OutOfBoundsRead {
                        binding,
                        index: gid,
                        len,
                    });
                }
            }
        }
        Ok(())
    }
}

/// One work-item of an elementwise sum, skipped at or past `count` when guarded.
fn elementwise_sum(
    gid: usize,
    operands: &[(u32, &[f32])],
    count: Option<usize>,
    output_len: usize,
) -> WorkItem {
    if count.is_some_and(|count| gid >= count) {
        return WorkItem::Skipped;
    }
    if gid >= output_len {
        return WorkItem::WritePastEnd;
    }
    let mut sum = 0.0f32;
    for (index, &(binding, values)) in operands.iter().enumerate() {
        match values.get(gid) {
            Some(&value) if index == 0 => sum = value,
            Some(&value) => sum += value,
            None => {
                return WorkItem::ReadPastEnd {
                    binding,
                    len: values.len(),
                };
            }
        }
    }
    WorkItem::Wrote(sum)
}

impl ComputeRuntime for HostRuntime {
    fn compile_kernel(&mut self, source: &str, entry_name: &str) -> RuntimeResult<KernelId> {
        let signature = KernelSignature::reflect(source, entry_name)?;

        let body = signature
            .body()
            .ok_or_else(|| RuntimeError::UnsupportedKernel {
                entry_name: entry_name.to_string(),
                reason: "the host runtime only executes elementwise-sum bodies".to_string(),
            })?;

        let id = KernelId(self.next_id());
        debug!(
            "Compiled host kernel `{}` as {:?}: {:?}",
            entry_name, id, body
        );
        self.kernels.insert(id, HostKernel { signature, body });
        self.stats.kernels_compiled += 1;
        Ok(id)
    }

    fn allocate_buffer(
        &mut self,
        size_bytes: u64,
        access: BufferAccess,
        initial_contents: Option<&[f32]>,
    ) -> RuntimeResult<BufferId> {
        let len = checked_buffer_len(size_bytes, initial_contents)?;
        let mut data = vec![0.0f32; len];
        if let Some(contents) = initial_contents {
            data[..contents.len()].copy_from_slice(contents);
        }

        let id = BufferId(self.next_id());
        self.buffers.insert(id, HostBuffer { data, access });
        self.stats.buffers_allocated += 1;
        self.stats.buffers_live += 1;
        Ok(id)
    }

    fn enqueue_launch(
        &mut self,
        kernel: KernelId,
        buffers: &[BufferId],
        scalar_args: &[ScalarArg],
        global_work_size: u32,
    ) -> RuntimeResult<()> {
        let signature = &self
            .kernels
            .get(&kernel)
            .ok_or(RuntimeError::UnknownKernel { id: kernel.index() })?
            .signature;

        let bound = buffers
            .iter()
            .map(|&id| {
                self.buffer(id).map(|b| BoundBuffer {
                    id,
                    access: b.access,
                    len: b.data.len(),
                })
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        check_launch_bindings(signature, &bound, scalar_args)?;

        self.queue.push_back(PendingLaunch {
            kernel,
            buffers: buffers.to_vec(),
            scalars: scalar_args.to_vec(),
            global_work_size,
        });
        self.stats.launches_enqueued += 1;
        Ok(())
    }

    fn drain(&mut self) -> RuntimeResult<()> {
        self.stats.drains += 1;
        while let Some(launch) = self.queue.pop_front() {
            if let Err(e) = self.execute(launch) {
                // A failed launch poisons everything queued behind it.
                self.queue.clear();
                return Err(e);
            }
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, destination: &mut [f32]) -> RuntimeResult<()> {
        self.drain()?;
        let source = &self.buffer(buffer)?.data;
        if source.len() != destination.len() {
            return Err(RuntimeError::DestinationSizeMismatch {
                expected: source.len(),
                actual: destination.len(),
            });
        }
        destination.copy_from_slice(source);
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferId) -> RuntimeResult<()> {
        self.buffers
            .remove(&buffer)
            .ok_or(RuntimeError::UnknownBuffer { id: buffer.index() })?;
        self.stats.buffers_live -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulation_plan::KernelArity;
    use crate::gpu::shaders::{ELEMENTWISE_SUM_ENTRY, elementwise_sum_wgsl};

    fn bytes(len: usize) -> u64 {
        (len * std::mem::size_of::<f32>()) as u64
    }

    fn binary_kernel(runtime: &mut HostRuntime) -> KernelId {
        runtime
            .compile_kernel(
                &elementwise_sum_wgsl(KernelArity::Binary, 64),
                ELEMENTWISE_SUM_ENTRY,
            )
            .unwrap()
    }

    #[test]
    fn test_single_launch_adds_vectors() {
        let mut runtime = HostRuntime::new();
        let kernel = binary_kernel(&mut runtime);

        let a = runtime
            .allocate_buffer(bytes(3), BufferAccess::ReadOnly, Some(&[1.0, 2.0, 3.0]))
            .unwrap();
        let b = runtime
            .allocate_buffer(bytes(3), BufferAccess::ReadOnly, Some(&[0.5, 0.25, -3.0]))
            .unwrap();
        let c = runtime
            .allocate_buffer(bytes(3), BufferAccess::WriteOnly, None)
            .unwrap();

        runtime
            .enqueue_launch(kernel, &[a, b, c], &[ScalarArg::U32(3)], 64)
            .unwrap();
        assert_eq!(runtime.pending_launches(), 1);

        runtime.drain().unwrap();
        assert_eq!(runtime.pending_launches(), 0);

        let mut out = vec![0.0; 3];
        runtime.read_buffer(c, &mut out).unwrap();
        assert_eq!(out, vec![1.5, 2.25, 0.0]);
    }

    #[test]
    fn test_oversized_grid_leaves_tail_untouched() {
        let mut runtime = HostRuntime::new();
        let kernel = binary_kernel(&mut runtime);

        let a = runtime
            .allocate_buffer(bytes(8), BufferAccess::ReadOnly, Some(&[1.0; 8]))
            .unwrap();
        let b = runtime
            .allocate_buffer(bytes(8), BufferAccess::ReadOnly, Some(&[1.0; 8]))
            .unwrap();
        let c = runtime
            .allocate_buffer(bytes(8), BufferAccess::ReadWrite, Some(&[-7.0; 8]))
            .unwrap();

        runtime
            .enqueue_launch(kernel, &[a, b, c], &[ScalarArg::U32(5)], 64)
            .unwrap();
        let mut out = vec![0.0; 8];
        runtime.read_buffer(c, &mut out).unwrap();

        assert_eq!(out, vec![2.0, 2.0, 2.0, 2.0, 2.0, -7.0, -7.0, -7.0]);
    }

    /// The binary elementwise sum with the `count` comparison removed.
    fn unguarded_binary_source() -> String {
        elementwise_sum_wgsl(KernelArity::Binary, 64).replace(
            "if (i < params.count) {\n        result[i] = operand_0[i] + operand_1[i];\n    }",
            "let count = params.count;\n    result[i] = operand_0[i] + operand_1[i];",
        )
    }

    #[test]
    fn test_unguarded_kernel_write_is_out_of_bounds() {
        let mut runtime = HostRuntime::new();
        let kernel = runtime
            .compile_kernel(&unguarded_binary_source(), ELEMENTWISE_SUM_ENTRY)
            .unwrap();

        let a = runtime
            .allocate_buffer(bytes(4), BufferAccess::ReadOnly, Some(&[1.0; 4]))
            .unwrap();
        let b = runtime
            .allocate_buffer(bytes(4), BufferAccess::ReadOnly, Some(&[1.0; 4]))
            .unwrap();
        let c = runtime
            .allocate_buffer(bytes(4), BufferAccess::WriteOnly, None)
            .unwrap();

        runtime
            .enqueue_launch(kernel, &[a, b, c], &[ScalarArg::U32(4)], 64)
            .unwrap();
        runtime
            .enqueue_launch(kernel, &[a, b, c], &[ScalarArg::U32(4)], 64)
            .unwrap();

        let result = runtime.drain();
        assert!(matches!(
            result,
            Err(RuntimeError::OutOfBoundsWrite { index: 4, len: 4 })
        ));
        assert_eq!(runtime.pending_launches(), 0);
        assert_eq!(runtime.stats().launches_executed, 1);

        // The output buffer survives a failed launch.
        let mut out = vec![0.0; 4];
        runtime.read_buffer(c, &mut out).unwrap();
    }

    #[test]
    fn test_unguarded_kernel_read_past_short_operand() {
        let mut runtime = HostRuntime::new();
        let kernel = runtime
            .compile_kernel(&unguarded_binary_source(), ELEMENTWISE_SUM_ENTRY)
            .unwrap();

        let a = runtime
            .allocate_buffer(bytes(4), BufferAccess::ReadOnly, Some(&[1.0; 4]))
            .unwrap();
        let b = runtime
            .allocate_buffer(bytes(8), BufferAccess::ReadOnly, Some(&[1.0; 8]))
            .unwrap();
        let c = runtime
            .allocate_buffer(bytes(8), BufferAccess::WriteOnly, None)
            .unwrap();

        runtime
            .enqueue_launch(kernel, &[a, b, c], &[ScalarArg::U32(4)], 8)
            .unwrap();
        assert!(matches!(
            runtime.drain(),
            Err(RuntimeError::OutOfBoundsRead {
                binding: 0,
                index: 4,
                len: 4
            })
        ));
    }

    #[test]
    fn test_kernel_body_decides_what_runs() {
        let mut runtime = HostRuntime::new();
        let subtracting = elementwise_sum_wgsl(KernelArity::Binary, 64)
            .replace("operand_0[i] + operand_1[i]", "operand_0[i] - operand_1[i]");
        let always_true = elementwise_sum_wgsl(KernelArity::Binary, 64).replace(
            "if (i < params.count) {\n        result[i] = operand_0[i] + operand_1[i];",
            "let count = params.count;\n    if (true) {\n        result[i] = operand_0[i] + operand_1[i];",
        );
        assert_ne!(
            always_true,
            elementwise_sum_wgsl(KernelArity::Binary, 64)
        );

        for source in [subtracting, always_true] {
            assert!(matches!(
                runtime.compile_kernel(&source, ELEMENTWISE_SUM_ENTRY),
                Err(RuntimeError::UnsupportedKernel { .. })
            ));
        }
        assert_eq!(runtime.stats().kernels_compiled, 0);
    }

    #[test]
    fn test_short_buffer_rejected_at_enqueue() {
        let mut runtime = HostRuntime::new();
        let kernel = binary_kernel(&mut runtime);

        let a = runtime
            .allocate_buffer(bytes(4), BufferAccess::ReadOnly, Some(&[1.0; 4]))
            .unwrap();
        let b = runtime
            .allocate_buffer(bytes(4), BufferAccess::ReadOnly, Some(&[1.0; 4]))
            .unwrap();
        let c = runtime
            .allocate_buffer(bytes(8), BufferAccess::WriteOnly, None)
            .unwrap();

        let result = runtime.enqueue_launch(kernel, &[a, b, c], &[ScalarArg::U32(8)], 64);
        assert!(matches!(
            result,
            Err(RuntimeError::BufferTooShort {
                binding: 0,
                len: 4,
                count: 8
            })
        ));
        assert_eq!(runtime.pending_launches(), 0);

        // A shorter count over the same buffers is fine.
        runtime
            .enqueue_launch(kernel, &[a, b, c], &[ScalarArg::U32(4)], 64)
            .unwrap();
        let mut out = vec![0.0; 8];
        runtime.read_buffer(c, &mut out).unwrap();
        assert_eq!(out, vec![2.0, 2.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_write_into_read_only_buffer_is_rejected() {
        let mut runtime = HostRuntime::new();
        let kernel = binary_kernel(&mut runtime);

        let a = runtime
            .allocate_buffer(bytes(2), BufferAccess::ReadOnly, Some(&[1.0, 2.0]))
            .unwrap();
        let b = runtime
            .allocate_buffer(bytes(2), BufferAccess::ReadOnly, Some(&[1.0, 2.0]))
            .unwrap();
        let c = runtime
            .allocate_buffer(bytes(2), BufferAccess::ReadOnly, None)
            .unwrap();

        let result = runtime.enqueue_launch(kernel, &[a, b, c], &[ScalarArg::U32(2)], 64);
        assert!(matches!(
            result,
            Err(RuntimeError::AccessViolation {
                binding: 2,
                operation: "writes",
                access: BufferAccess::ReadOnly
            })
        ));
        assert_eq!(runtime.stats().launches_enqueued, 0);
    }

    #[test]
    fn test_read_from_write_only_buffer_is_rejected() {
        let mut runtime = HostRuntime::new();
        let kernel = binary_kernel(&mut runtime);

        let a = runtime
            .allocate_buffer(bytes(2), BufferAccess::WriteOnly, None)
            .unwrap();
        let b = runtime
            .allocate_buffer(bytes(2), BufferAccess::ReadOnly, None)
            .unwrap();
        let c = runtime
            .allocate_buffer(bytes(2), BufferAccess::WriteOnly, None)
            .unwrap();

        let result = runtime.enqueue_launch(kernel, &[a, b, c], &[ScalarArg::U32(2)], 64);
        assert!(matches!(
            result,
            Err(RuntimeError::AccessViolation { binding: 0, operation: "reads", .. })
        ));
    }

    #[test]
    fn test_aliased_output_is_rejected() {
        let mut runtime = HostRuntime::new();
        let kernel = binary_kernel(&mut runtime);

        let a = runtime
            .allocate_buffer(bytes(2), BufferAccess::ReadWrite, Some(&[1.0, 2.0]))
            .unwrap();
        let b = runtime
            .allocate_buffer(bytes(2), BufferAccess::ReadOnly, Some(&[1.0, 2.0]))
            .unwrap();

        let result = runtime.enqueue_launch(kernel, &[a, b, a], &[ScalarArg::U32(2)], 64);
        assert!(matches!(
            result,
            Err(RuntimeError::AliasedOutput { binding: 2 })
        ));
    }

    #[test]
    fn test_binding_and_scalar_mismatches() {
        let mut runtime = HostRuntime::new();
        let kernel = binary_kernel(&mut runtime);

        let a = runtime
            .allocate_buffer(bytes(2), BufferAccess::ReadOnly, None)
            .unwrap();
        let c = runtime
            .allocate_buffer(bytes(2), BufferAccess::WriteOnly, None)
            .unwrap();

        assert!(matches!(
            runtime.enqueue_launch(kernel, &[a, c], &[ScalarArg::U32(2)], 64),
            Err(RuntimeError::BindingCountMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));

        let b = runtime
            .allocate_buffer(bytes(2), BufferAccess::ReadOnly, None)
            .unwrap();
        assert!(matches!(
            runtime.enqueue_launch(kernel, &[a, b, c], &[], 64),
            Err(RuntimeError::ScalarArgsMismatch { .. })
        ));
    }

    #[test]
    fn test_entry_name_does_not_matter() {
        let mut runtime = HostRuntime::new();
        let source = elementwise_sum_wgsl(KernelArity::Ternary, 32).replace("fn vadd(", "fn vsum(");

        runtime.compile_kernel(&source, "vsum").unwrap();
        assert_eq!(runtime.stats().kernels_compiled, 1);
    }

    #[test]
    fn test_release_and_unknown_buffers() {
        let mut runtime = HostRuntime::new();
        let a = runtime
            .allocate_buffer(bytes(2), BufferAccess::ReadOnly, None)
            .unwrap();
        assert_eq!(runtime.stats().buffers_live, 1);

        runtime.release_buffer(a).unwrap();
        assert_eq!(runtime.stats().buffers_live, 0);
        assert_eq!(runtime.stats().buffers_allocated, 1);

        assert!(matches!(
            runtime.release_buffer(a),
            Err(RuntimeError::UnknownBuffer { .. })
        ));
        let mut out = vec![0.0; 2];
        assert!(matches!(
            runtime.read_buffer(a, &mut out),
            Err(RuntimeError::UnknownBuffer { .. })
        ));
    }

    #[test]
    fn test_read_destination_size_must_match() {
        let mut runtime = HostRuntime::new();
        let a = runtime
            .allocate_buffer(bytes(4), BufferAccess::ReadOnly, Some(&[1.0, 2.0]))
            .unwrap();

        let mut short = vec![0.0; 2];
        assert!(matches!(
            runtime.read_buffer(a, &mut short),
            Err(RuntimeError::DestinationSizeMismatch {
                expected: 4,
                actual: 2
            })
        ));

        let mut out = vec![9.0; 4];
        runtime.read_buffer(a, &mut out).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_elementwise_sum_work_item() {
        let a = [1.0, 2.0];
        let b = [3.0, 4.0];
        let operands: [(u32, &[f32]); 2] = [(0, &a), (1, &b)];

        assert!(matches!(
            elementwise_sum(1, &operands, Some(2), 2),
            WorkItem::Wrote(value) if value == 6.0
        ));
        assert!(matches!(
            elementwise_sum(2, &operands, Some(2), 2),
            WorkItem::Skipped
        ));
        assert!(matches!(
            elementwise_sum(2, &operands, None, 2),
            WorkItem::WritePastEnd
        ));
        assert!(matches!(
            elementwise_sum(2, &operands, None, 4),
            WorkItem::ReadPastEnd { binding: 0, len: 2 }
        ));
    }
}
