//! Compute runtime seam.
//!
//! The accumulator talks to a compute device through [`ComputeRuntime`] only:
//! compile a kernel, allocate buffers, enqueue launches on an in-order queue,
//! drain the queue and read a buffer back. Two implementations exist: the
//! wgpu-backed [`WgpuRuntime`](crate::gpu::WgpuRuntime) and the CPU reference
//! [`HostRuntime`].
//!
//! # Binding convention
//!
//! Kernels declare their storage buffers at `@group(0) @binding(0..s)` in the
//! order the launch binds them, followed by at most one uniform block at
//! binding `s` that receives the launch's scalar arguments.

pub mod host;
pub mod kernel_body;
pub mod kernel_signature;

use serde::{Deserialize, Serialize};

use crate::errors::{RuntimeError, RuntimeResult};

pub use host::{HostRuntime, RuntimeStats};
pub use kernel_body::KernelBody;
pub use kernel_signature::{BindingKind, KernelBinding, KernelSignature};

/// Handle to a buffer owned by a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a compiled kernel owned by a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelId(pub(crate) usize);

impl KernelId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Kernel-side access mode of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl BufferAccess {
    pub fn kernel_can_read(self) -> bool {
        !matches!(self, BufferAccess::WriteOnly)
    }

    pub fn kernel_can_write(self) -> bool {
        !matches!(self, BufferAccess::ReadOnly)
    }
}

/// A scalar launch argument, passed to the kernel as one 32-bit word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarArg {
    U32(u32),
    I32(i32),
    F32(f32),
}

impl ScalarArg {
    pub fn to_bits(self) -> u32 {
        match self {
            ScalarArg::U32(value) => value,
            ScalarArg::I32(value) => value as u32,
            ScalarArg::F32(value) => value.to_bits(),
        }
    }

    pub fn as_u32(self) -> Option<u32> {
        match self {
            ScalarArg::U32(value) => Some(value),
            _ => None,
        }
    }
}

/// Number of 32-bit words in one uniform block row.
const UNIFORM_ROW_WORDS: usize = 4;

/// Packs scalar arguments into 32-bit words, padded to whole 16-byte rows.
pub fn pack_scalars(scalars: &[ScalarArg]) -> Vec<u32> {
    let mut words: Vec<u32> = scalars.iter().map(|s| s.to_bits()).collect();
    let padded = words.len().div_ceil(UNIFORM_ROW_WORDS).max(1) * UNIFORM_ROW_WORDS;
    words.resize(padded, 0);
    words
}

/// Rounds `len` up to the next multiple of `workgroup_size`.
///
/// Returns `None` when the rounded grid does not fit in `u32`.
pub fn global_work_size(len: usize, workgroup_size: u32) -> Option<u32> {
    let workgroup_size = workgroup_size.max(1) as u64;
    let len = u64::try_from(len).ok()?;
    let rounded = len.div_ceil(workgroup_size) * workgroup_size;
    u32::try_from(rounded).ok()
}

/// The operations the accumulator consumes from a compute device.
///
/// Launches enqueued on a runtime execute in enqueue order. Nothing is
/// guaranteed to have executed until [`drain`](ComputeRuntime::drain)
/// returns; [`read_buffer`](ComputeRuntime::read_buffer) is ordered after
/// every launch enqueued before it.
pub trait ComputeRuntime {
    /// Builds `entry_name` from `source`.
    fn compile_kernel(&mut self, source: &str, entry_name: &str) -> RuntimeResult<KernelId>;

    /// Allocates a buffer of `size_bytes`, optionally initialised from host memory.
    fn allocate_buffer(
        &mut self,
        size_bytes: u64,
        access: BufferAccess,
        initial_contents: Option<&[f32]>,
    ) -> RuntimeResult<BufferId>;

    /// Enqueues one dispatch of `kernel` over `global_work_size` work-items.
    fn enqueue_launch(
        &mut self,
        kernel: KernelId,
        buffers: &[BufferId],
        scalar_args: &[ScalarArg],
        global_work_size: u32,
    ) -> RuntimeResult<()>;

    /// Blocks until every enqueued launch has completed.
    fn drain(&mut self) -> RuntimeResult<()>;

    /// Copies the whole of `buffer` into `destination`.
    fn read_buffer(&mut self, buffer: BufferId, destination: &mut [f32]) -> RuntimeResult<()>;

    /// Frees a buffer after its last use.
    fn release_buffer(&mut self, buffer: BufferId) -> RuntimeResult<()>;
}

/// Checks `size_bytes` and the initial contents of a new buffer, returning its length in f32s.
pub(crate) fn checked_buffer_len(
    size_bytes: u64,
    initial_contents: Option<&[f32]>,
) -> RuntimeResult<usize> {
    let element_size = std::mem::size_of::<f32>() as u64;
    if size_bytes == 0 || size_bytes % element_size != 0 {
        return Err(RuntimeError::InvalidBufferSize { size_bytes });
    }
    if let Some(contents) = initial_contents {
        let provided_bytes = contents.len() as u64 * element_size;
        if provided_bytes > size_bytes {
            return Err(RuntimeError::InitialContentsTooLarge {
                provided_bytes,
                size_bytes,
            });
        }
    }
    usize::try_from(size_bytes / element_size)
        .map_err(|_| RuntimeError::InvalidBufferSize { size_bytes })
}

/// A buffer as bound to one launch slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoundBuffer {
    pub id: BufferId,
    pub access: BufferAccess,
    /// Length in elements.
    pub len: usize,
}

/// Validates a launch against the kernel's reflected signature.
///
/// `bound` lists the bound buffers in binding order. When the kernel takes
/// scalars, the first one is the element count and every bound buffer must
/// hold at least that many elements.
pub(crate) fn check_launch_bindings(
    signature: &KernelSignature,
    bound: &[BoundBuffer],
    scalar_args: &[ScalarArg],
) -> RuntimeResult<()> {
    let storage: Vec<&KernelBinding> = signature.storage_bindings().collect();
    if storage.len() != bound.len() {
        return Err(RuntimeError::BindingCountMismatch {
            entry_name: signature.entry_name().to_string(),
            expected: storage.len(),
            actual: bound.len(),
        });
    }

    match (signature.uniform_binding().is_some(), scalar_args.is_empty()) {
        (true, true) => {
            return Err(RuntimeError::ScalarArgsMismatch {
                entry_name: signature.entry_name().to_string(),
                reason: "declares a uniform block but no scalar arguments were given".to_string(),
            });
        }
        (false, false) => {
            return Err(RuntimeError::ScalarArgsMismatch {
                entry_name: signature.entry_name().to_string(),
                reason: format!(
                    "declares no uniform block but {} scalar arguments were given",
                    scalar_args.len()
                ),
            });
        }
        _ => {}
    }

    for (binding, buffer) in storage.iter().zip(bound) {
        if binding.kind.writes() {
            if !buffer.access.kernel_can_write() {
                return Err(RuntimeError::AccessViolation {
                    binding: binding.binding,
                    operation: "writes",
                    access: buffer.access,
                });
            }
            let aliased = storage
                .iter()
                .zip(bound)
                .any(|(other, other_buffer)| {
                    other.binding != binding.binding && other_buffer.id == buffer.id
                });
            if aliased {
                return Err(RuntimeError::AliasedOutput {
                    binding: binding.binding,
                });
            }
        } else if !buffer.access.kernel_can_read() {
            return Err(RuntimeError::AccessViolation {
                binding: binding.binding,
                operation: "reads",
                access: buffer.access,
            });
        }
    }

    if let Some(ScalarArg::U32(count)) = scalar_args.first().copied() {
        for (binding, buffer) in storage.iter().zip(bound) {
            if buffer.len < count as usize {
                return Err(RuntimeError::BufferTooShort {
                    binding: binding.binding,
                    len: buffer.len,
                    count,
                });
            }
        }
    }

    Ok(())
}
