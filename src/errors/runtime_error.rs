//! Error types for compute runtime operations.

use thiserror::Error;

use crate::runtime::BufferAccess;

/// Errors reported by a [`ComputeRuntime`](crate::runtime::ComputeRuntime) implementation.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Kernel `{entry_name}` failed to compile:\n{message}")]
    ShaderCompilationFailed { entry_name: String, message: String },

    #[error("Entry point `{entry_name}` not found in kernel source")]
    EntryPointNotFound { entry_name: String },

    #[error("Kernel `{entry_name}` is not supported by this runtime: {reason}")]
    UnsupportedKernel { entry_name: String, reason: String },

    #[error("Buffer size must be a positive multiple of 4 bytes, got {size_bytes}")]
    InvalidBufferSize { size_bytes: u64 },

    #[error("Initial contents of {provided_bytes} bytes do not fit in a buffer of {size_bytes} bytes")]
    InitialContentsTooLarge { provided_bytes: u64, size_bytes: u64 },

    #[error("Buffer creation failed: {message}")]
    BufferCreationFailed { message: String },

    #[error("Unknown buffer handle {id}")]
    UnknownBuffer { id: usize },

    #[error("Unknown kernel handle {id}")]
    UnknownKernel { id: usize },

    #[error("Kernel `{entry_name}` declares {expected} storage bindings but {actual} buffers were bound")]
    BindingCountMismatch {
        entry_name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Kernel `{entry_name}` {reason}")]
    ScalarArgsMismatch { entry_name: String, reason: String },

    #[error("Binding {binding} {operation} a buffer created as {access:?}")]
    AccessViolation {
        binding: u32,
        operation: &'static str,
        access: BufferAccess,
    },

    #[error("Output binding {binding} aliases a buffer read by the same launch")]
    AliasedOutput { binding: u32 },

    #[error("Binding {binding} holds {len} elements, fewer than the launch count {count}")]
    BufferTooShort { binding: u32, len: usize, count: u32 },

    #[error("Work-item {index} read past the end of binding {binding} ({len} elements)")]
    OutOfBoundsRead { binding: u32, index: usize, len: usize },

    #[error("Work-item {index} wrote past the end of an output buffer of {len} elements")]
    OutOfBoundsWrite { index: usize, len: usize },

    #[error("Dispatch of {workgroups} workgroups exceeds the device limit of {max}")]
    WorkgroupLimitExceeded { workgroups: u64, max: u32 },

    #[error("Dispatch failed: {message}")]
    DispatchFailed { message: String },

    #[error("Buffer read-back failed: {message}")]
    ReadbackFailed { message: String },

    #[error("Destination size mismatch: buffer holds {expected} elements, destination has {actual}")]
    DestinationSizeMismatch { expected: usize, actual: usize },
}
