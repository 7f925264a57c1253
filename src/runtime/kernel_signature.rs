//! Kernel reflection from WGSL source.
//!
//! Both runtimes build kernels from WGSL. Parsing and validating the source
//! with naga up front turns a broken kernel into a [`RuntimeError`] instead of
//! a device-side failure, and yields the binding layout the launch checks use.

use std::collections::HashMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::errors::{RuntimeError, RuntimeResult};
use crate::runtime::kernel_body::{KernelBody, classify};

/// How a kernel uses one of its bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    ReadStorage,
    ReadWriteStorage,
    Uniform,
}

impl BindingKind {
    pub fn writes(self) -> bool {
        matches!(self, BindingKind::ReadWriteStorage)
    }

    pub fn is_storage(self) -> bool {
        !matches!(self, BindingKind::Uniform)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelBinding {
    pub binding: u32,
    pub kind: BindingKind,
}

/// The launch-relevant shape of a compiled compute entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    entry_name: String,
    workgroup_size: [u32; 3],
    bindings: Vec<KernelBinding>,
    body: Option<KernelBody>,
}

impl KernelSignature {
    /// Parses and validates `source`, then reflects `entry_name`.
    ///
    /// Only group 0 bindings used by the entry point are kept. Storage
    /// bindings must be numbered `0..s` and a uniform block, if present,
    /// must sit at binding `s`.
    pub fn reflect(source: &str, entry_name: &str) -> RuntimeResult<Self> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| {
            RuntimeError::ShaderCompilationFailed {
                entry_name: entry_name.to_string(),
                message: e.emit_to_string(source),
            }
        })?;

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        let info = validator
            .validate(&module)
            .map_err(|e| RuntimeError::ShaderCompilationFailed {
                entry_name: entry_name.to_string(),
                message: format!("{e}"),
            })?;

        let (ep_index, entry_point) = module
            .entry_points
            .iter()
            .enumerate()
            .find(|(_, ep)| ep.name == entry_name)
            .ok_or_else(|| RuntimeError::EntryPointNotFound {
                entry_name: entry_name.to_string(),
            })?;

        if entry_point.stage != naga::ShaderStage::Compute {
            return Err(unsupported(entry_name, "entry point is not a compute stage"));
        }

        let ep_info = info.get_entry_point(ep_index);
        let mut globals = HashMap::new();
        for (handle, var) in module.global_variables.iter() {
            if ep_info[handle].is_empty() {
                continue;
            }
            let Some(resource) = &var.binding else {
                continue;
            };
            let kind = match var.space {
                naga::AddressSpace::Storage { access } => {
                    if access.contains(naga::StorageAccess::STORE) {
                        BindingKind::ReadWriteStorage
                    } else {
                        BindingKind::ReadStorage
                    }
                }
                naga::AddressSpace::Uniform => BindingKind::Uniform,
                _ => {
                    return Err(unsupported(
                        entry_name,
                        &format!("binding {} is neither storage nor uniform", resource.binding),
                    ));
                }
            };
            if resource.group != 0 {
                return Err(unsupported(
                    entry_name,
                    &format!("binding {} is in group {}", resource.binding, resource.group),
                ));
            }
            globals.insert(
                handle,
                KernelBinding {
                    binding: resource.binding,
                    kind,
                },
            );
        }
        let mut bindings: Vec<KernelBinding> = globals.values().copied().collect();
        bindings.sort_by_key(|b| b.binding);

        let signature = Self {
            entry_name: entry_name.to_string(),
            workgroup_size: entry_point.workgroup_size,
            bindings,
            body: classify(&entry_point.function, &globals),
        };
        signature.check_layout()?;
        Ok(signature)
    }

    fn check_layout(&self) -> RuntimeResult<()> {
        let storage_count = self.storage_bindings().count();
        for (expected, binding) in self.storage_bindings().enumerate() {
            if binding.binding as usize != expected {
                return Err(unsupported(
                    &self.entry_name,
                    &format!(
                        "storage bindings must be numbered from 0 without gaps, found {} at position {}",
                        binding.binding, expected
                    ),
                ));
            }
        }

        let uniforms: Vec<&KernelBinding> = self
            .bindings
            .iter()
            .filter(|b| !b.kind.is_storage())
            .collect();
        match uniforms.as_slice() {
            [] => Ok(()),
            [uniform] if uniform.binding as usize == storage_count => Ok(()),
            [uniform] => Err(unsupported(
                &self.entry_name,
                &format!(
                    "uniform block must follow the storage bindings at {}, found {}",
                    storage_count, uniform.binding
                ),
            )),
            _ => Err(unsupported(
                &self.entry_name,
                "at most one uniform block is supported",
            )),
        }
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    pub fn bindings(&self) -> &[KernelBinding] {
        &self.bindings
    }

    /// The recognized shape of the entry point's body, if any.
    pub fn body(&self) -> Option<KernelBody> {
        self.body
    }

    pub fn storage_bindings(&self) -> impl Iterator<Item = &KernelBinding> {
        self.bindings.iter().filter(|b| b.kind.is_storage())
    }

    pub fn uniform_binding(&self) -> Option<&KernelBinding> {
        self.bindings.iter().find(|b| !b.kind.is_storage())
    }

    /// Indices (in binding order) of the storage bindings the kernel writes.
    pub fn output_positions(&self) -> Vec<usize> {
        self.storage_bindings()
            .enumerate()
            .filter(|(_, b)| b.kind.writes())
            .map(|(position, _)| position)
            .collect()
    }
}

fn unsupported(entry_name: &str, reason: &str) -> RuntimeError {
    RuntimeError::UnsupportedKernel {
        entry_name: entry_name.to_string(),
        reason: reason.to_string(),
    }
}
