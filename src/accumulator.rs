//! Chained elementwise accumulation.
//!
//! This module contains the [`ChainedAccumulator`], which sums equal-length
//! vectors on a compute device by running an [`AccumulationPlan`] through a
//! [`ComputeRuntime`]: upload the inputs, enqueue one launch per plan step,
//! drain the queue, read the final buffer back.

use log::{debug, info, warn};

use crate::accumulation_plan::{AccumulationPlan, KernelArity, Operand, StepOutput};
use crate::config::AccumulatorConfig;
use crate::errors::{AccumulatorError, AccumulatorResult, ConfigError};
use crate::gpu::shaders::{ELEMENTWISE_SUM_ENTRY, elementwise_sum_wgsl};
use crate::runtime::{
    BufferAccess, BufferId, ComputeRuntime, KernelId, ScalarArg, global_work_size,
};
use crate::verification::{Tolerance, VerificationReport, reference_sum, verify};

/// Result of one accumulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulationOutput {
    pub values: Vec<f32>,
    /// Number of kernel launches the run enqueued.
    pub launches: usize,
}

/// Sums vectors on a compute device through a chain of elementwise-sum launches.
///
/// The kernel is compiled once, when the accumulator is built, so a broken
/// kernel fails before any buffer is allocated. Every run allocates its own
/// buffers and releases them before returning.
pub struct ChainedAccumulator<R: ComputeRuntime> {
    runtime: R,
    kernel: KernelId,
    arity: KernelArity,
    workgroup_size: u32,
}

impl<R: ComputeRuntime> ChainedAccumulator<R> {
    /// Compiles the elementwise-sum kernel described by `config` on `runtime`.
    pub fn new(runtime: R, config: &AccumulatorConfig) -> AccumulatorResult<Self> {
        config.validate()?;
        let source = elementwise_sum_wgsl(config.arity, config.workgroup_size);
        Self::with_kernel_source(
            runtime,
            &source,
            ELEMENTWISE_SUM_ENTRY,
            config.arity,
            config.workgroup_size,
        )
    }

    /// Compiles a caller-supplied kernel.
    ///
    /// The kernel must follow the elementwise-sum binding layout: `arity`
    /// read operands, one output, and a uniform `count`.
    pub fn with_kernel_source(
        mut runtime: R,
        source: &str,
        entry_name: &str,
        arity: KernelArity,
        workgroup_size: u32,
    ) -> AccumulatorResult<Self> {
        if workgroup_size == 0 {
            return Err(ConfigError::Validation {
                field: "workgroup_size".to_string(),
                message: "Workgroup size must be at least 1".to_string(),
            }
            .into());
        }

        let kernel = runtime
            .compile_kernel(source, entry_name)
            .map_err(|source| AccumulatorError::Compile {
                entry_name: entry_name.to_string(),
                source,
            })?;
        debug!("Accumulator kernel `{}` ready ({:?})", entry_name, arity);

        Ok(Self {
            runtime,
            kernel,
            arity,
            workgroup_size,
        })
    }

    pub fn arity(&self) -> KernelArity {
        self.arity
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn into_runtime(self) -> R {
        self.runtime
    }

    /// Computes the elementwise sum of `inputs`.
    ///
    /// A single input is returned as a copy without launching anything, and
    /// empty vectors produce an empty output with no launches.
    pub fn accumulate<V: AsRef<[f32]>>(
        &mut self,
        inputs: &[V],
    ) -> AccumulatorResult<AccumulationOutput> {
        let inputs: Vec<&[f32]> = inputs.iter().map(|v| v.as_ref()).collect();
        let len = Self::validate_inputs(&inputs)?;

        if len == 0 {
            return Ok(AccumulationOutput {
                values: Vec::new(),
                launches: 0,
            });
        }
        if inputs.len() == 1 {
            return Ok(AccumulationOutput {
                values: inputs[0].to_vec(),
                launches: 0,
            });
        }

        let plan = AccumulationPlan::new(inputs.len(), self.arity)?;
        let grid = global_work_size(len, self.workgroup_size)
            .ok_or(AccumulatorError::VectorTooLong { len })?;
        let count = u32::try_from(len).map_err(|_| AccumulatorError::VectorTooLong { len })?;

        let mut allocated = Vec::new();
        let result = self.run_plan(&plan, &inputs, len, count, grid, &mut allocated);

        for buffer in allocated {
            if let Err(e) = self.runtime.release_buffer(buffer) {
                warn!("Failed to release {:?}: {}", buffer, e);
            }
        }

        let values = result?;
        info!(
            "Accumulated {} vectors of {} elements in {} launches",
            plan.input_count(),
            len,
            plan.launch_count()
        );
        Ok(AccumulationOutput {
            values,
            launches: plan.launch_count(),
        })
    }

    /// Accumulates `inputs` and checks the result against a CPU reference sum.
    pub fn accumulate_verified<V: AsRef<[f32]>>(
        &mut self,
        inputs: &[V],
        tolerance: &Tolerance,
    ) -> AccumulatorResult<(AccumulationOutput, VerificationReport)> {
        let output = self.accumulate(inputs)?;
        let expected = reference_sum(inputs);
        let report = verify(&output.values, &expected, tolerance)?;
        Ok((output, report))
    }

    fn validate_inputs(inputs: &[&[f32]]) -> AccumulatorResult<usize> {
        let first = inputs.first().ok_or(AccumulatorError::NoInputs)?;
        let expected = first.len();
        for (index, input) in inputs.iter().enumerate().skip(1) {
            if input.len() != expected {
                return Err(AccumulatorError::InputLengthMismatch {
                    index,
                    expected,
                    actual: input.len(),
                });
            }
        }
        Ok(expected)
    }

    fn run_plan(
        &mut self,
        plan: &AccumulationPlan,
        inputs: &[&[f32]],
        len: usize,
        count: u32,
        grid: u32,
        allocated: &mut Vec<BufferId>,
    ) -> AccumulatorResult<Vec<f32>> {
        let size_bytes = (len * std::mem::size_of::<f32>()) as u64;

        let mut input_buffers = Vec::with_capacity(inputs.len());
        for &input in inputs {
            let buffer =
                self.runtime
                    .allocate_buffer(size_bytes, BufferAccess::ReadOnly, Some(input))?;
            allocated.push(buffer);
            input_buffers.push(buffer);
        }

        let zero = if plan.needs_zero_operand() {
            let buffer = self.runtime.allocate_buffer(
                size_bytes,
                BufferAccess::ReadOnly,
                Some(vec![0.0; len].as_slice()),
            )?;
            allocated.push(buffer);
            Some(buffer)
        } else {
            None
        };

        let launch_count = plan.launch_count();
        let mut carried: Option<(usize, BufferId)> = None;
        let mut final_buffer = None;

        for (launch_index, step) in plan.steps().iter().enumerate() {
            let access = match step.output {
                StepOutput::Partial(_) => BufferAccess::ReadWrite,
                StepOutput::Final => BufferAccess::WriteOnly,
            };
            let output = self.runtime.allocate_buffer(size_bytes, access, None)?;
            allocated.push(output);

            let mut bindings = Vec::with_capacity(step.operands.len() + 1);
            for operand in &step.operands {
                let buffer = match *operand {
                    Operand::Input(i) => input_buffers[i],
                    Operand::Zero => zero.ok_or(AccumulatorError::BrokenChain {
                        partial: launch_index,
                    })?,
                    Operand::Partial(partial) => match carried.take() {
                        Some((producer, buffer)) if producer == partial => buffer,
                        _ => return Err(AccumulatorError::BrokenChain { partial }),
                    },
                };
                bindings.push(buffer);
            }
            bindings.push(output);

            self.runtime
                .enqueue_launch(self.kernel, &bindings, &[ScalarArg::U32(count)], grid)
                .map_err(|source| AccumulatorError::Launch {
                    launch_index,
                    launch_count,
                    source,
                })?;
            debug!(
                "Enqueued launch {}/{}: {:?} -> {:?}",
                launch_index + 1,
                launch_count,
                step.operands,
                step.output
            );

            match step.output {
                StepOutput::Partial(partial) => carried = Some((partial, output)),
                StepOutput::Final => final_buffer = Some(output),
            }
        }

        // Faults raised while the queue runs cannot be pinned to one launch.
        self.runtime.drain()?;

        let final_buffer = final_buffer.ok_or(AccumulatorError::BrokenChain {
            partial: launch_count,
        })?;
        let mut values = vec![0.0f32; len];
        self.runtime.read_buffer(final_buffer, &mut values)?;
        Ok(values)
    }
}
