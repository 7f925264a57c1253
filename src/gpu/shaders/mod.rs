//! WGSL sources for the elementwise-sum kernels.

use crate::accumulation_plan::KernelArity;

/// Entry point name of the elementwise-sum kernels.
pub const ELEMENTWISE_SUM_ENTRY: &str = "vadd";

/// Default number of work-items per workgroup.
pub const DEFAULT_WORKGROUP_SIZE: u32 = 64;

/// Get the WGSL source of the elementwise-sum kernel for `arity` operands.
///
/// Operands are bound read-only at bindings `0..arity`, the result at
/// binding `arity` and the element count as a uniform at `arity + 1`.
/// Work-items at or past the count touch no memory, so the launch grid may
/// be rounded up to whole workgroups.
///
/// # Arguments
/// * `arity` - Number of operands summed per work-item
/// * `workgroup_size` - Work-items per workgroup (x dimension)
pub fn elementwise_sum_wgsl(arity: KernelArity, workgroup_size: u32) -> String {
    let operands = arity.operands();

    let operand_bindings: String = (0..operands)
        .map(|i| {
            format!("@group(0) @binding({i})\nvar<storage, read> operand_{i}: array<f32>;\n")
        })
        .collect::<Vec<_>>()
        .join("\n");

    let sum_expression = (0..operands)
        .map(|i| format!("operand_{i}[i]"))
        .collect::<Vec<_>>()
        .join(" + ");

    format!(
        r#"// Elementwise sum of {operands} operands.
// Generated with workgroup_size = {workgroup_size}

{operand_bindings}
@group(0) @binding({output_binding})
var<storage, read_write> result: array<f32>;

struct Params {{
    count: u32,
}}

@group(0) @binding({params_binding})
var<uniform> params: Params;

@compute @workgroup_size({workgroup_size})
fn {entry}(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let i = gid.x;
    if (i < params.count) {{
        result[i] = {sum_expression};
    }}
}}
"#,
        operands = operands,
        workgroup_size = workgroup_size,
        operand_bindings = operand_bindings,
        output_binding = operands,
        params_binding = operands + 1,
        entry = ELEMENTWISE_SUM_ENTRY,
        sum_expression = sum_expression,
    )
}
