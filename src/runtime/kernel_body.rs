//! Recognition of elementwise-sum kernel bodies.
//!
//! The host runtime has no shader interpreter. Instead it inspects the naga IR
//! of the entry point and only accepts bodies it can reproduce exactly:
//!
//! ```wgsl
//! let i = gid.x;
//! if (i < params.count) {
//!     result[i] = operand_0[i] + operand_1[i] + ...;
//! }
//! ```
//!
//! or the same store without the `if`. The sum must read every read-only
//! storage binding exactly once, at the global invocation index.

use std::collections::HashMap;

use naga::{BinaryOperator, Binding, BuiltIn, Expression, Handle, Statement};

use crate::runtime::kernel_signature::{BindingKind, KernelBinding};

/// A kernel body the host runtime can execute natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelBody {
    /// `result[i] = sum of all operands at i`.
    ElementwiseSum {
        operands: usize,
        /// Uniform member index the work-item index is compared against, or
        /// `None` when every work-item writes.
        guard: Option<u32>,
    },
}

/// Symbolic value of one IR expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    GlobalId,
    GlobalIdX,
    Global(KernelBinding),
    UniformMemberPtr(u32),
    UniformMember(u32),
    ElementPtr(KernelBinding),
    Terms(Vec<u32>),
    InBounds(u32),
}

struct Evaluator<'a> {
    function: &'a naga::Function,
    globals: &'a HashMap<Handle<naga::GlobalVariable>, KernelBinding>,
}

impl Evaluator<'_> {
    fn eval(&self, handle: Handle<Expression>) -> Option<Value> {
        match self.function.expressions[handle] {
            Expression::FunctionArgument(index) => {
                let argument = self.function.arguments.get(index as usize)?;
                match argument.binding {
                    Some(Binding::BuiltIn(BuiltIn::GlobalInvocationId)) => Some(Value::GlobalId),
                    _ => None,
                }
            }
            Expression::GlobalVariable(global) => {
                self.globals.get(&global).copied().map(Value::Global)
            }
            Expression::AccessIndex { base, index } => match self.eval(base)? {
                Value::GlobalId if index == 0 => Some(Value::GlobalIdX),
                Value::Global(binding) if binding.kind == BindingKind::Uniform => {
                    Some(Value::UniformMemberPtr(index))
                }
                _ => None,
            },
            Expression::Access { base, index } => match (self.eval(base)?, self.eval(index)?) {
                (Value::Global(binding), Value::GlobalIdX) if binding.kind.is_storage() => {
                    Some(Value::ElementPtr(binding))
                }
                _ => None,
            },
            Expression::Load { pointer } => match self.eval(pointer)? {
                Value::UniformMemberPtr(member) => Some(Value::UniformMember(member)),
                Value::ElementPtr(binding) if binding.kind == BindingKind::ReadStorage => {
                    Some(Value::Terms(vec![binding.binding]))
                }
                _ => None,
            },
            Expression::Binary { op, left, right } => {
                match (op, self.eval(left)?, self.eval(right)?) {
                    (BinaryOperator::Add, Value::Terms(mut l), Value::Terms(r)) => {
                        l.extend(r);
                        Some(Value::Terms(l))
                    }
                    (BinaryOperator::Less, Value::GlobalIdX, Value::UniformMember(member)) => {
                        Some(Value::InBounds(member))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Statements of `block` that do something, up to the first bare return.
    fn effects<'b>(&self, block: &'b naga::Block) -> Option<Vec<&'b Statement>> {
        let mut effects = Vec::new();
        for statement in block.iter() {
            match statement {
                Statement::Emit(_) => {}
                Statement::Return { value: None } => break,
                Statement::Return { value: Some(_) } => return None,
                other => effects.push(other),
            }
        }
        Some(effects)
    }

    /// The read bindings summed by a `result[i] = ...` store.
    fn sum_store(&self, statement: &Statement) -> Option<Vec<u32>> {
        let Statement::Store { pointer, value } = *statement else {
            return None;
        };
        match (self.eval(pointer)?, self.eval(value)?) {
            (Value::ElementPtr(target), Value::Terms(terms)) if target.kind.writes() => {
                Some(terms)
            }
            _ => None,
        }
    }

    fn single_sum_store(&self, block: &naga::Block) -> Option<Vec<u32>> {
        match self.effects(block)?.as_slice() {
            [store] => self.sum_store(store),
            _ => None,
        }
    }
}

/// Classifies the body of `function`, whose group 0 bindings are `globals`.
pub(crate) fn classify(
    function: &naga::Function,
    globals: &HashMap<Handle<naga::GlobalVariable>, KernelBinding>,
) -> Option<KernelBody> {
    let evaluator = Evaluator { function, globals };

    let (terms, guard) = match evaluator.effects(&function.body)?.as_slice() {
        [store @ Statement::Store { .. }] => (evaluator.sum_store(store)?, None),
        [Statement::If {
            condition,
            accept,
            reject,
        }] => {
            let Value::InBounds(member) = evaluator.eval(*condition)? else {
                return None;
            };
            if !evaluator.effects(reject)?.is_empty() {
                return None;
            }
            (evaluator.single_sum_store(accept)?, Some(member))
        }
        _ => return None,
    };

    let mut read_bindings: Vec<u32> = globals
        .values()
        .filter(|b| b.kind == BindingKind::ReadStorage)
        .map(|b| b.binding)
        .collect();
    read_bindings.sort_unstable();
    let mut summed = terms;
    summed.sort_unstable();
    if summed != read_bindings {
        return None;
    }

    Some(KernelBody::ElementwiseSum {
        operands: summed.len(),
        guard,
    })
}
