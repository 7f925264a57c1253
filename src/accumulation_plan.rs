//! The launch chain of an accumulation, as an explicit dependency list.
//!
//! Inputs are folded left to right. The first launch combines the first
//! `arity` inputs; every later launch combines the previous launch's partial
//! sum with the next `arity - 1` inputs. Each partial sum has exactly one
//! producer (launch `j`) and exactly one consumer (launch `j + 1`), and the
//! last launch writes the final output.

use serde::{Deserialize, Serialize};

use crate::errors::{AccumulatorError, AccumulatorResult};

/// Number of operands the elementwise-sum kernel adds per work-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelArity {
    #[default]
    Binary,
    Ternary,
}

impl KernelArity {
    pub fn operands(self) -> usize {
        match self {
            KernelArity::Binary => 2,
            KernelArity::Ternary => 3,
        }
    }

    /// Number of launches needed to fold `input_count` inputs.
    pub fn launches_for(self, input_count: usize) -> usize {
        if input_count < 2 {
            return 0;
        }
        (input_count - 1).div_ceil(self.operands() - 1)
    }
}

/// A buffer bound as a launch operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// The caller's input vector at this position.
    Input(usize),
    /// The partial sum written by the launch at this index.
    Partial(usize),
    /// A zero-filled vector filling an operand slot the inputs ran out for.
    Zero,
}

/// Where a launch writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutput {
    Partial(usize),
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchStep {
    pub operands: Vec<Operand>,
    pub output: StepOutput,
}

impl LaunchStep {
    /// The partial sum this step consumes, if any.
    pub fn consumed_partial(&self) -> Option<usize> {
        self.operands.iter().find_map(|operand| match operand {
            Operand::Partial(j) => Some(*j),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulationPlan {
    arity: KernelArity,
    input_count: usize,
    steps: Vec<LaunchStep>,
}

impl AccumulationPlan {
    /// Builds the launch chain summing `input_count` inputs with `arity`-operand launches.
    pub fn new(input_count: usize, arity: KernelArity) -> AccumulatorResult<Self> {
        if input_count < 2 {
            return Err(AccumulatorError::InsufficientInputs { count: input_count });
        }

        let width = arity.operands();
        let launch_count = arity.launches_for(input_count);
        let mut steps = Vec::with_capacity(launch_count);
        let mut next_input = 0;

        for index in 0..launch_count {
            let mut operands = Vec::with_capacity(width);
            if index > 0 {
                operands.push(Operand::Partial(index - 1));
            }
            while operands.len() < width && next_input < input_count {
                operands.push(Operand::Input(next_input));
                next_input += 1;
            }
            operands.resize(width, Operand::Zero);

            let output = if index + 1 == launch_count {
                StepOutput::Final
            } else {
                StepOutput::Partial(index)
            };
            steps.push(LaunchStep { operands, output });
        }

        debug_assert_eq!(next_input, input_count);

        Ok(Self {
            arity,
            input_count,
            steps,
        })
    }

    pub fn arity(&self) -> KernelArity {
        self.arity
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn steps(&self) -> &[LaunchStep] {
        &self.steps
    }

    pub fn launch_count(&self) -> usize {
        self.steps.len()
    }

    /// Whether any launch binds the zero operand.
    pub fn needs_zero_operand(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.operands.contains(&Operand::Zero))
    }

    /// Index of the launch that writes `partial`.
    pub fn producer_of(&self, partial: usize) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step.output == StepOutput::Partial(partial))
    }

    /// Index of the launch that reads `partial`.
    pub fn consumer_of(&self, partial: usize) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step.operands.contains(&Operand::Partial(partial)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_counts() {
        assert_eq!(KernelArity::Binary.launches_for(0), 0);
        assert_eq!(KernelArity::Binary.launches_for(1), 0);
        assert_eq!(KernelArity::Binary.launches_for(2), 1);
        assert_eq!(KernelArity::Binary.launches_for(4), 3);
        assert_eq!(KernelArity::Ternary.launches_for(2), 1);
        assert_eq!(KernelArity::Ternary.launches_for(3), 1);
        assert_eq!(KernelArity::Ternary.launches_for(4), 2);
        assert_eq!(KernelArity::Ternary.launches_for(5), 2);
        assert_eq!(KernelArity::Ternary.launches_for(6), 3);
    }

    #[test]
    fn test_four_inputs_binary_chain() {
        let plan = AccumulationPlan::new(4, KernelArity::Binary).unwrap();

        assert_eq!(
            plan.steps(),
            &[
                LaunchStep {
                    operands: vec![Operand::Input(0), Operand::Input(1)],
                    output: StepOutput::Partial(0),
                },
                LaunchStep {
                    operands: vec![Operand::Partial(0), Operand::Input(2)],
                    output: StepOutput::Partial(1),
                },
                LaunchStep {
                    operands: vec![Operand::Partial(1), Operand::Input(3)],
                    output: StepOutput::Final,
                },
            ]
        );
        assert!(!plan.needs_zero_operand());
    }

    #[test]
    fn test_three_inputs_single_ternary_launch() {
        let plan = AccumulationPlan::new(3, KernelArity::Ternary).unwrap();

        assert_eq!(plan.launch_count(), 1);
        assert_eq!(
            plan.steps()[0].operands,
            vec![Operand::Input(0), Operand::Input(1), Operand::Input(2)]
        );
        assert_eq!(plan.steps()[0].output, StepOutput::Final);
    }

    #[test]
    fn test_ternary_pads_with_zero_operand() {
        let plan = AccumulationPlan::new(4, KernelArity::Ternary).unwrap();

        assert_eq!(plan.launch_count(), 2);
        assert_eq!(
            plan.steps()[1].operands,
            vec![Operand::Partial(0), Operand::Input(3), Operand::Zero]
        );
        assert!(plan.needs_zero_operand());

        let pair = AccumulationPlan::new(2, KernelArity::Ternary).unwrap();
        assert_eq!(
            pair.steps()[0].operands,
            vec![Operand::Input(0), Operand::Input(1), Operand::Zero]
        );
    }

    #[test]
    fn test_partials_have_single_producer_and_consumer() {
        for arity in [KernelArity::Binary, KernelArity::Ternary] {
            for inputs in 2..12 {
                let plan = AccumulationPlan::new(inputs, arity).unwrap();
                let last = plan.launch_count() - 1;

                for j in 0..last {
                    assert_eq!(plan.producer_of(j), Some(j));
                    assert_eq!(plan.consumer_of(j), Some(j + 1));
                    assert_eq!(plan.steps()[j + 1].consumed_partial(), Some(j));
                }
                assert_eq!(plan.steps()[last].output, StepOutput::Final);
                assert_eq!(plan.steps()[0].consumed_partial(), None);

                let mut seen: Vec<usize> = plan
                    .steps()
                    .iter()
                    .flat_map(|s| s.operands.iter())
                    .filter_map(|o| match o {
                        Operand::Input(i) => Some(*i),
                        _ => None,
                    })
                    .collect();
                seen.sort_unstable();
                assert_eq!(seen, (0..inputs).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_insufficient_inputs() {
        assert!(matches!(
            AccumulationPlan::new(1, KernelArity::Binary),
            Err(AccumulatorError::InsufficientInputs { count: 1 })
        ));
        assert!(matches!(
            AccumulationPlan::new(0, KernelArity::Ternary),
            Err(AccumulatorError::InsufficientInputs { count: 0 })
        ));
    }
}
