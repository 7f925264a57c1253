//! CPU reference computation and tolerance checks.
//!
//! An element matches its reference when:
//! - both are NaN, or
//! - they are equal (this covers equal infinities), or
//! - the reference is exactly zero and the absolute error is below
//!   `tolerance.absolute`, or
//! - the relative error is below `tolerance.relative`.
//!
//! Relative error is undefined at a zero reference, hence the absolute check
//! there.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::errors::{VerificationError, VerificationResult};

/// Default relative tolerance for element checks.
pub const DEFAULT_RELATIVE_TOLERANCE: f32 = 0.001;

/// Absolute tolerance applied where the reference value is zero.
pub const DEFAULT_ABSOLUTE_TOLERANCE: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    pub relative: f32,
    pub absolute: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            relative: DEFAULT_RELATIVE_TOLERANCE,
            absolute: DEFAULT_ABSOLUTE_TOLERANCE,
        }
    }
}

impl Tolerance {
    pub fn validate(&self) -> VerificationResult<()> {
        for (kind, value) in [("relative", self.relative), ("absolute", self.absolute)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(VerificationError::InvalidTolerance { kind, value });
            }
        }
        Ok(())
    }
}

/// Which check an element failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMeasure {
    Relative,
    Absolute,
    /// Exactly one side is NaN.
    NotANumber,
}

/// An element whose computed value deviates from the reference beyond tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub expected: f32,
    pub actual: f32,
    pub error: f32,
    pub measure: ErrorMeasure,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationReport {
    pub checked: usize,
    pub correct: usize,
    pub mismatches: Vec<Mismatch>,
}

impl VerificationReport {
    pub fn is_match(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn mismatched_indices(&self) -> Vec<usize> {
        self.mismatches.iter().map(|m| m.index).collect()
    }
}

/// Elementwise sum of `inputs`, added left to right on the CPU.
///
/// The result has the first input's length; an empty vector for no inputs.
pub fn reference_sum<V: AsRef<[f32]>>(inputs: &[V]) -> Vec<f32> {
    let Some((first, rest)) = inputs.split_first() else {
        return Vec::new();
    };
    let mut sum = first.as_ref().to_vec();
    for input in rest {
        for (acc, value) in sum.iter_mut().zip(input.as_ref()) {
            *acc += value;
        }
    }
    sum
}

/// Compares one element, returning the mismatch if it is out of tolerance.
pub fn check_element(
    index: usize,
    actual: f32,
    expected: f32,
    tolerance: &Tolerance,
) -> Option<Mismatch> {
    let mismatch = |error, measure| {
        Some(Mismatch {
            index,
            expected,
            actual,
            error,
            measure,
        })
    };

    match (expected.is_nan(), actual.is_nan()) {
        (true, true) => return None,
        (true, false) | (false, true) => return mismatch(f32::NAN, ErrorMeasure::NotANumber),
        (false, false) => {}
    }
    if actual == expected {
        return None;
    }

    if expected == 0.0 {
        let error = (actual - expected).abs();
        if error < tolerance.absolute {
            None
        } else {
            mismatch(error, ErrorMeasure::Absolute)
        }
    } else {
        let error = ((actual - expected) / expected).abs();
        if error < tolerance.relative {
            None
        } else {
            mismatch(error, ErrorMeasure::Relative)
        }
    }
}

/// Compares `actual` against `expected` elementwise.
pub fn verify(
    actual: &[f32],
    expected: &[f32],
    tolerance: &Tolerance,
) -> VerificationResult<VerificationReport> {
    if actual.len() != expected.len() {
        return Err(VerificationError::LengthMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }
    tolerance.validate()?;

    let mismatches: Vec<Mismatch> = actual
        .iter()
        .zip(expected)
        .enumerate()
        .filter_map(|(index, (&a, &e))| check_element(index, a, e, tolerance))
        .collect();

    for m in &mismatches {
        warn!(
            "Index {} is wrong: expected {}, got {} ({:?} error {})",
            m.index, m.expected, m.actual, m.measure, m.error
        );
    }

    Ok(VerificationReport {
        checked: actual.len(),
        correct: actual.len() - mismatches.len(),
        mismatches,
    })
}
