//! Single-element constraint evaluation.
//!
//! The scalar strategy is the correctness reference: the vectorized scanner
//! falls back to these exact functions for mixed chunks, so the two
//! strategies agree by construction wherever they overlap.

use crate::scan::constraint::{BinaryOp, Constraint, ConstraintKind, ScanOperand};
use crate::scan::value::{ElementType, NumericValue};
use crate::snapshot::SnapshotRegion;

/// Evaluates a full constraint tree against one element. Binary nodes
/// evaluate lazily left-to-right: And stops on a false left child, Or on a
/// true one; Xor always evaluates both.
pub(crate) fn eval_constraint(constraint: &Constraint, element_type: ElementType, current: &[u8], previous: Option<&[u8]>) -> bool {
    match constraint {
        Constraint::Binary { op, left, right } => {
            let left_result = eval_constraint(left, element_type, current, previous);
            match op {
                BinaryOp::And => left_result && eval_constraint(right, element_type, current, previous),
                BinaryOp::Or => left_result || eval_constraint(right, element_type, current, previous),
                BinaryOp::Xor => left_result ^ eval_constraint(right, element_type, current, previous),
            }
        },
        Constraint::Leaf { kind, operand } => eval_leaf(*kind, operand.as_ref(), element_type, current, previous),
    }
}

/// Evaluates one leaf against one element's byte views.
pub(crate) fn eval_leaf(
    kind: ConstraintKind,
    operand: Option<&ScanOperand>,
    element_type: ElementType,
    current: &[u8],
    previous: Option<&[u8]>,
) -> bool {
    match kind {
        // Byte-wise between generations; false without a previous value.
        ConstraintKind::Changed => previous.map(|prev| prev != current).unwrap_or(false),
        ConstraintKind::Unchanged => previous == Some(current),
        _ => match operand {
            Some(ScanOperand::Pattern(pattern)) => {
                let matched = current.len() == pattern.len() && pattern.matches(current);
                match kind {
                    ConstraintKind::Equal => matched,
                    ConstraintKind::NotEqual => !matched,
                    // Ruled out at validation.
                    _ => false,
                }
            },
            Some(ScanOperand::Value(operand)) => eval_value_leaf(kind, operand, element_type, current, previous),
            // Ruled out at validation.
            None => false,
        },
    }
}

fn eval_value_leaf(kind: ConstraintKind, operand: &NumericValue, element_type: ElementType, current: &[u8], previous: Option<&[u8]>) -> bool {
    let Some(current) = NumericValue::from_le_bytes(element_type, current) else {
        return false;
    };

    match kind {
        ConstraintKind::Equal => current.matches_equal(operand),
        ConstraintKind::NotEqual => !current.matches_equal(operand),
        ConstraintKind::GreaterThan => current.compare(operand) == Some(std::cmp::Ordering::Greater),
        ConstraintKind::GreaterOrEqual => {
            matches!(current.compare(operand), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))
        },
        ConstraintKind::LessThan => current.compare(operand) == Some(std::cmp::Ordering::Less),
        ConstraintKind::LessOrEqual => {
            matches!(current.compare(operand), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))
        },
        ConstraintKind::IncreasedBy => delta_matches(&current, operand, element_type, previous, false),
        ConstraintKind::DecreasedBy => delta_matches(&current, operand, element_type, previous, true),
        ConstraintKind::Changed | ConstraintKind::Unchanged => unreachable!("handled by caller"),
    }
}

// IncreasedBy: current - previous == x; DecreasedBy: previous - current == x.
// Both saturate rather than overflow.
fn delta_matches(current: &NumericValue, operand: &NumericValue, element_type: ElementType, previous: Option<&[u8]>, decreased: bool) -> bool {
    let Some(previous) = previous.and_then(|bytes| NumericValue::from_le_bytes(element_type, bytes)) else {
        return false;
    };
    let delta = if decreased {
        previous.saturating_sub(current)
    } else {
        current.saturating_sub(&previous)
    };
    delta.map(|delta| delta.matches_equal(operand)).unwrap_or(false)
}

/// Scans every element of a region one at a time, coalescing passing
/// elements into `(start_index, len)` runs.
pub(crate) fn scan_region_scalar(region: &SnapshotRegion, constraint: &Constraint, element_type: ElementType) -> Vec<(usize, usize)> {
    let mut runs = RunEncoder::new();
    let count = region.element_count();
    for index in 0..count {
        let passed = region.is_element_valid(index)
            && match region.current_element(index) {
                Some(current) => eval_constraint(constraint, element_type, current, region.previous_element(index)),
                None => false,
            };
        runs.push(index, passed);
    }
    runs.finish()
}

/// Lazy run-length encoding of passing element indexes.
pub(crate) struct RunEncoder {
    runs: Vec<(usize, usize)>,
    start: usize,
    len: usize,
}

impl RunEncoder {
    pub(crate) fn new() -> Self {
        Self { runs: Vec::new(), start: 0, len: 0 }
    }

    pub(crate) fn push(&mut self, index: usize, passed: bool) {
        if passed {
            if self.len == 0 {
                self.start = index;
            }
            self.len += 1;
        } else {
            self.flush();
        }
    }

    /// Extends the pending run by `count` consecutive passing elements
    /// starting at `index`.
    pub(crate) fn push_run(&mut self, index: usize, count: usize) {
        if count == 0 {
            return;
        }
        if self.len == 0 {
            self.start = index;
        }
        self.len += count;
    }

    pub(crate) fn flush(&mut self) {
        if self.len > 0 {
            self.runs.push((self.start, self.len));
            self.len = 0;
        }
    }

    pub(crate) fn finish(mut self) -> Vec<(usize, usize)> {
        self.flush();
        self.runs
    }
}
