//! Constraint trees: boolean expressions over element comparisons.
//!
//! Leaves compare one element's current (and where applicable previous)
//! bytes; binary nodes combine child results with And/Or/Xor. Trees are
//! validated against the scan element type at construction, so a malformed
//! constraint can never fail mid-scan.

use crate::error::ConstraintError;
use crate::scan::pattern::BytePattern;
use crate::scan::value::{ElementType, NumericValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Changed,
    Unchanged,
    IncreasedBy,
    DecreasedBy,
}

impl ConstraintKind {
    pub fn requires_operand(&self) -> bool {
        !matches!(self, ConstraintKind::Changed | ConstraintKind::Unchanged)
    }

    /// Relative kinds compare against the previous value generation.
    pub fn is_relative(&self) -> bool {
        matches!(
            self,
            ConstraintKind::Changed | ConstraintKind::Unchanged | ConstraintKind::IncreasedBy | ConstraintKind::DecreasedBy
        )
    }

    /// Ordered kinds need a numeric interpretation, which the
    /// array-of-bytes type does not have.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            ConstraintKind::GreaterThan | ConstraintKind::GreaterOrEqual | ConstraintKind::LessThan | ConstraintKind::LessOrEqual
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::Equal => "Equal",
            ConstraintKind::NotEqual => "NotEqual",
            ConstraintKind::GreaterThan => "GreaterThan",
            ConstraintKind::GreaterOrEqual => "GreaterOrEqual",
            ConstraintKind::LessThan => "LessThan",
            ConstraintKind::LessOrEqual => "LessOrEqual",
            ConstraintKind::Changed => "Changed",
            ConstraintKind::Unchanged => "Unchanged",
            ConstraintKind::IncreasedBy => "IncreasedBy",
            ConstraintKind::DecreasedBy => "DecreasedBy",
        }
    }
}

/// The operand of a leaf: a typed scalar, or a byte pattern with mask.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOperand {
    Value(NumericValue),
    Pattern(BytePattern),
}

impl ScanOperand {
    fn kind_name(&self) -> &'static str {
        match self {
            ScanOperand::Value(value) => value.element_type().name(),
            ScanOperand::Pattern(_) => "bytes",
        }
    }
}

/// An immutable boolean expression tree. Owned by the scan invocation that
/// built it.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Leaf {
        kind: ConstraintKind,
        operand: Option<ScanOperand>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Constraint>,
        right: Box<Constraint>,
    },
}

impl Constraint {
    pub fn leaf(kind: ConstraintKind, operand: Option<ScanOperand>) -> Self {
        Constraint::Leaf { kind, operand }
    }

    pub fn equal(value: NumericValue) -> Self {
        Self::leaf(ConstraintKind::Equal, Some(ScanOperand::Value(value)))
    }

    pub fn not_equal(value: NumericValue) -> Self {
        Self::leaf(ConstraintKind::NotEqual, Some(ScanOperand::Value(value)))
    }

    pub fn greater_than(value: NumericValue) -> Self {
        Self::leaf(ConstraintKind::GreaterThan, Some(ScanOperand::Value(value)))
    }

    pub fn greater_or_equal(value: NumericValue) -> Self {
        Self::leaf(ConstraintKind::GreaterOrEqual, Some(ScanOperand::Value(value)))
    }

    pub fn less_than(value: NumericValue) -> Self {
        Self::leaf(ConstraintKind::LessThan, Some(ScanOperand::Value(value)))
    }

    pub fn less_or_equal(value: NumericValue) -> Self {
        Self::leaf(ConstraintKind::LessOrEqual, Some(ScanOperand::Value(value)))
    }

    pub fn changed() -> Self {
        Self::leaf(ConstraintKind::Changed, None)
    }

    pub fn unchanged() -> Self {
        Self::leaf(ConstraintKind::Unchanged, None)
    }

    pub fn increased_by(value: NumericValue) -> Self {
        Self::leaf(ConstraintKind::IncreasedBy, Some(ScanOperand::Value(value)))
    }

    pub fn decreased_by(value: NumericValue) -> Self {
        Self::leaf(ConstraintKind::DecreasedBy, Some(ScanOperand::Value(value)))
    }

    pub fn pattern_equal(pattern: BytePattern) -> Self {
        Self::leaf(ConstraintKind::Equal, Some(ScanOperand::Pattern(pattern)))
    }

    pub fn pattern_not_equal(pattern: BytePattern) -> Self {
        Self::leaf(ConstraintKind::NotEqual, Some(ScanOperand::Pattern(pattern)))
    }

    pub fn and(left: Constraint, right: Constraint) -> Self {
        Constraint::Binary {
            op: BinaryOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Constraint, right: Constraint) -> Self {
        Constraint::Binary {
            op: BinaryOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn xor(left: Constraint, right: Constraint) -> Self {
        Constraint::Binary {
            op: BinaryOp::Xor,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// True when any leaf needs the previous value generation.
    pub fn requires_previous(&self) -> bool {
        match self {
            Constraint::Leaf { kind, .. } => kind.is_relative(),
            Constraint::Binary { left, right, .. } => left.requires_previous() || right.requires_previous(),
        }
    }

    /// Construction-time validation against the scan element type.
    pub fn validate(&self, element_type: ElementType) -> Result<(), ConstraintError> {
        match self {
            Constraint::Binary { left, right, .. } => {
                left.validate(element_type)?;
                right.validate(element_type)
            },
            Constraint::Leaf { kind, operand } => Self::validate_leaf(*kind, operand.as_ref(), element_type),
        }
    }

    fn validate_leaf(kind: ConstraintKind, operand: Option<&ScanOperand>, element_type: ElementType) -> Result<(), ConstraintError> {
        match operand {
            None => {
                if kind.requires_operand() {
                    return Err(ConstraintError::MissingOperand { kind: kind.name() });
                }
                Ok(())
            },
            Some(_) if !kind.requires_operand() => Err(ConstraintError::UnexpectedOperand { kind: kind.name() }),
            Some(ScanOperand::Value(value)) => {
                if element_type == ElementType::Bytes {
                    return Err(ConstraintError::OperandKindMismatch {
                        expected: "bytes",
                        actual: value.element_type().name(),
                    });
                }
                if value.element_type() != element_type {
                    return Err(ConstraintError::OperandKindMismatch {
                        expected: element_type.name(),
                        actual: value.element_type().name(),
                    });
                }
                Ok(())
            },
            Some(operand @ ScanOperand::Pattern(pattern)) => {
                if element_type != ElementType::Bytes {
                    return Err(ConstraintError::OperandKindMismatch {
                        expected: element_type.name(),
                        actual: operand.kind_name(),
                    });
                }
                if !matches!(kind, ConstraintKind::Equal | ConstraintKind::NotEqual) {
                    return Err(ConstraintError::UnsupportedElementType {
                        kind: kind.name(),
                        element_type: "bytes",
                    });
                }
                // BytePattern construction already enforces the length
                // invariants; re-check in case the fields were built by hand.
                if pattern.bytes.is_empty() {
                    return Err(ConstraintError::EmptyPattern);
                }
                if pattern.bytes.len() != pattern.mask.len() {
                    return Err(ConstraintError::PatternLengthMismatch {
                        pattern: pattern.bytes.len(),
                        mask: pattern.mask.len(),
                    });
                }
                Ok(())
            },
        }
    }
}
