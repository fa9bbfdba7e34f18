//! Constraint-based element scanning.

pub mod constraint;
pub mod pattern;
mod scalar;
pub mod scanner;
pub mod value;
mod vector;

pub use constraint::{BinaryOp, Constraint, ConstraintKind, ScanOperand};
pub use pattern::BytePattern;
pub use scanner::{ScanRequest, scan};
pub use value::{ElementType, NumericValue};
