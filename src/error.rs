//! Typed errors for structural failures.
//!
//! Recoverable failures (a single region becoming unreadable mid-scan) are
//! absorbed where they happen and never surface as errors. The enums here
//! cover the failures that must reach the caller with their kind intact:
//! malformed constraints and duplicate in-flight task identifiers. Both are
//! propagated through `anyhow` and stay downcastable.

use std::error::Error;
use std::fmt;

/// Construction-time validation failures for a scan constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    /// The leaf kind requires an operand but none was supplied.
    MissingOperand { kind: &'static str },
    /// The leaf kind takes no operand but one was supplied.
    UnexpectedOperand { kind: &'static str },
    /// The operand's value kind does not match the scan element type.
    OperandKindMismatch { expected: &'static str, actual: &'static str },
    /// Byte pattern and mask differ in length.
    PatternLengthMismatch { pattern: usize, mask: usize },
    /// Empty byte pattern.
    EmptyPattern,
    /// A hex pattern string failed to parse.
    InvalidPattern { detail: String },
    /// A relative constraint (Changed/Unchanged/delta) was requested against
    /// a snapshot that cannot compare generations.
    IncomparableSnapshot,
    /// The element type cannot be scanned with this constraint kind.
    UnsupportedElementType { kind: &'static str, element_type: &'static str },
}

impl fmt::Display for ConstraintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintError::MissingOperand { kind } => {
                write!(f, "constraint kind {kind} requires an operand")
            },
            ConstraintError::UnexpectedOperand { kind } => {
                write!(f, "constraint kind {kind} takes no operand")
            },
            ConstraintError::OperandKindMismatch { expected, actual } => {
                write!(f, "operand kind mismatch: expected {expected}, got {actual}")
            },
            ConstraintError::PatternLengthMismatch { pattern, mask } => {
                write!(f, "pattern length {pattern} does not match mask length {mask}")
            },
            ConstraintError::EmptyPattern => write!(f, "byte pattern is empty"),
            ConstraintError::InvalidPattern { detail } => {
                write!(f, "invalid byte pattern: {detail}")
            },
            ConstraintError::IncomparableSnapshot => {
                write!(f, "snapshot has no previous values to compare against")
            },
            ConstraintError::UnsupportedElementType { kind, element_type } => {
                write!(f, "constraint kind {kind} does not support element type {element_type}")
            },
        }
    }
}

impl Error for ConstraintError {}

/// Failures issuing a trackable task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A task with the same identifier is still in flight. The new request
    /// is rejected immediately, never queued.
    Conflict { identifier: String },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Conflict { identifier } => {
                write!(f, "a task with identifier '{identifier}' is already in flight")
            },
        }
    }
}

impl Error for TaskError {}
