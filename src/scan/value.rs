//! Scan element types and the closed value union.
//!
//! Element values are resolved once, at scan construction, into a
//! `NumericValue` carrying its own comparison and delta operators; nothing
//! in the hot path dispatches on a late-bound type.

use std::cmp::Ordering;
use std::fmt;

/// Numeric interpretation of a scan element. `Bytes` is the variable-length
/// array-of-bytes interpretation driven by a pattern+mask operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bytes,
}

impl ElementType {
    /// Fixed element width, or `None` for the variable-length `Bytes` type.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            ElementType::I8 | ElementType::U8 => Some(1),
            ElementType::I16 | ElementType::U16 => Some(2),
            ElementType::I32 | ElementType::U32 | ElementType::F32 => Some(4),
            ElementType::I64 | ElementType::U64 | ElementType::F64 => Some(8),
            ElementType::Bytes => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::U64 => "u64",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded element value or scan operand.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bytes(Vec<u8>),
}

impl NumericValue {
    pub fn element_type(&self) -> ElementType {
        match self {
            NumericValue::I8(_) => ElementType::I8,
            NumericValue::I16(_) => ElementType::I16,
            NumericValue::I32(_) => ElementType::I32,
            NumericValue::I64(_) => ElementType::I64,
            NumericValue::U8(_) => ElementType::U8,
            NumericValue::U16(_) => ElementType::U16,
            NumericValue::U32(_) => ElementType::U32,
            NumericValue::U64(_) => ElementType::U64,
            NumericValue::F32(_) => ElementType::F32,
            NumericValue::F64(_) => ElementType::F64,
            NumericValue::Bytes(_) => ElementType::Bytes,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            NumericValue::Bytes(bytes) => bytes.len(),
            other => other.element_type().fixed_size().unwrap_or(0),
        }
    }

    /// Decodes an element from little-endian bytes. Returns `None` when the
    /// slice is shorter than the type's width.
    pub fn from_le_bytes(ty: ElementType, bytes: &[u8]) -> Option<NumericValue> {
        let value = match ty {
            ElementType::I8 => NumericValue::I8(*bytes.first()? as i8),
            ElementType::U8 => NumericValue::U8(*bytes.first()?),
            ElementType::I16 => NumericValue::I16(i16::from_le_bytes(bytes.get(..2)?.try_into().ok()?)),
            ElementType::U16 => NumericValue::U16(u16::from_le_bytes(bytes.get(..2)?.try_into().ok()?)),
            ElementType::I32 => NumericValue::I32(i32::from_le_bytes(bytes.get(..4)?.try_into().ok()?)),
            ElementType::U32 => NumericValue::U32(u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?)),
            ElementType::I64 => NumericValue::I64(i64::from_le_bytes(bytes.get(..8)?.try_into().ok()?)),
            ElementType::U64 => NumericValue::U64(u64::from_le_bytes(bytes.get(..8)?.try_into().ok()?)),
            ElementType::F32 => NumericValue::F32(f32::from_le_bytes(bytes.get(..4)?.try_into().ok()?)),
            ElementType::F64 => NumericValue::F64(f64::from_le_bytes(bytes.get(..8)?.try_into().ok()?)),
            ElementType::Bytes => NumericValue::Bytes(bytes.to_vec()),
        };
        Some(value)
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            NumericValue::I8(v) => vec![*v as u8],
            NumericValue::U8(v) => vec![*v],
            NumericValue::I16(v) => v.to_le_bytes().to_vec(),
            NumericValue::U16(v) => v.to_le_bytes().to_vec(),
            NumericValue::I32(v) => v.to_le_bytes().to_vec(),
            NumericValue::U32(v) => v.to_le_bytes().to_vec(),
            NumericValue::I64(v) => v.to_le_bytes().to_vec(),
            NumericValue::U64(v) => v.to_le_bytes().to_vec(),
            NumericValue::F32(v) => v.to_le_bytes().to_vec(),
            NumericValue::F64(v) => v.to_le_bytes().to_vec(),
            NumericValue::Bytes(v) => v.clone(),
        }
    }

    /// Ordered comparison between same-kind values. `None` for kind
    /// mismatches and NaN comparisons.
    pub fn compare(&self, other: &NumericValue) -> Option<Ordering> {
        use NumericValue::*;
        match (self, other) {
            (I8(a), I8(b)) => Some(a.cmp(b)),
            (I16(a), I16(b)) => Some(a.cmp(b)),
            (I32(a), I32(b)) => Some(a.cmp(b)),
            (I64(a), I64(b)) => Some(a.cmp(b)),
            (U8(a), U8(b)) => Some(a.cmp(b)),
            (U16(a), U16(b)) => Some(a.cmp(b)),
            (U32(a), U32(b)) => Some(a.cmp(b)),
            (U64(a), U64(b)) => Some(a.cmp(b)),
            (F32(a), F32(b)) => a.partial_cmp(b),
            (F64(a), F64(b)) => a.partial_cmp(b),
            (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality with float tolerance, matching how scan operands are
    /// entered by a user (decimal text) rather than bit-exact floats.
    pub fn matches_equal(&self, other: &NumericValue) -> bool {
        use NumericValue::*;
        match (self, other) {
            (F32(a), F32(b)) => (a - b).abs() < f32::EPSILON,
            (F64(a), F64(b)) => (a - b).abs() < f64::EPSILON,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// `self - other`, saturating at the numeric bounds instead of
    /// overflowing. `None` on kind mismatch.
    pub fn saturating_sub(&self, other: &NumericValue) -> Option<NumericValue> {
        use NumericValue::*;
        let value = match (self, other) {
            (I8(a), I8(b)) => I8(a.saturating_sub(*b)),
            (I16(a), I16(b)) => I16(a.saturating_sub(*b)),
            (I32(a), I32(b)) => I32(a.saturating_sub(*b)),
            (I64(a), I64(b)) => I64(a.saturating_sub(*b)),
            (U8(a), U8(b)) => U8(a.saturating_sub(*b)),
            (U16(a), U16(b)) => U16(a.saturating_sub(*b)),
            (U32(a), U32(b)) => U32(a.saturating_sub(*b)),
            (U64(a), U64(b)) => U64(a.saturating_sub(*b)),
            (F32(a), F32(b)) => F32(a - b),
            (F64(a), F64(b)) => F64(a - b),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_le_bytes() {
        let value = NumericValue::from_le_bytes(ElementType::U32, &0xDEADBEEFu32.to_le_bytes()).unwrap();
        assert_eq!(value, NumericValue::U32(0xDEADBEEF));
        assert_eq!(value.to_le_bytes(), 0xDEADBEEFu32.to_le_bytes().to_vec());

        assert!(NumericValue::from_le_bytes(ElementType::U64, &[1, 2, 3]).is_none());
    }

    #[test]
    fn ordered_comparison_respects_sign() {
        let a = NumericValue::I32(-5);
        let b = NumericValue::I32(3);
        assert_eq!(a.compare(&b), Some(Ordering::Less));

        // Same bytes interpreted unsigned order the other way.
        let a = NumericValue::U32(-5i32 as u32);
        let b = NumericValue::U32(3);
        assert_eq!(a.compare(&b), Some(Ordering::Greater));
    }

    #[test]
    fn kind_mismatch_is_not_comparable() {
        assert_eq!(NumericValue::I32(1).compare(&NumericValue::U32(1)), None);
        assert_eq!(NumericValue::I32(1).saturating_sub(&NumericValue::F32(1.0)), None);
    }

    #[test]
    fn delta_saturates_instead_of_overflowing() {
        let min = NumericValue::I8(i8::MIN);
        let one = NumericValue::I8(1);
        assert_eq!(min.saturating_sub(&one), Some(NumericValue::I8(i8::MIN)));

        let zero = NumericValue::U16(0);
        let one = NumericValue::U16(1);
        assert_eq!(zero.saturating_sub(&one), Some(NumericValue::U16(0)));
    }

    #[test]
    fn float_equality_uses_tolerance() {
        let a = NumericValue::F32(0.1 + 0.2);
        let b = NumericValue::F32(0.3);
        assert!(a.matches_equal(&b));
    }
}
