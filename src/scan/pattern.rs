//! Byte-pattern parsing for array-of-bytes scans.
//!
//! Supported format: `"1A 2B ?C D? ?? FF"`
//! - full byte: `1A`, `FF`
//! - high-nibble wildcard: `?A`
//! - low-nibble wildcard: `D?`
//! - full wildcard: `??`

use crate::error::ConstraintError;

/// A byte pattern plus an equal-length mask. Only masked-in bits take part
/// in comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePattern {
    pub bytes: Vec<u8>,
    pub mask: Vec<u8>,
}

impl BytePattern {
    /// Builds a pattern from raw bytes and mask. Lengths must match and be
    /// non-empty.
    pub fn new(bytes: Vec<u8>, mask: Vec<u8>) -> Result<Self, ConstraintError> {
        if bytes.is_empty() {
            return Err(ConstraintError::EmptyPattern);
        }
        if bytes.len() != mask.len() {
            return Err(ConstraintError::PatternLengthMismatch {
                pattern: bytes.len(),
                mask: mask.len(),
            });
        }
        Ok(Self { bytes, mask })
    }

    /// Exact pattern: every byte fully masked in.
    pub fn exact(bytes: Vec<u8>) -> Result<Self, ConstraintError> {
        let mask = vec![0xFF; bytes.len()];
        Self::new(bytes, mask)
    }

    /// Parses a hex pattern string with nibble wildcards.
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ConstraintError::EmptyPattern);
        }

        let mut bytes = Vec::new();
        let mut mask = Vec::new();
        for part in input.split_whitespace() {
            let mut chars = part.chars();
            let (high, low) = match (chars.next(), chars.next(), chars.next()) {
                (Some(high), Some(low), None) => (high, low),
                _ => {
                    return Err(ConstraintError::InvalidPattern {
                        detail: format!("byte '{part}' must be exactly 2 characters"),
                    });
                },
            };
            let (high_val, high_mask) = parse_nibble(high)?;
            let (low_val, low_mask) = parse_nibble(low)?;
            bytes.push((high_val << 4) | low_val);
            mask.push((high_mask << 4) | low_mask);
        }

        Self::new(bytes, mask)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when the first byte must match exactly, enabling an anchored
    /// (memchr) search.
    pub fn has_exact_anchor(&self) -> bool {
        self.mask.first() == Some(&0xFF)
    }

    /// Masked comparison against a window of exactly `len()` bytes.
    pub fn matches(&self, window: &[u8]) -> bool {
        debug_assert_eq!(window.len(), self.bytes.len());
        self.bytes
            .iter()
            .zip(&self.mask)
            .zip(window)
            .all(|((byte, mask), hay)| (hay ^ byte) & mask == 0)
    }
}

// Wildcard nibble gets mask 0: the comparison ignores it.
fn parse_nibble(c: char) -> Result<(u8, u8), ConstraintError> {
    match c {
        '?' => Ok((0, 0)),
        '0'..='9' => Ok((c as u8 - b'0', 0xF)),
        'A'..='F' => Ok((c as u8 - b'A' + 10, 0xF)),
        'a'..='f' => Ok((c as u8 - b'a' + 10, 0xF)),
        _ => Err(ConstraintError::InvalidPattern {
            detail: format!("invalid hex character '{c}'"),
        }),
    }
}
