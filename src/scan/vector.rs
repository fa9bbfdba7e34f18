//! Chunked constraint evaluation for densely packed regions.
//!
//! Regions whose alignment equals their element width are scanned 16 bytes
//! at a time. Each chunk produces a lane mask (one bit per element), with
//! whole-word fast paths for equality and change detection and a per-lane
//! fallback for everything else. The fallback calls into the scalar
//! evaluator, so mixed chunks cannot diverge from the reference strategy.

use crate::scan::constraint::{BinaryOp, Constraint, ConstraintKind, ScanOperand};
use crate::scan::pattern::BytePattern;
use crate::scan::scalar::{self, RunEncoder};
use crate::scan::value::{ElementType, NumericValue};
use crate::snapshot::SnapshotRegion;

pub(crate) const CHUNK_BYTES: usize = 16;

/// True when a region qualifies for the chunked strategy: fixed-width
/// element packed back to back, no partial-validity bitmap.
pub(crate) fn supports_region(region: &SnapshotRegion, element_type: ElementType) -> bool {
    let width = region.element_size();
    element_type.fixed_size() == Some(width)
        && region.alignment() == width
        && CHUNK_BYTES % width == 0
        && region.validity().is_none()
}

/// Scans a dense region chunk by chunk, encoding passing elements as
/// `(start_index, len)` runs. Tail elements past the last full chunk go
/// through the scalar evaluator.
pub(crate) fn scan_region_vector(region: &SnapshotRegion, constraint: &Constraint, element_type: ElementType) -> Vec<(usize, usize)> {
    debug_assert!(supports_region(region, element_type));
    if let Constraint::Leaf {
        kind: ConstraintKind::Equal,
        operand: Some(ScanOperand::Value(value)),
    } = constraint
        && !value.element_type().is_float()
    {
        return scan_region_anchored_equal(region, value);
    }
    let Some(current) = region.current_values() else {
        return Vec::new();
    };
    let previous = region.previous_values();

    let width = region.element_size();
    let lanes = CHUNK_BYTES / width;
    let full = full_mask(lanes);
    let count = region.element_count();
    let node = VectorNode::compile(constraint);

    let mut runs = RunEncoder::new();
    let mut elem = 0;
    let mut offset = 0;
    while elem + lanes <= count && offset + CHUNK_BYTES <= current.len() {
        let cur = &current[offset..offset + CHUNK_BYTES];
        let prev = previous.map(|p| &p[offset..offset + CHUNK_BYTES]);
        let mask = node.eval_chunk(cur, prev, width, lanes, full, element_type);
        if mask == full {
            runs.push_run(elem, lanes);
        } else if mask == 0 {
            runs.flush();
        } else {
            for lane in 0..lanes {
                runs.push(elem + lane, mask & (1 << lane) != 0);
            }
        }
        elem += lanes;
        offset += CHUNK_BYTES;
    }
    for index in elem..count {
        let passed = match region.current_element(index) {
            Some(cur) => scalar::eval_constraint(constraint, element_type, cur, region.previous_element(index)),
            None => false,
        };
        runs.push(index, passed);
    }
    runs.finish()
}

/// Anchor search for integer equality: matches are sparse on a first scan,
/// so jumping between occurrences of the value's first byte beats walking
/// every chunk. Dense regions only, so aligned positions are exactly the
/// width-multiple offsets.
fn scan_region_anchored_equal(region: &SnapshotRegion, value: &NumericValue) -> Vec<(usize, usize)> {
    let Some(current) = region.current_values() else {
        return Vec::new();
    };
    let needle = value.to_le_bytes();
    let width = region.element_size();
    debug_assert_eq!(needle.len(), width);

    let mut runs: Vec<(usize, usize)> = Vec::new();
    for pos in memchr::memchr_iter(needle[0], current) {
        if pos % width != 0 {
            continue;
        }
        if pos + width > current.len() {
            break;
        }
        if current[pos..pos + width] != needle[..] {
            continue;
        }
        let index = pos / width;
        match runs.last_mut() {
            Some((start, len)) if *start + *len == index => *len += 1,
            _ => runs.push((index, 1)),
        }
    }
    runs
}

fn full_mask(lanes: usize) -> u32 {
    (1u32 << lanes) - 1
}

fn chunk_words(bytes: &[u8]) -> [u64; 2] {
    let array: [u8; CHUNK_BYTES] = bytes.try_into().unwrap();
    bytemuck::cast(array)
}

/// Constraint tree compiled for chunk evaluation. Integer equality and
/// generation comparison get precomputed whole-chunk forms; ordered, delta
/// and float comparisons stay per-lane.
enum VectorNode {
    Binary {
        op: BinaryOp,
        left: Box<VectorNode>,
        right: Box<VectorNode>,
    },
    IntEqual {
        broadcast: [u8; CHUNK_BYTES],
        words: [u64; 2],
        negate: bool,
    },
    Generation {
        unchanged: bool,
    },
    PerLane {
        kind: ConstraintKind,
        operand: Option<ScanOperand>,
    },
}

impl VectorNode {
    fn compile(constraint: &Constraint) -> VectorNode {
        match constraint {
            Constraint::Binary { op, left, right } => VectorNode::Binary {
                op: *op,
                left: Box::new(Self::compile(left)),
                right: Box::new(Self::compile(right)),
            },
            Constraint::Leaf { kind, operand } => match (kind, operand) {
                (ConstraintKind::Changed, _) => VectorNode::Generation { unchanged: false },
                (ConstraintKind::Unchanged, _) => VectorNode::Generation { unchanged: true },
                (ConstraintKind::Equal | ConstraintKind::NotEqual, Some(ScanOperand::Value(value)))
                    if !value.element_type().is_float() =>
                {
                    let le = value.to_le_bytes();
                    let mut broadcast = [0u8; CHUNK_BYTES];
                    for chunk in broadcast.chunks_exact_mut(le.len()) {
                        chunk.copy_from_slice(&le);
                    }
                    VectorNode::IntEqual {
                        broadcast,
                        words: bytemuck::cast(broadcast),
                        negate: *kind == ConstraintKind::NotEqual,
                    }
                },
                _ => VectorNode::PerLane {
                    kind: *kind,
                    operand: operand.clone(),
                },
            },
        }
    }

    fn eval_chunk(&self, cur: &[u8], prev: Option<&[u8]>, width: usize, lanes: usize, full: u32, element_type: ElementType) -> u32 {
        match self {
            VectorNode::Binary { op, left, right } => {
                let left_mask = left.eval_chunk(cur, prev, width, lanes, full, element_type);
                match op {
                    BinaryOp::And => {
                        if left_mask == 0 {
                            0
                        } else {
                            left_mask & right.eval_chunk(cur, prev, width, lanes, full, element_type)
                        }
                    },
                    BinaryOp::Or => {
                        if left_mask == full {
                            full
                        } else {
                            left_mask | right.eval_chunk(cur, prev, width, lanes, full, element_type)
                        }
                    },
                    BinaryOp::Xor => left_mask ^ right.eval_chunk(cur, prev, width, lanes, full, element_type),
                }
            },
            VectorNode::IntEqual { broadcast, words, negate } => {
                let cur_words = chunk_words(cur);
                if (cur_words[0] ^ words[0]) | (cur_words[1] ^ words[1]) == 0 {
                    return if *negate { 0 } else { full };
                }
                let mut mask = 0u32;
                for lane in 0..lanes {
                    let span = lane * width..(lane + 1) * width;
                    if (cur[span.clone()] == broadcast[span]) != *negate {
                        mask |= 1 << lane;
                    }
                }
                mask
            },
            VectorNode::Generation { unchanged } => {
                let Some(prev) = prev else {
                    return 0;
                };
                let cur_words = chunk_words(cur);
                let prev_words = chunk_words(prev);
                if (cur_words[0] ^ prev_words[0]) | (cur_words[1] ^ prev_words[1]) == 0 {
                    return if *unchanged { full } else { 0 };
                }
                let mut mask = 0u32;
                for lane in 0..lanes {
                    let span = lane * width..(lane + 1) * width;
                    if (cur[span.clone()] == prev[span]) == *unchanged {
                        mask |= 1 << lane;
                    }
                }
                mask
            },
            VectorNode::PerLane { kind, operand } => {
                let mut mask = 0u32;
                for lane in 0..lanes {
                    let span = lane * width..(lane + 1) * width;
                    let lane_prev = prev.map(|p| &p[span.clone()]);
                    if scalar::eval_leaf(*kind, operand.as_ref(), element_type, &cur[span], lane_prev) {
                        mask |= 1 << lane;
                    }
                }
                mask
            },
        }
    }
}

/// Windowed scan for byte-pattern elements. A single anchored
/// pattern-equality leaf takes the memchr fast path; everything else falls
/// back to per-window scalar evaluation.
pub(crate) fn scan_region_windowed(region: &SnapshotRegion, constraint: &Constraint, element_type: ElementType) -> Vec<(usize, usize)> {
    if let Constraint::Leaf {
        kind: ConstraintKind::Equal,
        operand: Some(ScanOperand::Pattern(pattern)),
    } = constraint
        && pattern.has_exact_anchor()
    {
        return scan_region_anchored(region, pattern);
    }
    scalar::scan_region_scalar(region, constraint, element_type)
}

fn scan_region_anchored(region: &SnapshotRegion, pattern: &BytePattern) -> Vec<(usize, usize)> {
    let Some(current) = region.current_values() else {
        return Vec::new();
    };
    let compiled = CompiledPattern::new(pattern);
    let stride = region.alignment();
    let window = pattern.len();

    let mut runs: Vec<(usize, usize)> = Vec::new();
    for pos in memchr::memchr_iter(pattern.bytes[0], current) {
        if pos % stride != 0 {
            continue;
        }
        if pos + window > current.len() {
            break;
        }
        let index = pos / stride;
        if !region.is_element_valid(index) || !compiled.matches(&current[pos..pos + window]) {
            continue;
        }
        match runs.last_mut() {
            Some((start, len)) if *start + *len == index => *len += 1,
            _ => runs.push((index, 1)),
        }
    }
    runs
}

/// A pattern precomputed into 8-byte words for masked comparison. The final
/// partial word is zero-padded on both the value and the mask side, so
/// padding bytes never participate.
pub(crate) struct CompiledPattern {
    words: Vec<(u64, u64)>,
    len: usize,
}

impl CompiledPattern {
    pub(crate) fn new(pattern: &BytePattern) -> Self {
        let len = pattern.len();
        let mut words = Vec::with_capacity(len.div_ceil(8));
        for start in (0..len).step_by(8) {
            let end = (start + 8).min(len);
            let mut value = [0u8; 8];
            let mut mask = [0u8; 8];
            value[..end - start].copy_from_slice(&pattern.bytes[start..end]);
            mask[..end - start].copy_from_slice(&pattern.mask[start..end]);
            words.push((u64::from_le_bytes(value), u64::from_le_bytes(mask)));
        }
        Self { words, len }
    }

    pub(crate) fn matches(&self, window: &[u8]) -> bool {
        debug_assert_eq!(window.len(), self.len);
        for (i, (value, mask)) in self.words.iter().enumerate() {
            let start = i * 8;
            let end = (start + 8).min(self.len);
            let mut hay = [0u8; 8];
            hay[..end - start].copy_from_slice(&window[start..end]);
            if (u64::from_le_bytes(hay) ^ value) & mask != 0 {
                return false;
            }
        }
        true
    }
}
