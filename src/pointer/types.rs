//! Pointer-scan data model: configuration, trace levels, and discovered
//! chains.

use std::collections::HashMap;

use anyhow::Result;

use crate::memory::{MemoryAccess, RegionInfo};
use crate::snapshot::Snapshot;

/// Values below this are never plausible pointers; filtering them shrinks
/// the pool substantially.
pub const DEFAULT_MIN_POINTER_VALUE: u64 = 0x10000;

/// Width of the pointers being chased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerSize {
    Four,
    Eight,
}

impl PointerSize {
    pub fn width(self) -> usize {
        match self {
            PointerSize::Four => 4,
            PointerSize::Eight => 8,
        }
    }

    /// Decodes one little-endian pointer from the front of `bytes`.
    pub fn decode(self, bytes: &[u8]) -> u64 {
        match self {
            PointerSize::Four => u32::from_le_bytes(bytes[..4].try_into().unwrap()) as u64,
            PointerSize::Eight => u64::from_le_bytes(bytes[..8].try_into().unwrap()),
        }
    }

    pub fn read(self, memory: &dyn MemoryAccess, address: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        let width = self.width();
        memory.read(address, &mut buf[..width])?;
        Ok(self.decode(&buf))
    }
}

/// Parameters for a pointer scan.
#[derive(Debug, Clone, Copy)]
pub struct PointerScanConfig {
    /// Address the chains must reach.
    pub target_address: u64,
    /// Maximum chain depth (number of dereferences).
    pub max_depth: usize,
    /// Search radius per level in bytes.
    pub max_offset: u64,
    /// Source address alignment.
    pub alignment: u64,
    pub pointer_size: PointerSize,
    /// Pool plausibility floor. A heuristic, so it is a knob rather than a
    /// constant.
    pub min_pointer_value: u64,
}

impl PointerScanConfig {
    pub fn new(target_address: u64) -> Self {
        Self {
            target_address,
            max_depth: 3,
            max_offset: 0x1000,
            alignment: 4,
            pointer_size: PointerSize::Eight,
            min_pointer_value: DEFAULT_MIN_POINTER_VALUE,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.max_offset = offset;
        self
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_pointer_size(mut self, pointer_size: PointerSize) -> Self {
        self.pointer_size = pointer_size;
        self
    }

    pub fn with_min_pointer_value(mut self, floor: u64) -> Self {
        self.min_pointer_value = floor;
        self
    }
}

/// One trace level: accepted source address to the pointer value stored
/// there. Level 0 holds only the target itself.
#[derive(Debug, Clone, Default)]
pub struct Level {
    pub candidates: HashMap<u64, u64>,
}

impl Level {
    /// The level-0 sentinel for a target address.
    pub fn target(address: u64) -> Self {
        let mut candidates = HashMap::with_capacity(1);
        candidates.insert(address, 0);
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// A discovered chain: a static base plus the signed offsets applied
/// between dereferences. Depth-1 chains carry no offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    pub base_address: u64,
    /// Module owning the base, when one does.
    pub module_name: Option<String>,
    /// Disambiguates modules loaded more than once under the same name.
    pub module_index: u32,
    pub module_offset: u64,
    pub offsets: Vec<i32>,
}

impl Pointer {
    pub fn depth(&self) -> usize {
        self.offsets.len() + 1
    }

    /// Renders like `libgame.so[0]+0x1A2B3C->+0x18->-0x20`, falling back to
    /// the raw base address outside any module.
    pub fn format(&self) -> String {
        let mut out = String::with_capacity(64);
        match &self.module_name {
            Some(name) => {
                out.push_str(name);
                out.push_str(&format!("[{}]+0x{:X}", self.module_index, self.module_offset));
            },
            None => out.push_str(&format!("0x{:X}", self.base_address)),
        }
        for &offset in &self.offsets {
            if offset >= 0 {
                out.push_str(&format!("->+0x{:X}", offset));
            } else {
                out.push_str(&format!("->-0x{:X}", offset.unsigned_abs()));
            }
        }
        out
    }

    /// Chases the chain through live memory: dereference the base, then
    /// apply and dereference each offset in turn. Returns the final
    /// destination address.
    pub fn resolve(&self, memory: &dyn MemoryAccess, pointer_size: PointerSize) -> Result<u64> {
        let mut destination = pointer_size.read(memory, self.base_address)?;
        for &offset in &self.offsets {
            destination = pointer_size.read(memory, destination.wrapping_add_signed(offset as i64))?;
        }
        Ok(destination)
    }
}

/// The full replayable result of a pointer scan. Levels are retained so
/// rebase and retarget can re-run without re-tracing from scratch.
#[derive(Debug, Clone)]
pub struct PointerBag {
    pub levels: Vec<Level>,
    /// Module image regions accepted as chain roots.
    pub static_bases: Snapshot,
    /// Module metadata for naming chain roots.
    pub modules: Vec<RegionInfo>,
    pub pointers: Vec<Pointer>,
    pub config: PointerScanConfig,
}

impl PointerBag {
    pub fn chain_count(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }
}
