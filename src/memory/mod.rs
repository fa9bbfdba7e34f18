//! Boundary traits toward the process-attachment collaborator.
//!
//! This crate never attaches to or enumerates processes itself. The opened
//! process arrives behind two narrow interfaces: raw byte read/write at an
//! address, and enumeration of committed readable memory ranges. Everything
//! above (snapshots, scanners, pointer scans) is written against these
//! traits so tests can substitute an in-process mock.

use anyhow::Result;

#[cfg(test)]
pub mod mock;

/// Raw byte access into the target process.
pub trait MemoryAccess: Send + Sync {
    /// Reads `buf.len()` bytes starting at `address`. A failed read leaves
    /// `buf` in an unspecified state.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `bytes` starting at `address`.
    fn write(&self, address: u64, bytes: &[u8]) -> Result<()>;
}

/// Which memory ranges to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionFilter {
    /// Every committed, readable range.
    All,
    /// Heap / anonymous allocations only.
    Heaps,
    /// Module image (static) ranges only.
    Modules,
}

/// Page protection of an enumerated range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Protection {
    pub const fn read_write() -> Self {
        Self { read: true, write: true, execute: false }
    }

    pub const fn read_execute() -> Self {
        Self { read: true, write: false, execute: true }
    }

    pub fn is_readable(&self) -> bool {
        self.read
    }
}

/// One committed memory range as reported by the enumerator.
#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub base: u64,
    pub size: usize,
    pub protection: Protection,
    /// Module backing this range, if any. Set for `Modules` ranges.
    pub module_name: Option<String>,
}

impl RegionInfo {
    pub fn end(&self) -> u64 {
        self.base + self.size as u64
    }
}

/// Enumeration of the target's committed readable ranges.
pub trait RegionEnumerator: Send + Sync {
    fn list_regions(&self, filter: RegionFilter) -> Result<Vec<RegionInfo>>;
}
