//! In-process fake of the memory/region boundary for tests.
//!
//! Backs allocations with plain `Vec<u8>` and lets tests mark individual
//! pages as faulty so the read-failure paths can be exercised without a
//! real target process.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use anyhow::{Result, anyhow};

use super::{MemoryAccess, Protection, RegionEnumerator, RegionFilter, RegionInfo};

pub const MOCK_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AllocationKind {
    Heap,
    Module(String),
}

struct Allocation {
    bytes: Vec<u8>,
    kind: AllocationKind,
    faulty_pages: HashSet<usize>,
}

/// Fake target process memory.
pub struct MockMemory {
    allocations: RwLock<BTreeMap<u64, Allocation>>,
}

impl MockMemory {
    pub fn new() -> Self {
        Self {
            allocations: RwLock::new(BTreeMap::new()),
        }
    }

    /// Maps a zero-filled heap allocation at `base`.
    pub fn alloc_heap(&self, base: u64, size: usize) -> u64 {
        self.alloc(base, size, AllocationKind::Heap)
    }

    /// Maps a zero-filled module image at `base`.
    pub fn alloc_module(&self, base: u64, size: usize, name: &str) -> u64 {
        self.alloc(base, size, AllocationKind::Module(name.to_string()))
    }

    fn alloc(&self, base: u64, size: usize, kind: AllocationKind) -> u64 {
        let mut allocations = self.allocations.write().unwrap();
        allocations.insert(
            base,
            Allocation {
                bytes: vec![0u8; size],
                kind,
                faulty_pages: HashSet::new(),
            },
        );
        base
    }

    /// Marks pages of the allocation at `base` as unreadable.
    pub fn set_faulty_pages(&self, base: u64, pages: &[usize]) {
        let mut allocations = self.allocations.write().unwrap();
        if let Some(alloc) = allocations.get_mut(&base) {
            alloc.faulty_pages.extend(pages.iter().copied());
        }
    }

    pub fn clear_faulty_pages(&self, base: u64) {
        let mut allocations = self.allocations.write().unwrap();
        if let Some(alloc) = allocations.get_mut(&base) {
            alloc.faulty_pages.clear();
        }
    }

    pub fn write_u32(&self, address: u64, value: u32) {
        self.write(address, &value.to_le_bytes()).unwrap();
    }

    pub fn write_u64(&self, address: u64, value: u64) {
        self.write(address, &value.to_le_bytes()).unwrap();
    }

    pub fn read_u64(&self, address: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read(address, &mut buf).unwrap();
        u64::from_le_bytes(buf)
    }

    /// Finds the allocation containing `[address, address + len)` and the
    /// offset into it. The span must not cross allocation boundaries.
    fn locate(allocations: &BTreeMap<u64, Allocation>, address: u64, len: usize) -> Result<(u64, usize)> {
        let (base, alloc) = allocations
            .range(..=address)
            .next_back()
            .ok_or_else(|| anyhow!("no mapping at 0x{address:X}"))?;
        let offset = (address - base) as usize;
        if offset + len > alloc.bytes.len() {
            return Err(anyhow!("span 0x{:X}+{} exceeds mapping at 0x{:X}", address, len, base));
        }
        Ok((*base, offset))
    }
}

impl Default for MockMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAccess for MockMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let allocations = self.allocations.read().unwrap();
        let (base, offset) = Self::locate(&allocations, address, buf.len())?;
        let alloc = &allocations[&base];

        let first_page = offset / MOCK_PAGE_SIZE;
        let last_page = (offset + buf.len().max(1) - 1) / MOCK_PAGE_SIZE;
        for page in first_page..=last_page {
            if alloc.faulty_pages.contains(&page) {
                return Err(anyhow!("read fault at 0x{:X} (page {})", address, page));
            }
        }

        buf.copy_from_slice(&alloc.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let mut allocations = self.allocations.write().unwrap();
        let (base, offset) = Self::locate(&allocations, address, bytes.len())?;
        let alloc = allocations.get_mut(&base).unwrap();
        alloc.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl RegionEnumerator for MockMemory {
    fn list_regions(&self, filter: RegionFilter) -> Result<Vec<RegionInfo>> {
        let allocations = self.allocations.read().unwrap();
        let regions = allocations
            .iter()
            .filter(|(_, alloc)| match (filter, &alloc.kind) {
                (RegionFilter::All, _) => true,
                (RegionFilter::Heaps, AllocationKind::Heap) => true,
                (RegionFilter::Modules, AllocationKind::Module(_)) => true,
                _ => false,
            })
            .map(|(base, alloc)| RegionInfo {
                base: *base,
                size: alloc.bytes.len(),
                protection: match alloc.kind {
                    AllocationKind::Heap => Protection::read_write(),
                    AllocationKind::Module(_) => Protection::read_execute(),
                },
                module_name: match &alloc.kind {
                    AllocationKind::Module(name) => Some(name.clone()),
                    AllocationKind::Heap => None,
                },
            })
            .collect();
        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_back_written_values() {
        let mem = MockMemory::new();
        mem.alloc_heap(0x10000, 0x2000);
        mem.write_u64(0x10010, 0xDEAD_BEEF);
        assert_eq!(mem.read_u64(0x10010), 0xDEAD_BEEF);
    }

    #[test]
    fn faulty_pages_fail_reads() {
        let mem = MockMemory::new();
        mem.alloc_heap(0x10000, 4 * MOCK_PAGE_SIZE);
        mem.set_faulty_pages(0x10000, &[1]);

        let mut buf = [0u8; 16];
        assert!(mem.read(0x10000, &mut buf).is_ok());
        assert!(mem.read(0x10000 + MOCK_PAGE_SIZE as u64, &mut buf).is_err());
    }

    #[test]
    fn region_filters() {
        let mem = MockMemory::new();
        mem.alloc_heap(0x10000, 0x1000);
        mem.alloc_module(0x40000, 0x1000, "libgame.so");

        assert_eq!(mem.list_regions(RegionFilter::All).unwrap().len(), 2);
        assert_eq!(mem.list_regions(RegionFilter::Heaps).unwrap().len(), 1);
        let modules = mem.list_regions(RegionFilter::Modules).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].module_name.as_deref(), Some("libgame.so"));
    }
}
