//! Explicit scan context threaded through every component.
//!
//! There is no global process handle or singleton manager in this crate;
//! whoever opened the process hands its reader and region enumerator in
//! here, and every scan entry point takes the context by reference.

use std::sync::Arc;

use crate::memory::{MemoryAccess, RegionEnumerator};
use crate::task::TaskRegistry;

/// Default scan alignment in bytes.
pub const DEFAULT_ALIGNMENT: usize = 4;

/// Default chunk size for reading large regions.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 512 * 1024;

#[derive(Clone)]
pub struct ScanContext {
    memory: Arc<dyn MemoryAccess>,
    regions: Arc<dyn RegionEnumerator>,
    tasks: Arc<TaskRegistry>,
    alignment: usize,
    read_chunk_size: usize,
}

impl ScanContext {
    pub fn new(memory: Arc<dyn MemoryAccess>, regions: Arc<dyn RegionEnumerator>) -> Self {
        Self {
            memory,
            regions,
            tasks: Arc::new(TaskRegistry::new()),
            alignment: DEFAULT_ALIGNMENT,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        debug_assert!(alignment > 0);
        self.alignment = alignment;
        self
    }

    pub fn with_read_chunk_size(mut self, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0);
        self.read_chunk_size = chunk_size;
        self
    }

    pub fn memory(&self) -> &Arc<dyn MemoryAccess> {
        &self.memory
    }

    pub fn regions(&self) -> &Arc<dyn RegionEnumerator> {
        &self.regions
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }
}
