//! Value collector: re-reads memory for every region of a snapshot.
//!
//! Each pass demotes the regions' current bytes to the previous generation
//! and installs freshly read bytes. A region whose read fails is left
//! without current values for this pass and will be skipped by scanners;
//! the collection as a whole still succeeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::Result;
use log::{Level, debug, info, log_enabled, warn};
use rayon::prelude::*;

use crate::context::ScanContext;
use crate::memory::MemoryAccess;
use crate::snapshot::{Snapshot, SnapshotRegion};
use crate::task::{TaskOutcome, TrackableTask};

/// Progress is reported once per this many processed regions.
const PROGRESS_REGION_STRIDE: usize = 32;

/// Re-reads every region of `snapshot` in parallel as a trackable task.
pub fn collect_values(ctx: &ScanContext, snapshot: Snapshot, identifier: Option<&str>) -> Result<TrackableTask<Snapshot>> {
    let tasks = Arc::clone(ctx.tasks());
    let ctx = ctx.clone();
    tasks.spawn("value collector", identifier, move |handle| {
        if handle.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        let mut snapshot = snapshot;
        let finished = collect_values_sync(&ctx, &mut snapshot, &|| handle.is_cancelled(), &|p| {
            handle.report_progress(p)
        });
        if !finished {
            return TaskOutcome::Cancelled;
        }
        handle.report_progress(100.0);
        TaskOutcome::Completed(snapshot)
    })
}

/// Synchronous collection body, shared with the pointer-scan phases.
/// Returns false when cancelled; the snapshot contents are then discarded
/// by the caller.
pub(crate) fn collect_values_sync<C, P>(ctx: &ScanContext, snapshot: &mut Snapshot, check_cancelled: &C, report_progress: &P) -> bool
where
    C: Fn() -> bool + Sync,
    P: Fn(f32) + Sync,
{
    let started = Instant::now();
    let total = snapshot.region_count();
    if total == 0 {
        debug!("value collection over an empty snapshot");
        return !check_cancelled();
    }

    info!("reading values for {total} regions...");

    let processed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let memory = ctx.memory();
    let chunk_size = ctx.read_chunk_size();

    snapshot.regions_mut().par_iter_mut().for_each(|region| {
        // Cooperative cancellation, checked before each region.
        if check_cancelled() {
            return;
        }

        if !read_region(memory.as_ref(), region, chunk_size) {
            failed.fetch_add(1, Ordering::Relaxed);
        }

        let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % PROGRESS_REGION_STRIDE == 0 {
            report_progress(done as f32 / total as f32 * 100.0);
        }
    });

    // Check again before finalizing counts.
    if check_cancelled() {
        info!("value collection cancelled");
        return false;
    }

    let failed = failed.into_inner();
    if failed > 0 {
        warn!("{failed} of {total} regions were unreadable this pass");
    }

    if log_enabled!(Level::Debug) {
        debug!(
            "values collected in {:?}: {} regions, {} bytes, {} elements",
            started.elapsed(),
            snapshot.region_count(),
            snapshot.byte_count(),
            snapshot.element_count(),
        );
    }

    true
}

/// Reads a region in chunks. On any failed chunk the region is marked
/// unreadable for this pass (its stale bytes demote to the previous
/// generation, current stays empty).
fn read_region(memory: &dyn MemoryAccess, region: &mut SnapshotRegion, chunk_size: usize) -> bool {
    let size = region.size();
    let base = region.base_address();
    let mut buf = vec![0u8; size];

    let mut offset = 0;
    while offset < size {
        let end = (offset + chunk_size).min(size);
        if let Err(err) = memory.read(base + offset as u64, &mut buf[offset..end]) {
            if log_enabled!(Level::Debug) {
                debug!("region 0x{base:X}+{size:#X} unreadable: {err:#}");
            }
            region.set_current_values(None);
            return false;
        }
        offset = end;
    }

    region.set_current_values(Some(buf));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RegionFilter;
    use crate::memory::mock::{MOCK_PAGE_SIZE, MockMemory};
    use std::sync::Arc;

    fn context(mem: Arc<MockMemory>) -> ScanContext {
        ScanContext::new(mem.clone(), mem)
    }

    #[test]
    fn collects_both_generations() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x10000, 0x1000);
        mem.write_u32(0x10010, 7);
        let ctx = context(mem.clone());

        let snapshot = Snapshot::query(ctx.regions().as_ref(), RegionFilter::All).unwrap();
        let snapshot = collect_values(&ctx, snapshot, None).unwrap().wait().completed().unwrap();
        assert!(snapshot.has_current_values());
        assert!(!snapshot.can_compare());

        mem.write_u32(0x10010, 9);
        let snapshot = collect_values(&ctx, snapshot, None).unwrap().wait().completed().unwrap();
        assert!(snapshot.can_compare());

        let region = snapshot.region_containing(0x10010).unwrap();
        let current = region.current_values().unwrap();
        let previous = region.previous_values().unwrap();
        assert_eq!(&current[0x10..0x14], &9u32.to_le_bytes()[..]);
        assert_eq!(&previous[0x10..0x14], &7u32.to_le_bytes()[..]);
    }

    #[test]
    fn failed_region_is_absorbed_not_fatal() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x10000, MOCK_PAGE_SIZE);
        mem.alloc_heap(0x40000, MOCK_PAGE_SIZE);
        mem.set_faulty_pages(0x40000, &[0]);
        let ctx = context(mem.clone());

        let snapshot = Snapshot::query(ctx.regions().as_ref(), RegionFilter::All).unwrap();
        let snapshot = collect_values(&ctx, snapshot, None).unwrap().wait().completed().unwrap();

        assert!(snapshot.region_containing(0x10000).unwrap().has_current_values());
        assert!(!snapshot.region_containing(0x40000).unwrap().has_current_values());
    }

    #[test]
    fn cancellation_reports_cancelled_outcome() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x10000, MOCK_PAGE_SIZE);
        let ctx = context(mem.clone());

        let snapshot = Snapshot::query(ctx.regions().as_ref(), RegionFilter::All).unwrap();
        let task = collect_values(&ctx, snapshot, None).unwrap();
        task.cancel();
        // Either the worker saw the flag before starting or before
        // finalizing; both must surface as a cancelled outcome or a
        // completed one if it won the race fully.
        let outcome = task.wait();
        assert!(outcome.is_cancelled() || outcome.completed().is_some());
    }

    /// Memory access that parks every read until the gate opens, so the
    /// first collection is deterministically still in flight.
    struct GatedMemory {
        inner: Arc<MockMemory>,
        gate: crossbeam_channel::Receiver<()>,
    }

    impl MemoryAccess for GatedMemory {
        fn read(&self, address: u64, buf: &mut [u8]) -> anyhow::Result<()> {
            self.gate.recv().ok();
            self.inner.read(address, buf)
        }

        fn write(&self, address: u64, bytes: &[u8]) -> anyhow::Result<()> {
            self.inner.write(address, bytes)
        }
    }

    #[test]
    fn duplicate_collection_identifier_conflicts() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x10000, MOCK_PAGE_SIZE);
        let (open_gate, gate) = crossbeam_channel::unbounded::<()>();
        let gated = Arc::new(GatedMemory { inner: mem.clone(), gate });
        let ctx = ScanContext::new(gated, mem);

        let snapshot = Snapshot::query(ctx.regions().as_ref(), RegionFilter::All).unwrap();
        let first = collect_values(&ctx, snapshot.clone(), Some("collect")).unwrap();

        let second = collect_values(&ctx, snapshot, Some("collect"));
        let err = second.err().expect("conflicting identifier must be rejected");
        assert!(err.downcast_ref::<crate::error::TaskError>().is_some());

        drop(open_gate);
        assert!(first.wait().completed().is_some());
    }
}
