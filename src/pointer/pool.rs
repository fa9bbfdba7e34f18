//! Global pointer pool: every aligned source address holding a plausible
//! pointer into the snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use log::{Level, debug, info, log_enabled};
use rayon::prelude::*;

use crate::pointer::types::PointerScanConfig;
use crate::snapshot::Snapshot;

/// Progress is reported once per this many processed regions.
const PROGRESS_REGION_STRIDE: usize = 32;

/// Builds the source-to-value pool from a snapshot with collected values.
/// A value survives when it clears the plausibility floor, stays below the
/// signed-pointer ceiling, is aligned, and lands inside the snapshot.
/// Returns `None` when cancelled.
pub(crate) fn build_pointer_pool<C, P>(snapshot: &Snapshot, config: &PointerScanConfig, check_cancelled: &C, report_progress: &P) -> Option<DashMap<u64, u64>>
where
    C: Fn() -> bool + Sync,
    P: Fn(f32) + Sync,
{
    let started = Instant::now();
    let pool = DashMap::new();
    let width = config.pointer_size.width();
    let alignment = config.alignment.max(1);
    let total = snapshot.region_count();
    let processed = AtomicUsize::new(0);

    snapshot.regions().par_iter().for_each(|region| {
        if check_cancelled() {
            return;
        }
        let Some(values) = region.current_values() else {
            return;
        };
        let base = region.base_address();

        // First aligned source inside the region.
        let misalignment = (base % alignment) as usize;
        let mut offset = if misalignment == 0 { 0 } else { alignment as usize - misalignment };
        while offset + width <= values.len() {
            let value = config.pointer_size.decode(&values[offset..offset + width]);
            if value >= config.min_pointer_value
                && value <= i64::MAX as u64
                && value % alignment == 0
                && snapshot.contains_address(value)
            {
                pool.insert(base + offset as u64, value);
            }
            offset += alignment as usize;
        }

        let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % PROGRESS_REGION_STRIDE == 0 {
            report_progress(done as f32 / total as f32 * 100.0);
        }
    });

    if check_cancelled() {
        info!("pointer pool construction cancelled");
        return None;
    }

    if log_enabled!(Level::Debug) {
        debug!("pointer pool built in {:?}: {} entries from {} regions", started.elapsed(), pool.len(), total);
    }
    Some(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScanContext;
    use crate::memory::mock::MockMemory;
    use crate::memory::RegionFilter;
    use std::sync::Arc;

    fn pooled(mem: Arc<MockMemory>, config: &PointerScanConfig) -> DashMap<u64, u64> {
        let ctx = ScanContext::new(mem.clone(), mem);
        let mut snapshot = Snapshot::query(ctx.regions().as_ref(), RegionFilter::All).unwrap();
        assert!(crate::collect::collect_values_sync(&ctx, &mut snapshot, &|| false, &|_| {}));
        build_pointer_pool(&snapshot, config, &|| false, &|_| {}).unwrap()
    }

    #[test]
    fn keeps_plausible_in_snapshot_pointers_only() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x100000, 0x1000);
        // Valid: aligned source, plausible value, lands in the region.
        mem.write_u64(0x100010, 0x100800);
        // Below the plausibility floor.
        mem.write_u64(0x100020, 0x8000);
        // Plausible magnitude but points outside the snapshot.
        mem.write_u64(0x100030, 0x900000);
        // Unaligned value.
        mem.write_u64(0x100040, 0x100802);
        // Above the signed ceiling.
        mem.write_u64(0x100050, 0x8000000000000000);

        let config = PointerScanConfig::new(0);
        let pool = pooled(mem, &config);
        assert_eq!(pool.len(), 1);
        assert_eq!(*pool.get(&0x100010).unwrap(), 0x100800);
    }

    #[test]
    fn sources_step_by_alignment() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x100000, 0x1000);
        mem.write_u64(0x100010, 0x100800);
        // Unaligned source offset is never visited.
        mem.write_u64(0x100102, 0x100800);

        let config = PointerScanConfig::new(0);
        let pool = pooled(mem, &config);
        assert!(pool.contains_key(&0x100010));
        assert!(!pool.contains_key(&0x100102));
    }
}
