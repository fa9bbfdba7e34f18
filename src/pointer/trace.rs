//! Forward trace: level-by-level narrowing of the pointer pool toward the
//! target address.

use dashmap::DashMap;
use log::debug;
use rayon::prelude::*;

use crate::pointer::types::{Level, PointerScanConfig};
use crate::snapshot::{Snapshot, SnapshotRegion};

/// Builds levels 0..=max_depth. Level 0 is the target sentinel; level L
/// keeps pool entries whose value lands within the previous level's ranges;
/// the final level additionally requires a static source. An empty level
/// ends the trace early, which retrace turns into an empty result.
/// Returns `None` when cancelled.
pub(crate) fn trace_levels<C>(pool: &DashMap<u64, u64>, static_bases: &Snapshot, config: &PointerScanConfig, check_cancelled: &C) -> Option<Vec<Level>>
where
    C: Fn() -> bool + Sync,
{
    let mut levels = vec![Level::target(config.target_address)];
    let mut ranges = Snapshot::new(vec![SnapshotRegion::around(config.target_address, config.max_offset)]);

    for depth in 1..=config.max_depth {
        if check_cancelled() {
            return None;
        }
        let final_level = depth == config.max_depth;
        let accepted: DashMap<u64, u64> = DashMap::new();

        pool.par_iter().for_each(|entry| {
            // Chains must terminate in a static, reproducible base.
            if final_level && !static_bases.contains_address(*entry.key()) {
                return;
            }
            if ranges.contains_address(*entry.value()) {
                accepted.insert(*entry.key(), *entry.value());
            }
        });

        debug!("trace level {depth}: {} candidates", accepted.len());
        if accepted.is_empty() {
            levels.push(Level::default());
            break;
        }

        ranges = Snapshot::new(
            accepted
                .iter()
                .map(|entry| SnapshotRegion::around(*entry.key(), config.max_offset))
                .collect(),
        );
        levels.push(Level {
            candidates: accepted.into_iter().collect(),
        });
    }

    Some(levels)
}
