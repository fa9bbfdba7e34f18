//! Pointer trace/retrace: discovers chains of dereferences from static
//! module bases to a target address, and replays them against changed
//! memory (rebase) or a different target (retarget).

mod pool;
mod retrace;
mod trace;
mod types;

pub use types::{DEFAULT_MIN_POINTER_VALUE, Level, Pointer, PointerBag, PointerScanConfig, PointerSize};

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use log::info;
use rayon::prelude::*;

use crate::collect::collect_values_sync;
use crate::context::ScanContext;
use crate::memory::RegionFilter;
use crate::pointer::pool::build_pointer_pool;
use crate::pointer::retrace::retrace;
use crate::pointer::trace::trace_levels;
use crate::snapshot::Snapshot;
use crate::task::{TaskHandle, TaskOutcome, TrackableTask};

/// Runs a full pointer scan as a trackable task: collect all readable
/// memory, build the pool, trace levels toward the target, retrace chains.
pub fn pointer_scan(ctx: &ScanContext, config: PointerScanConfig, identifier: Option<&str>) -> Result<TrackableTask<PointerBag>> {
    let tasks = Arc::clone(ctx.tasks());
    let ctx = ctx.clone();
    tasks.spawn("pointer scanner", identifier, move |handle| outcome(scan_sync(&ctx, config, handle), handle))
}

/// Replays a previous scan against live memory: same level structure,
/// freshly read values. The input bag is left untouched.
pub fn pointer_rebase(ctx: &ScanContext, bag: &PointerBag, identifier: Option<&str>) -> Result<TrackableTask<PointerBag>> {
    let tasks = Arc::clone(ctx.tasks());
    let ctx = ctx.clone();
    let bag = bag.clone();
    tasks.spawn("pointer rebase", identifier, move |handle| {
        let result = rebase_body(&ctx, bag, &|| handle.is_cancelled(), &|p| handle.report_progress(p));
        outcome(result, handle)
    })
}

/// Replays a previous scan against a new target address: level 0 becomes
/// the new target, intermediate levels are replaced by a freshly collected
/// full-heap pool, the static level is carried over, then everything is
/// rebased. The input bag is left untouched.
pub fn pointer_retarget(ctx: &ScanContext, bag: &PointerBag, new_target: u64, identifier: Option<&str>) -> Result<TrackableTask<PointerBag>> {
    let tasks = Arc::clone(ctx.tasks());
    let ctx = ctx.clone();
    let bag = bag.clone();
    tasks.spawn("pointer retarget", identifier, move |handle| outcome(retarget_sync(&ctx, bag, new_target, handle), handle))
}

fn outcome<T>(result: Result<Option<T>>, handle: &TaskHandle) -> TaskOutcome<T> {
    match result {
        Ok(Some(value)) => {
            handle.report_progress(100.0);
            TaskOutcome::Completed(value)
        },
        Ok(None) => TaskOutcome::Cancelled,
        Err(err) => TaskOutcome::Failed(err),
    }
}

// Progress windows: collection 0-40, pool 40-60, trace to 80, retrace to
// 100.
fn scan_sync(ctx: &ScanContext, config: PointerScanConfig, handle: &TaskHandle) -> Result<Option<PointerBag>> {
    let cancelled = || handle.is_cancelled();
    info!(
        "pointer scan: target=0x{:X} depth={} offset=0x{:X}",
        config.target_address, config.max_depth, config.max_offset,
    );

    let mut snapshot = Snapshot::query(ctx.regions().as_ref(), RegionFilter::All)?;
    if !collect_values_sync(ctx, &mut snapshot, &cancelled, &|p| handle.report_progress(p * 0.4)) {
        return Ok(None);
    }

    let static_bases = Snapshot::query(ctx.regions().as_ref(), RegionFilter::Modules)?;
    let modules = ctx.regions().list_regions(RegionFilter::Modules)?;

    let Some(pool) = build_pointer_pool(&snapshot, &config, &cancelled, &|p| handle.report_progress(40.0 + p * 0.2)) else {
        return Ok(None);
    };
    // Only the pool survives this phase; the buffers can go.
    drop(snapshot);

    let Some(levels) = trace_levels(&pool, &static_bases, &config, &cancelled) else {
        return Ok(None);
    };
    handle.report_progress(80.0);

    let Some(pointers) = retrace(&levels, &config, &modules, &cancelled, &|p| handle.report_progress(80.0 + p * 0.2))? else {
        return Ok(None);
    };

    Ok(Some(PointerBag {
        levels,
        static_bases,
        modules,
        pointers,
        config,
    }))
}

// Rebase: refresh 0-60, retrace 60-100.
fn rebase_body<C, P>(ctx: &ScanContext, mut bag: PointerBag, check_cancelled: &C, report_progress: &P) -> Result<Option<PointerBag>>
where
    C: Fn() -> bool + Sync,
    P: Fn(f32) + Sync,
{
    if !refresh_levels(ctx, &mut bag, check_cancelled, &|p| report_progress(p * 0.6)) {
        return Ok(None);
    }
    let Some(pointers) = retrace(&bag.levels, &bag.config, &bag.modules, check_cancelled, &|p| report_progress(60.0 + p * 0.4))? else {
        return Ok(None);
    };
    bag.pointers = pointers;
    Ok(Some(bag))
}

/// Re-reads every candidate's value from live memory; candidates whose
/// read fails drop out. Level 0 is the target sentinel and stays as is.
fn refresh_levels<C, P>(ctx: &ScanContext, bag: &mut PointerBag, check_cancelled: &C, report_progress: &P) -> bool
where
    C: Fn() -> bool + Sync,
    P: Fn(f32) + Sync,
{
    let memory = Arc::clone(ctx.memory());
    let pointer_size = bag.config.pointer_size;
    let total = bag.levels.len().saturating_sub(1).max(1);

    for (index, level) in bag.levels.iter_mut().enumerate().skip(1) {
        if check_cancelled() {
            return false;
        }
        let sources: Vec<u64> = level.candidates.keys().copied().collect();
        level.candidates = sources
            .par_iter()
            .filter_map(|&source| pointer_size.read(memory.as_ref(), source).ok().map(|value| (source, value)))
            .collect();
        report_progress(index as f32 / total as f32 * 100.0);
    }
    !check_cancelled()
}

// Retarget: heap collection 0-30, pool 30-50, rebase 50-100.
fn retarget_sync(ctx: &ScanContext, bag: PointerBag, new_target: u64, handle: &TaskHandle) -> Result<Option<PointerBag>> {
    let cancelled = || handle.is_cancelled();
    let mut config = bag.config;
    config.target_address = new_target;
    info!("pointer retarget: 0x{:X} -> 0x{new_target:X}", bag.config.target_address);

    let mut heap = Snapshot::query(ctx.regions().as_ref(), RegionFilter::Heaps)?;
    if !collect_values_sync(ctx, &mut heap, &cancelled, &|p| handle.report_progress(p * 0.3)) {
        return Ok(None);
    }
    let Some(pool) = build_pointer_pool(&heap, &config, &cancelled, &|p| handle.report_progress(30.0 + p * 0.2)) else {
        return Ok(None);
    };
    let pool: HashMap<u64, u64> = pool.into_iter().collect();

    let depth = bag.levels.len();
    let mut levels = Vec::with_capacity(depth);
    levels.push(Level::target(new_target));
    for index in 1..depth {
        if index == depth - 1 {
            // Static roots are layout, not heap; they carry over.
            levels.push(bag.levels[index].clone());
        } else {
            levels.push(Level { candidates: pool.clone() });
        }
    }

    let staged = PointerBag { levels, config, ..bag };
    rebase_body(ctx, staged, &cancelled, &|p| handle.report_progress(50.0 + p * 0.5))
}
