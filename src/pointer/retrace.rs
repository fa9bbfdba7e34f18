//! Backward retrace: reconstructs concrete chains from the trace levels.
//!
//! Walks from the final level down to the target with an explicit work
//! stack, one parallel producer per static base. Chains stream through a
//! channel into a consumer thread; one base can close many chains, so the
//! result is only materialized once every producer finishes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Sender, unbounded};
use log::{Level as LogLevel, debug, info, log_enabled};
use rayon::prelude::*;

use crate::memory::RegionInfo;
use crate::pointer::types::{Level, Pointer, PointerScanConfig};

/// One pending step of the backward walk.
struct Frame {
    level: usize,
    destination: u64,
    offsets: Vec<i32>,
}

/// Reconstructs all chains for the traced levels. `Ok(None)` means
/// cancelled. Chains come back sorted by depth, then base address.
pub(crate) fn retrace<C, P>(levels: &[Level], config: &PointerScanConfig, modules: &[RegionInfo], check_cancelled: &C, report_progress: &P) -> Result<Option<Vec<Pointer>>>
where
    C: Fn() -> bool + Sync,
    P: Fn(f32) + Sync,
{
    // Depth zero makes no dereference; no chain can close.
    if config.max_depth == 0 {
        return Ok(Some(Vec::new()));
    }
    // A trace that terminated early has no complete final level.
    if levels.len() != config.max_depth + 1 {
        return Ok(Some(Vec::new()));
    }
    let bases: Vec<(u64, u64)> = levels[config.max_depth].candidates.iter().map(|(&s, &v)| (s, v)).collect();
    if bases.is_empty() {
        return Ok(Some(Vec::new()));
    }

    let started = Instant::now();
    info!("retracing {} static bases across {} levels...", bases.len(), levels.len());

    let (tx, rx) = unbounded::<Pointer>();
    let consumer = thread::spawn(move || {
        let mut chains = Vec::new();
        let mut last_report = Instant::now();
        while let Ok(chain) = rx.recv() {
            chains.push(chain);
            // Throttled so a chain flood does not drown the log.
            if last_report.elapsed() >= Duration::from_millis(100) {
                debug!("{} chains so far", chains.len());
                last_report = Instant::now();
            }
        }
        chains
    });

    let total = bases.len();
    let processed = AtomicUsize::new(0);
    bases.par_iter().for_each_with(tx, |tx, &(base, destination)| {
        if check_cancelled() {
            return;
        }
        walk(levels, config, modules, base, destination, tx);
        let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
        report_progress(done as f32 / total as f32 * 100.0);
    });

    // All producers done, their senders dropped; the consumer drains and
    // exits.
    let mut pointers = consumer.join().map_err(|_| anyhow!("retrace consumer thread panicked"))?;
    if check_cancelled() {
        info!("retrace cancelled");
        return Ok(None);
    }

    pointers.sort_by(|a, b| a.offsets.len().cmp(&b.offsets.len()).then(a.base_address.cmp(&b.base_address)));

    if log_enabled!(LogLevel::Debug) {
        debug!("retrace finished in {:?}: {} chains", started.elapsed(), pointers.len());
    }
    Ok(Some(pointers))
}

/// Explicit-stack walk from one final-level base down to the target. The
/// level index strictly decreases per pushed frame, so the walk cannot
/// loop even when an address appears at several levels.
fn walk(levels: &[Level], config: &PointerScanConfig, modules: &[RegionInfo], base: u64, destination: u64, tx: &Sender<Pointer>) {
    let mut stack = vec![Frame {
        level: config.max_depth,
        destination,
        offsets: Vec::new(),
    }];

    while let Some(frame) = stack.pop() {
        for (&source, &value) in &levels[frame.level - 1].candidates {
            let delta = source.wrapping_sub(frame.destination) as i64;
            if delta.unsigned_abs() > config.max_offset {
                continue;
            }
            if frame.level == 1 {
                // Level 0 holds only the target; the chain closes here and
                // the final delta is not recorded.
                let _ = tx.send(attribute(modules, base, frame.offsets.clone()));
            } else {
                let mut offsets = frame.offsets.clone();
                offsets.push(delta as i32);
                stack.push(Frame {
                    level: frame.level - 1,
                    destination: value,
                    offsets,
                });
            }
        }
    }
}

/// Names the module owning `base`, counting earlier same-named modules so
/// duplicates stay distinguishable.
fn attribute(modules: &[RegionInfo], base: u64, offsets: Vec<i32>) -> Pointer {
    for (position, module) in modules.iter().enumerate() {
        if base < module.base || base >= module.base + module.size as u64 {
            continue;
        }
        let name = module.module_name.clone();
        let index = match &name {
            Some(name) => modules[..position].iter().filter(|m| m.module_name.as_deref() == Some(name)).count() as u32,
            None => 0,
        };
        return Pointer {
            base_address: base,
            module_name: name,
            module_index: index,
            module_offset: base - module.base,
            offsets,
        };
    }
    Pointer {
        base_address: base,
        module_name: None,
        module_index: 0,
        module_offset: 0,
        offsets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Protection;
    use std::collections::HashMap;

    fn level(entries: &[(u64, u64)]) -> Level {
        Level {
            candidates: entries.iter().copied().collect::<HashMap<_, _>>(),
        }
    }

    fn module(base: u64, size: usize, name: &str) -> RegionInfo {
        RegionInfo {
            base,
            size,
            protection: Protection::read_execute(),
            module_name: Some(name.to_string()),
        }
    }

    #[test]
    fn depth_one_chain_has_no_offsets() {
        let levels = vec![level(&[(0x3000, 0)]), level(&[(0x1010, 0x3000)])];
        let config = PointerScanConfig::new(0x3000).with_depth(1).with_offset(0x20);

        let chains = retrace(&levels, &config, &[], &|| false, &|_| {}).unwrap().unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].base_address, 0x1010);
        assert!(chains[0].offsets.is_empty());
    }

    #[test]
    fn intermediate_offsets_are_signed_source_minus_destination() {
        // base 0x500010 -> 0x100100; source 0x100108 (= 0x100100 + 8)
        // -> 0x3000 = target.
        let levels = vec![
            level(&[(0x3000, 0)]),
            level(&[(0x100108, 0x3000)]),
            level(&[(0x500010, 0x100100)]),
        ];
        let config = PointerScanConfig::new(0x3000).with_depth(2).with_offset(0x20);
        let modules = [module(0x500000, 0x1000, "libgame.so")];

        let chains = retrace(&levels, &config, &modules, &|| false, &|_| {}).unwrap().unwrap();
        assert_eq!(chains.len(), 1);
        let chain = &chains[0];
        assert_eq!(chain.base_address, 0x500010);
        assert_eq!(chain.offsets, vec![8]);
        assert_eq!(chain.module_name.as_deref(), Some("libgame.so"));
        assert_eq!(chain.module_offset, 0x10);
        assert_eq!(chain.format(), "libgame.so[0]+0x10->+0x8");
    }

    #[test]
    fn one_base_can_close_many_chains() {
        // Two level-1 sources both within radius of the base's destination.
        let levels = vec![
            level(&[(0x3000, 0)]),
            level(&[(0x100100, 0x3000), (0x100108, 0x3010)]),
            level(&[(0x500010, 0x100100)]),
        ];
        let config = PointerScanConfig::new(0x3000).with_depth(2).with_offset(0x20);

        let chains = retrace(&levels, &config, &[], &|| false, &|_| {}).unwrap().unwrap();
        let offsets: Vec<&[i32]> = chains.iter().map(|c| c.offsets.as_slice()).collect();
        assert_eq!(chains.len(), 2);
        assert!(offsets.contains(&&[0][..]));
        assert!(offsets.contains(&&[8][..]));
    }

    #[test]
    fn depth_zero_yields_no_chains() {
        // Level 0 alone: the target sentinel is not a dereference base.
        let levels = vec![level(&[(0x3000, 0)])];
        let config = PointerScanConfig::new(0x3000).with_depth(0).with_offset(0x20);
        let chains = retrace(&levels, &config, &[], &|| false, &|_| {}).unwrap().unwrap();
        assert!(chains.is_empty());
    }

    #[test]
    fn early_terminated_trace_yields_no_chains() {
        let levels = vec![level(&[(0x3000, 0)]), Level::default()];
        let config = PointerScanConfig::new(0x3000).with_depth(3).with_offset(0x20);
        let chains = retrace(&levels, &config, &[], &|| false, &|_| {}).unwrap().unwrap();
        assert!(chains.is_empty());
    }
}
