//! Element scanner: applies a constraint tree to a captured snapshot and
//! produces a filtered snapshot of passing elements.
//!
//! Each region chooses a strategy: the chunked path for densely packed
//! fixed-width elements, the windowed path for byte patterns, and the scalar
//! path for everything else (unit alignment under a wider element, partial
//! validity). Passing elements come back as runs; runs whose byte spans
//! touch or overlap collapse into one result region with a validity bitmap
//! so no fabricated matches appear between them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::Result;
use log::{Level, debug, info, log_enabled};
use rayon::prelude::*;

use crate::context::ScanContext;
use crate::error::ConstraintError;
use crate::scan::constraint::Constraint;
use crate::scan::value::ElementType;
use crate::scan::{scalar, vector};
use crate::snapshot::{Snapshot, SnapshotRegion};
use crate::task::{TaskOutcome, TrackableTask};

/// Progress is reported once per this many processed regions.
const PROGRESS_REGION_STRIDE: usize = 32;

/// A validated scan: element type, constraint tree, and an optional
/// alignment override. Construction rejects malformed constraints, so a
/// request in hand is always runnable.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    element_type: ElementType,
    constraint: Constraint,
    alignment: Option<usize>,
}

impl ScanRequest {
    pub fn new(element_type: ElementType, constraint: Constraint) -> Result<Self, ConstraintError> {
        constraint.validate(element_type)?;
        if element_type == ElementType::Bytes && max_pattern_len(&constraint).is_none() {
            // Window size is unknowable without at least one pattern.
            return Err(ConstraintError::UnsupportedElementType {
                kind: first_leaf_kind(&constraint),
                element_type: element_type.name(),
            });
        }
        Ok(Self {
            element_type,
            constraint,
            alignment: None,
        })
    }

    /// Overrides the context-wide element alignment for this scan.
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        debug_assert!(alignment > 0);
        self.alignment = Some(alignment);
        self
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    /// Element width in bytes: the type's fixed size, or the widest pattern
    /// in the tree for byte scans.
    fn element_size(&self) -> usize {
        self.element_type
            .fixed_size()
            .or_else(|| max_pattern_len(&self.constraint))
            .unwrap_or(1)
    }
}

fn max_pattern_len(constraint: &Constraint) -> Option<usize> {
    use crate::scan::constraint::ScanOperand;
    match constraint {
        Constraint::Leaf {
            operand: Some(ScanOperand::Pattern(pattern)),
            ..
        } => Some(pattern.len()),
        Constraint::Leaf { .. } => None,
        Constraint::Binary { left, right, .. } => match (max_pattern_len(left), max_pattern_len(right)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        },
    }
}

fn first_leaf_kind(constraint: &Constraint) -> &'static str {
    match constraint {
        Constraint::Leaf { kind, .. } => kind.name(),
        Constraint::Binary { left, .. } => first_leaf_kind(left),
    }
}

/// Runs `request` over `snapshot` in parallel as a trackable task. Fails
/// up front, before any thread is spawned, when the request needs previous
/// values the snapshot does not have.
pub fn scan(ctx: &ScanContext, snapshot: Snapshot, request: ScanRequest, identifier: Option<&str>) -> Result<TrackableTask<Snapshot>> {
    if request.constraint.requires_previous() && !snapshot.can_compare() {
        return Err(ConstraintError::IncomparableSnapshot.into());
    }
    let alignment = request.alignment.unwrap_or(ctx.alignment());
    let tasks = Arc::clone(ctx.tasks());
    tasks.spawn("element scanner", identifier, move |handle| {
        if handle.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        match scan_sync(snapshot, &request, alignment, &|| handle.is_cancelled(), &|p| handle.report_progress(p)) {
            Some(result) => {
                handle.report_progress(100.0);
                TaskOutcome::Completed(result)
            },
            None => TaskOutcome::Cancelled,
        }
    })
}

/// Synchronous scan body. Returns `None` when cancelled.
pub(crate) fn scan_sync<C, P>(mut snapshot: Snapshot, request: &ScanRequest, alignment: usize, check_cancelled: &C, report_progress: &P) -> Option<Snapshot>
where
    C: Fn() -> bool + Sync,
    P: Fn(f32) + Sync,
{
    let started = Instant::now();
    let element_size = request.element_size();
    snapshot.set_element_layout(element_size, alignment);

    let total = snapshot.region_count();
    if total == 0 {
        return (!check_cancelled()).then(Snapshot::empty);
    }

    info!(
        "scanning {total} regions, {} candidate {} elements...",
        snapshot.element_count(),
        request.element_type.name(),
    );

    let processed = AtomicUsize::new(0);
    let matched: Vec<Vec<SnapshotRegion>> = snapshot
        .regions()
        .par_iter()
        .map(|region| {
            if check_cancelled() {
                return Vec::new();
            }
            let result = scan_region(region, request);
            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if done % PROGRESS_REGION_STRIDE == 0 {
                report_progress(done as f32 / total as f32 * 100.0);
            }
            result
        })
        .collect();

    if check_cancelled() {
        info!("scan cancelled");
        return None;
    }

    // Sorting and merging the survivors is cheap relative to the scan
    // itself and stays single-threaded.
    let result = Snapshot::new(matched.into_iter().flatten().collect());

    if log_enabled!(Level::Debug) {
        debug!(
            "scan finished in {:?}: {} regions, {} elements survive",
            started.elapsed(),
            result.region_count(),
            result.element_count(),
        );
    }
    Some(result)
}

fn scan_region(region: &SnapshotRegion, request: &ScanRequest) -> Vec<SnapshotRegion> {
    if !region.has_current_values() || region.element_count() == 0 {
        return Vec::new();
    }
    if request.constraint.requires_previous() && !region.can_compare() {
        return Vec::new();
    }

    let runs = if request.element_type == ElementType::Bytes {
        vector::scan_region_windowed(region, &request.constraint, request.element_type)
    } else if vector::supports_region(region, request.element_type) {
        vector::scan_region_vector(region, &request.constraint, request.element_type)
    } else {
        scalar::scan_region_scalar(region, &request.constraint, request.element_type)
    };

    runs_to_regions(region, &runs)
}

/// Turns `(start_index, len)` runs into standalone result regions. Runs
/// whose byte spans touch or overlap (possible whenever the alignment is
/// finer than the element width) share one region, with the gap elements
/// marked invalid.
fn runs_to_regions(region: &SnapshotRegion, runs: &[(usize, usize)]) -> Vec<SnapshotRegion> {
    let alignment = region.alignment();
    let element_size = region.element_size();
    let mut out = Vec::new();

    let mut iter = runs.iter().copied();
    let Some((mut cluster_start, mut cluster_len)) = iter.next() else {
        return out;
    };
    let mut cluster_runs = vec![(cluster_start, cluster_len)];

    let mut emit = |start: usize, len: usize, members: &[(usize, usize)]| {
        let mut sub = region.subregion(start, len);
        if members.len() > 1 {
            // Gap elements between member runs did not match.
            let covered: Vec<(usize, usize)> = members.iter().map(|&(s, l)| (s - start, l)).collect();
            let mut next_valid = 0;
            for (run_start, run_len) in covered {
                for index in next_valid..run_start {
                    sub.set_element_valid(index, false);
                }
                next_valid = run_start + run_len;
            }
        }
        out.push(sub);
    };

    for (start, len) in iter {
        let cluster_end_byte = (cluster_start + cluster_len - 1) * alignment + element_size;
        if start * alignment <= cluster_end_byte {
            cluster_runs.push((start, len));
            cluster_len = start + len - cluster_start;
        } else {
            emit(cluster_start, cluster_len, &cluster_runs);
            cluster_start = start;
            cluster_len = len;
            cluster_runs.clear();
            cluster_runs.push((start, len));
        }
    }
    emit(cluster_start, cluster_len, &cluster_runs);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RegionFilter;
    use crate::memory::mock::MockMemory;
    use crate::scan::pattern::BytePattern;
    use crate::scan::value::NumericValue;

    fn context(mem: Arc<MockMemory>) -> ScanContext {
        ScanContext::new(mem.clone(), mem)
    }

    fn collected_snapshot(ctx: &ScanContext) -> Snapshot {
        let snapshot = Snapshot::query(ctx.regions().as_ref(), RegionFilter::All).unwrap();
        crate::collect::collect_values(ctx, snapshot, None).unwrap().wait().completed().unwrap()
    }

    #[test]
    fn equal_scan_survivors_resolve_to_planted_addresses() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x10000, 0x1000);
        mem.write_u32(0x10100, 1337);
        mem.write_u32(0x10204, 1337);
        let ctx = context(mem);

        let snapshot = collected_snapshot(&ctx);
        let request = ScanRequest::new(ElementType::U32, Constraint::equal(NumericValue::U32(1337))).unwrap();
        let result = scan(&ctx, snapshot, request, None).unwrap().wait().completed().unwrap();

        assert_eq!(result.element_count(), 2);
        assert!(result.contains_address(0x10100));
        assert!(result.contains_address(0x10204));

        // Consumers read survivors through the element views.
        let survivors: Vec<(u64, u32)> = result
            .elements()
            .map(|e| (e.address, u32::from_le_bytes(e.current.try_into().unwrap())))
            .collect();
        assert_eq!(survivors, vec![(0x10100, 1337), (0x10204, 1337)]);
    }

    #[test]
    fn next_scan_narrows_previous_results() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x10000, 0x1000);
        mem.write_u32(0x10100, 50);
        mem.write_u32(0x10200, 50);
        let ctx = context(mem.clone());

        let snapshot = collected_snapshot(&ctx);
        let request = ScanRequest::new(ElementType::U32, Constraint::equal(NumericValue::U32(50))).unwrap();
        let first = scan(&ctx, snapshot, request, None).unwrap().wait().completed().unwrap();
        assert_eq!(first.element_count(), 2);

        // Only one of the two moves; a changed scan keeps just that one.
        mem.write_u32(0x10200, 51);
        let refreshed = crate::collect::collect_values(&ctx, first, None).unwrap().wait().completed().unwrap();
        let request = ScanRequest::new(ElementType::U32, Constraint::changed()).unwrap();
        let second = scan(&ctx, refreshed, request, None).unwrap().wait().completed().unwrap();

        assert_eq!(second.element_count(), 1);
        assert!(second.contains_address(0x10200));
        assert!(!second.contains_address(0x10100));
    }

    #[test]
    fn relative_scan_against_fresh_snapshot_is_rejected() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x10000, 0x1000);
        let ctx = context(mem);

        let snapshot = collected_snapshot(&ctx);
        let request = ScanRequest::new(ElementType::U32, Constraint::changed()).unwrap();
        let err = scan(&ctx, snapshot, request, None).err().expect("must reject");
        assert_eq!(err.downcast_ref::<ConstraintError>(), Some(&ConstraintError::IncomparableSnapshot));
    }

    #[test]
    fn pattern_scan_round_trips_through_a_snapshot() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x10000, 0x1000);
        mem.write_u32(0x10123, u32::from_le_bytes([0xDE, 0xAD, 0xBE, 0xEF]));
        let ctx = context(mem);

        let snapshot = collected_snapshot(&ctx);
        let pattern = BytePattern::parse("DE AD ?? EF").unwrap();
        let request = ScanRequest::new(ElementType::Bytes, Constraint::pattern_equal(pattern))
            .unwrap()
            .with_alignment(1);
        let result = scan(&ctx, snapshot, request, None).unwrap().wait().completed().unwrap();

        assert_eq!(result.element_count(), 1);
        let region = result.regions().first().unwrap();
        assert_eq!(region.base_address(), 0x10123);
        assert_eq!(region.current_values(), Some(&[0xDE, 0xAD, 0xBE, 0xEF][..]));
    }

    #[test]
    fn bytes_scan_without_a_pattern_is_rejected_at_construction() {
        let err = ScanRequest::new(ElementType::Bytes, Constraint::changed()).err().expect("must reject");
        assert!(matches!(err, ConstraintError::UnsupportedElementType { .. }));
    }

    #[test]
    fn overlapping_pattern_hits_share_a_region_without_fabricated_matches() {
        // Two hits two bytes apart under a four-byte window.
        let mut region = SnapshotRegion::new(0x2000, 16);
        region.set_element_layout(4, 1);
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&[0xAA, 0, 0xAA, 0]);
        bytes[4..6].copy_from_slice(&[0xAA, 0]);
        region.set_current_values(Some(bytes));

        let pattern = BytePattern::new(vec![0xAA, 0, 0, 0], vec![0xFF, 0xFF, 0, 0]).unwrap();
        let runs = vector::scan_region_windowed(&region, &Constraint::pattern_equal(pattern), ElementType::Bytes);
        assert_eq!(runs, vec![(0, 1), (2, 1), (4, 1)]);

        let regions = runs_to_regions(&region, &runs);
        assert_eq!(regions.len(), 1);
        let merged = &regions[0];
        assert!(merged.is_element_valid(0));
        assert!(!merged.is_element_valid(1));
        assert!(merged.is_element_valid(2));
        assert!(!merged.is_element_valid(3));
        assert!(merged.is_element_valid(4));

        // The element view walks only the real hits.
        let addresses: Vec<u64> = merged.elements().map(|e| e.address).collect();
        assert_eq!(addresses, vec![0x2000, 0x2002, 0x2004]);
    }

    #[test]
    fn duplicate_scan_identifier_conflicts() {
        let mem = Arc::new(MockMemory::new());
        mem.alloc_heap(0x10000, 0x1000);
        let ctx = context(mem);
        // Reserve the identifier directly; the scan must bounce off it.
        let registry = Arc::clone(ctx.tasks());
        let (hold, gate) = crossbeam_channel::unbounded::<()>();
        let blocker = registry
            .spawn("blocker", Some("scan"), move |_| {
                gate.recv().ok();
                TaskOutcome::Completed(())
            })
            .unwrap();

        let snapshot = collected_snapshot(&ctx);
        let request = ScanRequest::new(ElementType::U32, Constraint::equal(NumericValue::U32(1))).unwrap();
        let err = scan(&ctx, snapshot, request, Some("scan")).err().expect("conflict");
        assert!(err.downcast_ref::<crate::error::TaskError>().is_some());

        drop(hold);
        assert!(blocker.wait().completed().is_some());
    }
}
