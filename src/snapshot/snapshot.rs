//! An ordered, merged collection of captured memory regions.

use anyhow::Result;
use itertools::Itertools;
use log::{Level, debug, log_enabled, warn};

use crate::memory::{RegionEnumerator, RegionFilter};
use crate::snapshot::region::SnapshotRegion;

/// Immutable-for-the-pass set of non-overlapping regions, sorted by base
/// address. Every mutating operation re-establishes that invariant.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    regions: Vec<SnapshotRegion>,
}

impl Snapshot {
    /// Builds a snapshot from arbitrary regions. The regions are sorted and
    /// merged immediately.
    pub fn new(regions: Vec<SnapshotRegion>) -> Self {
        let mut snapshot = Self { regions };
        snapshot.merge();
        snapshot
    }

    /// An empty snapshot. Valid everywhere, comparable nowhere.
    pub fn empty() -> Self {
        Self { regions: Vec::new() }
    }

    /// Snapshots the target's committed readable ranges through the region
    /// enumerator. No values are captured; run a value collection next.
    pub fn query(enumerator: &dyn RegionEnumerator, filter: RegionFilter) -> Result<Self> {
        let infos = enumerator.list_regions(filter)?;
        let regions = infos
            .into_iter()
            .filter(|info| info.protection.is_readable() && info.size > 0)
            .map(|info| SnapshotRegion::new(info.base, info.size))
            .collect();
        Ok(Self::new(regions))
    }

    /// Sorts by base address and merges overlapping or contiguous regions
    /// with a single left-to-right stack sweep. Contiguous regions merge
    /// only when both sides agree on whether they carry values (valued
    /// buffers are concatenated; a valued/unvalued pair stays separate so
    /// no captured bytes are lost). A true overlap involving values is a
    /// logic error and drops the values rather than fabricating bytes.
    pub fn merge(&mut self) {
        if self.regions.len() < 2 {
            return;
        }
        self.regions.sort_by_key(SnapshotRegion::base_address);

        self.regions = std::mem::take(&mut self.regions)
            .into_iter()
            .coalesce(|top, region| {
                let overlapping = top.end_address() > region.base_address();
                let contiguous = top.end_address() == region.base_address();
                if overlapping || (contiguous && top.has_current_values() == region.has_current_values()) {
                    Ok(combine(&top, &region))
                } else {
                    Err((top, region))
                }
            })
            .collect();

        if log_enabled!(Level::Debug) {
            debug!("merged snapshot: {} regions, {} bytes", self.regions.len(), self.byte_count());
        }
    }

    pub fn regions(&self) -> &[SnapshotRegion] {
        &self.regions
    }

    pub(crate) fn regions_mut(&mut self) -> &mut [SnapshotRegion] {
        &mut self.regions
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn byte_count(&self) -> u64 {
        self.regions.iter().map(|r| r.size() as u64).sum()
    }

    pub fn element_count(&self) -> u64 {
        self.regions.iter().map(|r| r.element_count() as u64).sum()
    }

    /// Binary search over the sorted region list.
    pub fn contains_address(&self, address: u64) -> bool {
        self.region_containing(address).is_some()
    }

    pub fn region_containing(&self, address: u64) -> Option<&SnapshotRegion> {
        let idx = self.regions.partition_point(|r| r.base_address() <= address);
        if idx == 0 {
            return None;
        }
        let region = &self.regions[idx - 1];
        region.contains_address(address).then_some(region)
    }

    /// Applies an element layout to every region. Bases are re-aligned; the
    /// sorted non-overlapping invariant survives trimming.
    pub fn set_element_layout(&mut self, element_size: usize, alignment: usize) {
        for region in &mut self.regions {
            region.set_element_layout(element_size, alignment);
        }
        self.regions.retain(|r| r.element_count() > 0);
    }

    pub fn set_alignment(&mut self, alignment: usize) {
        for region in &mut self.regions {
            region.set_alignment(alignment);
        }
        self.regions.retain(|r| r.size() > 0);
    }

    /// True when at least one region carries both value generations, i.e. a
    /// relative (changed/unchanged/delta) scan has something to compare. An
    /// empty snapshot reports false.
    pub fn can_compare(&self) -> bool {
        self.regions.iter().any(SnapshotRegion::can_compare)
    }

    pub fn has_current_values(&self) -> bool {
        self.regions.iter().any(SnapshotRegion::has_current_values)
    }

    pub fn into_regions(self) -> Vec<SnapshotRegion> {
        self.regions
    }

    /// Iterates every valid element across all regions, in address order.
    pub fn elements(&self) -> impl Iterator<Item = crate::snapshot::ElementView<'_>> {
        self.regions.iter().flat_map(SnapshotRegion::elements)
    }
}

/// Combines `top` with an overlapping or contiguous `region` that sorts at
/// or after it.
fn combine(top: &SnapshotRegion, region: &SnapshotRegion) -> SnapshotRegion {
    let base = top.base_address();
    let end = top.end_address().max(region.end_address());
    let size = (end - base) as usize;
    let contiguous = top.end_address() == region.base_address();

    let mut combined = SnapshotRegion::new(base, size);
    combined.set_element_layout(top.element_size(), top.alignment());

    if contiguous && top.has_current_values() && region.has_current_values() {
        let previous = match (top.previous_values(), region.previous_values()) {
            (Some(a), Some(b)) if a.len() == top.size() && b.len() == region.size() => {
                Some([a, b].concat())
            },
            _ => None,
        };
        if let Some(previous) = previous {
            combined.set_current_values(Some(previous));
        }
        let current = [
            top.current_values().unwrap_or_default(),
            region.current_values().unwrap_or_default(),
        ]
        .concat();
        combined.set_current_values(Some(current));
    } else if top.has_current_values() || region.has_current_values() {
        // Overlapping valued regions cannot be merged byte-exactly. This is
        // a logic error upstream; assert in debug builds, log the dropped
        // values in release.
        debug_assert!(
            contiguous,
            "valued snapshot regions overlap: [{:#X}, {:#X}) and [{:#X}, {:#X})",
            top.base_address(),
            top.end_address(),
            region.base_address(),
            region.end_address()
        );
        warn!(
            "dropping values while merging overlapping regions [{:#X}, {:#X}) and [{:#X}, {:#X})",
            top.base_address(),
            top.end_address(),
            region.base_address(),
            region.end_address()
        );
    }

    combined
}
