//! Non-owning element views into a region's buffers.

use crate::snapshot::region::SnapshotRegion;

/// A run of elements inside one region. Holds no bytes of its own; it is
/// valid only while the parent region is alive.
#[derive(Debug, Clone, Copy)]
pub struct ElementRange<'a> {
    region: &'a SnapshotRegion,
    start_index: usize,
    len: usize,
}

impl<'a> ElementRange<'a> {
    pub fn new(region: &'a SnapshotRegion, start_index: usize, len: usize) -> Self {
        debug_assert!(start_index + len <= region.element_count());
        Self { region, start_index, len }
    }

    /// The whole region as one range.
    pub fn whole(region: &'a SnapshotRegion) -> Self {
        Self::new(region, 0, region.element_count())
    }

    pub fn region(&self) -> &'a SnapshotRegion {
        self.region
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn base_address(&self) -> u64 {
        self.region.address_of_element(self.start_index)
    }

    /// Restartable iteration over the elements of this range.
    pub fn iter(&self) -> ElementIter<'a> {
        ElementIter {
            region: self.region,
            index: self.start_index,
            end: self.start_index + self.len,
        }
    }
}

impl SnapshotRegion {
    /// Iterates the region's valid elements as [`ElementView`]s. The usual
    /// way to read scan results out of a filtered snapshot.
    pub fn elements(&self) -> ElementIter<'_> {
        ElementRange::whole(self).iter()
    }
}

/// One element: its address and both value generations.
#[derive(Debug, Clone, Copy)]
pub struct ElementView<'a> {
    pub index: usize,
    pub address: u64,
    pub current: &'a [u8],
    pub previous: Option<&'a [u8]>,
}

pub struct ElementIter<'a> {
    region: &'a SnapshotRegion,
    index: usize,
    end: usize,
}

impl<'a> Iterator for ElementIter<'a> {
    type Item = ElementView<'a>;

    fn next(&mut self) -> Option<ElementView<'a>> {
        while self.index < self.end {
            let index = self.index;
            self.index += 1;
            if !self.region.is_element_valid(index) {
                continue;
            }
            let Some(current) = self.region.current_element(index) else {
                return None;
            };
            return Some(ElementView {
                index,
                address: self.region.address_of_element(index),
                current,
                previous: self.region.previous_element(index),
            });
        }
        None
    }
}
