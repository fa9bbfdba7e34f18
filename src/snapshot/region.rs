//! One contiguous captured memory range.
//!
//! A region owns two generations of bytes: the values captured by the most
//! recent collection pass and the values from the pass before it. Installing
//! new current values always demotes the old ones, so relative scans
//! (changed / unchanged / delta) have exactly one generation of history.

use crate::snapshot::bitmap::ValidityBitmap;

#[derive(Debug, Clone)]
pub struct SnapshotRegion {
    base_address: u64,
    size: usize,
    current_values: Option<Vec<u8>>,
    previous_values: Option<Vec<u8>>,
    element_size: usize,
    alignment: usize,
    valid: Option<ValidityBitmap>,
}

impl SnapshotRegion {
    pub fn new(base_address: u64, size: usize) -> Self {
        Self {
            base_address,
            size,
            current_values: None,
            previous_values: None,
            element_size: 1,
            alignment: 1,
            valid: None,
        }
    }

    /// Region spanning `[address - radius, address + radius)`, clamped at 0.
    pub fn around(address: u64, radius: u64) -> Self {
        let base = address.saturating_sub(radius);
        let size = (address - base) + radius;
        Self::new(base, size as usize)
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn end_address(&self) -> u64 {
        self.base_address + self.size as u64
    }

    pub fn contains_address(&self, address: u64) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Sets the element width and stride used for element-wise iteration.
    /// Re-aligns the base address; any leading unaligned bytes are trimmed.
    pub fn set_element_layout(&mut self, element_size: usize, alignment: usize) {
        debug_assert!(element_size > 0 && alignment > 0);
        self.element_size = element_size;
        self.alignment = alignment;
        self.set_alignment(alignment);
    }

    /// Trims the region so `base_address % alignment == 0`. The size shrinks
    /// by the trimmed amount and never goes negative; captured buffers are
    /// trimmed in step so buffer offsets keep matching addresses.
    pub fn set_alignment(&mut self, alignment: usize) {
        debug_assert!(alignment > 0);
        self.alignment = alignment;
        let misalignment = (self.base_address % alignment as u64) as usize;
        if misalignment == 0 {
            return;
        }
        let trim = alignment - misalignment;
        if trim >= self.size {
            // No aligned byte falls inside the region. Empty it at the next
            // aligned address rather than leaving the base misaligned.
            self.base_address += trim as u64;
            self.size = 0;
            self.current_values = None;
            self.previous_values = None;
            self.valid = None;
            return;
        }
        self.base_address += trim as u64;
        self.size -= trim;
        if let Some(values) = self.current_values.as_mut() {
            values.drain(..trim.min(values.len()));
        }
        if let Some(values) = self.previous_values.as_mut() {
            values.drain(..trim.min(values.len()));
        }
        self.valid = None;
    }

    /// Number of elements at the current layout. Zero when the region is
    /// smaller than one element.
    pub fn element_count(&self) -> usize {
        if self.size < self.element_size {
            return 0;
        }
        (self.size - self.element_size) / self.alignment + 1
    }

    pub fn address_of_element(&self, index: usize) -> u64 {
        self.base_address + (index * self.alignment) as u64
    }

    /// Installs freshly read bytes, demoting the old current values to the
    /// previous generation. `None` marks the region unreadable for this pass.
    pub fn set_current_values(&mut self, values: Option<Vec<u8>>) {
        if let Some(ref values) = values {
            debug_assert_eq!(values.len(), self.size);
        }
        self.previous_values = self.current_values.take();
        self.current_values = values;
    }

    pub fn clear_values(&mut self) {
        self.current_values = None;
        self.previous_values = None;
    }

    pub fn current_values(&self) -> Option<&[u8]> {
        self.current_values.as_deref()
    }

    pub fn previous_values(&self) -> Option<&[u8]> {
        self.previous_values.as_deref()
    }

    pub fn has_current_values(&self) -> bool {
        self.current_values.is_some()
    }

    /// Both generations present and comparable byte for byte.
    pub fn can_compare(&self) -> bool {
        match (&self.current_values, &self.previous_values) {
            (Some(current), Some(previous)) => current.len() == previous.len(),
            _ => false,
        }
    }

    pub fn current_element(&self, index: usize) -> Option<&[u8]> {
        let offset = index * self.alignment;
        self.current_values
            .as_deref()
            .and_then(|values| values.get(offset..offset + self.element_size))
    }

    pub fn previous_element(&self, index: usize) -> Option<&[u8]> {
        let offset = index * self.alignment;
        self.previous_values
            .as_deref()
            .and_then(|values| values.get(offset..offset + self.element_size))
    }

    pub fn set_element_valid(&mut self, index: usize, valid: bool) {
        let count = self.element_count();
        let bitmap = self.valid.get_or_insert_with(|| ValidityBitmap::all_valid(count));
        bitmap.set(index, valid);
    }

    /// Elements default to valid until a bitmap marks them otherwise.
    pub fn is_element_valid(&self, index: usize) -> bool {
        match &self.valid {
            Some(bitmap) => bitmap.is_valid(index),
            None => index < self.element_count(),
        }
    }

    pub fn validity(&self) -> Option<&ValidityBitmap> {
        self.valid.as_ref()
    }

    /// Copies the byte span covering `len` elements starting at element
    /// `start_index` into a standalone region, carrying both generations.
    pub fn subregion(&self, start_index: usize, len: usize) -> SnapshotRegion {
        debug_assert!(len > 0);
        debug_assert!(start_index + len <= self.element_count());
        let byte_offset = start_index * self.alignment;
        let byte_len = (len - 1) * self.alignment + self.element_size;
        let slice_of = |values: &Option<Vec<u8>>| {
            values
                .as_deref()
                .and_then(|v| v.get(byte_offset..byte_offset + byte_len))
                .map(<[u8]>::to_vec)
        };
        SnapshotRegion {
            base_address: self.address_of_element(start_index),
            size: byte_len,
            current_values: slice_of(&self.current_values),
            previous_values: slice_of(&self.previous_values),
            element_size: self.element_size,
            alignment: self.alignment,
            valid: None,
        }
    }

    /// Splits the region along its validity bitmap, one child region per
    /// maximal run of valid elements. A region with no bitmap is returned
    /// whole.
    pub fn split_valid_runs(&self) -> Vec<SnapshotRegion> {
        match &self.valid {
            None => vec![self.clone()],
            Some(bitmap) => bitmap.valid_runs().map(|(start, len)| self.subregion(start, len)).collect(),
        }
    }
}
