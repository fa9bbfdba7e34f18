//! Per-element validity bitmap for a snapshot region.
//!
//! One bit per element. Scanners clear bits for elements whose bytes could
//! not be captured; splitting a region along the bitmap turns the valid
//! runs into standalone child regions.

const BITS_PER_WORD: usize = u64::BITS as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityBitmap {
    words: Vec<u64>,
    len: usize,
}

impl ValidityBitmap {
    /// Creates a bitmap of `len` elements, all invalid.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(BITS_PER_WORD)],
            len,
        }
    }

    /// Creates a bitmap of `len` elements, all valid.
    pub fn all_valid(len: usize) -> Self {
        let mut bitmap = Self::new(len);
        bitmap.mark_all_valid();
        bitmap
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn mark_all_valid(&mut self) {
        for word in self.words.iter_mut() {
            *word = !0;
        }
        self.clear_tail();
    }

    pub fn mark_all_invalid(&mut self) {
        for word in self.words.iter_mut() {
            *word = 0;
        }
    }

    pub fn set(&mut self, index: usize, valid: bool) {
        debug_assert!(index < self.len);
        let word = index / BITS_PER_WORD;
        let bit = index % BITS_PER_WORD;
        if valid {
            self.words[word] |= 1u64 << bit;
        } else {
            self.words[word] &= !(1u64 << bit);
        }
    }

    pub fn is_valid(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let word = index / BITS_PER_WORD;
        let bit = index % BITS_PER_WORD;
        (self.words[word] >> bit) & 1 != 0
    }

    /// Number of valid elements.
    pub fn count_valid(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterates maximal runs of valid elements as `(start, len)`.
    pub fn valid_runs(&self) -> ValidRuns<'_> {
        ValidRuns { bitmap: self, index: 0 }
    }

    // Bits past `len` in the last word must stay zero so count_valid is exact.
    fn clear_tail(&mut self) {
        let tail = self.len % BITS_PER_WORD;
        if tail != 0
            && let Some(last) = self.words.last_mut()
        {
            *last &= (1u64 << tail) - 1;
        }
    }
}

pub struct ValidRuns<'a> {
    bitmap: &'a ValidityBitmap,
    index: usize,
}

impl Iterator for ValidRuns<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        while self.index < self.bitmap.len && !self.bitmap.is_valid(self.index) {
            self.index += 1;
        }
        if self.index >= self.bitmap.len {
            return None;
        }
        let start = self.index;
        while self.index < self.bitmap.len && self.bitmap.is_valid(self.index) {
            self.index += 1;
        }
        Some((start, self.index - start))
    }
}
