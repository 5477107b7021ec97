// src/core/bitmap.rs

//! Fixed-width bitsets over dense indices.
//!
//! Every set of nodes the controller works with (partition membership, job
//! allocations, up/idle tracking) is a `Bitmap` over the node index space
//! assigned at configuration load. The same type doubles as a QOS id set in
//! the preemption graph.

use std::fmt;

const WORD_BITS: usize = 64;

/// A fixed-width bitset. The width is fixed at construction; all binary
/// operations require both operands to have the same width.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Bitmap {
    bits: usize,
    words: Vec<u64>,
}

impl Bitmap {
    /// Creates an empty bitmap of the given width.
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            words: vec![0; bits.div_ceil(WORD_BITS)],
        }
    }

    /// Creates a bitmap of the given width with every bit set.
    pub fn filled(bits: usize) -> Self {
        let mut b = Self::new(bits);
        for i in 0..bits {
            b.set(i);
        }
        b
    }

    /// Builds a bitmap of the given width from a list of set indices.
    /// Out-of-range indices are ignored.
    pub fn from_indices(bits: usize, indices: &[usize]) -> Self {
        let mut b = Self::new(bits);
        for &i in indices {
            if i < bits {
                b.set(i);
            }
        }
        b
    }

    /// The width of the bitmap in bits.
    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.bits, "bit index {index} out of range");
        if index < self.bits {
            self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
        }
    }

    pub fn clear(&mut self, index: usize) {
        if index < self.bits {
            self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
        }
    }

    pub fn test(&self, index: usize) -> bool {
        index < self.bits && (self.words[index / WORD_BITS] >> (index % WORD_BITS)) & 1 == 1
    }

    /// Clears every bit.
    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// In-place intersection. Panics in debug builds on width mismatch.
    pub fn and(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.bits, other.bits, "bitmap width mismatch");
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= *b;
        }
    }

    /// In-place union. Panics in debug builds on width mismatch.
    pub fn or(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.bits, other.bits, "bitmap width mismatch");
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }

    /// In-place difference: clears every bit that is set in `other`.
    pub fn and_not(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.bits, other.bits, "bitmap width mismatch");
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= !*b;
        }
    }

    /// Returns a new bitmap holding the intersection.
    pub fn intersection(&self, other: &Bitmap) -> Bitmap {
        let mut out = self.clone();
        out.and(other);
        out
    }

    /// True when every bit set in `other` is also set in `self`.
    pub fn is_superset_of(&self, other: &Bitmap) -> bool {
        debug_assert_eq!(self.bits, other.bits, "bitmap width mismatch");
        self.words
            .iter()
            .zip(&other.words)
            .all(|(a, b)| a & b == *b)
    }

    /// True when no bit is set in both.
    pub fn is_disjoint(&self, other: &Bitmap) -> bool {
        self.words.iter().zip(&other.words).all(|(a, b)| a & b == 0)
    }

    /// Index of the first set bit, if any.
    pub fn first_set(&self) -> Option<usize> {
        self.iter_set().next()
    }

    /// Iterates over the indices of set bits, ascending.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.bits).filter(move |&i| self.test(i))
    }

    /// Finds the start of the first run of `run_len` consecutive set bits.
    /// Used by the selector when a job demands contiguous nodes.
    pub fn find_contiguous_run(&self, run_len: usize) -> Option<usize> {
        if run_len == 0 {
            return None;
        }
        let mut run_start = None;
        let mut run = 0usize;
        for i in 0..self.bits {
            if self.test(i) {
                if run == 0 {
                    run_start = Some(i);
                }
                run += 1;
                if run >= run_len {
                    return run_start;
                }
            } else {
                run = 0;
                run_start = None;
            }
        }
        None
    }

    /// Renders the bitmap as a hex string, most-significant word first.
    /// This is the form used in log messages.
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(self.words.len() * 8);
        for w in self.words.iter().rev() {
            bytes.extend_from_slice(&w.to_be_bytes());
        }
        format!("0x{}", hex::encode(bytes))
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({}, {})", self.bits, self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_test_clear() {
        let mut b = Bitmap::new(130);
        assert!(!b.test(0));
        b.set(0);
        b.set(64);
        b.set(129);
        assert!(b.test(0) && b.test(64) && b.test(129));
        assert_eq!(b.count(), 3);
        b.clear(64);
        assert!(!b.test(64));
        assert_eq!(b.count(), 2);
    }

    #[test]
    fn superset_and_disjoint() {
        let a = Bitmap::from_indices(8, &[0, 1, 2]);
        let b = Bitmap::from_indices(8, &[1, 2]);
        let c = Bitmap::from_indices(8, &[5]);
        assert!(a.is_superset_of(&b));
        assert!(!b.is_superset_of(&a));
        assert!(a.is_disjoint(&c));
    }

    #[test]
    fn contiguous_run() {
        let b = Bitmap::from_indices(8, &[0, 1, 3, 4, 5]);
        assert_eq!(b.find_contiguous_run(2), Some(0));
        assert_eq!(b.find_contiguous_run(3), Some(3));
        assert_eq!(b.find_contiguous_run(4), None);
    }
}
