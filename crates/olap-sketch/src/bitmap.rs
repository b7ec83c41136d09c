#![forbid(unsafe_code)]

use crate::{SketchError, SketchResult};

/// A fixed-length bit vector with a cached population count.
///
/// Bits are stored little-endian within each `u64` word:
/// - bit 0 is the LSB of word 0
/// - bit 63 is the MSB of word 0
///
/// The length is fixed at construction; group-by accumulators size their domain up front and
/// never grow mid-scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitVec {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

impl BitVec {
    /// All-zero vector of `bits` bits, reporting allocation failure instead of aborting.
    pub fn try_zeroed(bits: usize) -> SketchResult<Self> {
        let word_len = bits.div_ceil(64);
        let mut words = Vec::new();
        words
            .try_reserve_exact(word_len)
            .map_err(|_| SketchError::Allocation {
                what: "bit vector",
                bytes: word_len.saturating_mul(8),
            })?;
        words.resize(word_len, 0);
        Ok(Self {
            words,
            len: bits,
            ones: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "BitVec index out of bounds");
        let word = self.words[index / 64];
        ((word >> (index % 64)) & 1) == 1
    }

    /// Sets bit `index`; returns `true` when the bit was previously clear.
    pub fn set(&mut self, index: usize) -> bool {
        debug_assert!(index < self.len, "BitVec index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        if *word & mask != 0 {
            return false;
        }
        *word |= mask;
        self.ones += 1;
        true
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn count_zeros(&self) -> usize {
        self.len - self.ones
    }

    pub fn as_words(&self) -> &[u64] {
        &self.words
    }

    /// Heap bytes owned by this vector.
    pub fn heap_bytes(&self) -> usize {
        self.words.capacity() * std::mem::size_of::<u64>()
    }

    /// In-place union. Both vectors must have the same length.
    pub fn or_inplace(&mut self, other: &BitVec) {
        debug_assert_eq!(self.len, other.len, "BitVec length mismatch");
        let mut ones: usize = 0;
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
            ones += w.count_ones() as usize;
        }
        self.ones = ones;
    }

    /// Indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(word_idx * 64 + bit)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_new_bits_and_tracks_population() {
        let mut bits = BitVec::try_zeroed(130).unwrap();
        assert_eq!(bits.len(), 130);
        assert!(bits.set(0));
        assert!(bits.set(129));
        assert!(!bits.set(129));
        assert_eq!(bits.count_ones(), 2);
        assert_eq!(bits.count_zeros(), 128);
        assert!(bits.get(129));
        assert!(!bits.get(64));
    }

    #[test]
    fn or_recomputes_population() {
        let mut a = BitVec::try_zeroed(70).unwrap();
        let mut b = BitVec::try_zeroed(70).unwrap();
        a.set(1);
        a.set(65);
        b.set(1);
        b.set(2);
        a.or_inplace(&b);
        assert_eq!(a.count_ones(), 3);
        assert_eq!(a.iter_ones().collect::<Vec<_>>(), vec![1, 2, 65]);
    }

    #[test]
    fn zero_length_vector_is_empty() {
        let bits = BitVec::try_zeroed(0).unwrap();
        assert!(bits.is_empty());
        assert_eq!(bits.iter_ones().count(), 0);
    }
}
