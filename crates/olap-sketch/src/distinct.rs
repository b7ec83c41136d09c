#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::{SketchError, SketchResult};

/// Exact distinct counter over the integer domain `[min, max]`.
///
/// One bit per domain value; value `v` sets bit `v - min`. Two bitmaps built over the same
/// domain merge with a bitwise OR, and the distinct count is the population count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistinctBitmap {
    min: i64,
    bits: BitVec,
}

impl DistinctBitmap {
    pub fn try_new(min: i64, max: i64) -> SketchResult<Self> {
        let bits = Self::domain_bits(min, max);
        Ok(Self {
            min,
            bits: BitVec::try_zeroed(bits)?,
        })
    }

    /// Number of bits needed for `[min, max]`; saturates on 32-bit targets.
    pub fn domain_bits(min: i64, max: i64) -> usize {
        if max < min {
            return 0;
        }
        let span = (max as i128) - (min as i128) + 1;
        usize::try_from(span).unwrap_or(usize::MAX)
    }

    /// Records `v`. Returns `None` if `v` is outside the domain, otherwise whether `v` was new.
    pub fn update(&mut self, v: i64) -> Option<bool> {
        let offset = (v as i128) - (self.min as i128);
        if offset < 0 || offset >= self.bits.len() as i128 {
            return None;
        }
        Some(self.bits.set(offset as usize))
    }

    pub fn merge(&mut self, other: &DistinctBitmap) -> SketchResult<()> {
        if self.min != other.min || self.bits.len() != other.bits.len() {
            return Err(SketchError::DomainMismatch {
                left_min: self.min,
                left_bits: self.bits.len(),
                right_min: other.min,
                right_bits: other.bits.len(),
            });
        }
        self.bits.or_inplace(&other.bits);
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.bits.count_ones() as u64
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    /// Distinct values present, ascending.
    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        let min = self.min;
        self.bits.iter_ones().map(move |bit| min + bit as i64)
    }

    pub fn heap_bytes(&self) -> usize {
        self.bits.heap_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_domains_are_offset_by_min() {
        let mut bitmap = DistinctBitmap::try_new(-5, 5).unwrap();
        assert_eq!(bitmap.update(-5), Some(true));
        assert_eq!(bitmap.update(5), Some(true));
        assert_eq!(bitmap.update(-5), Some(false));
        assert_eq!(bitmap.update(6), None);
        assert_eq!(bitmap.update(-6), None);
        assert_eq!(bitmap.count(), 2);
        assert_eq!(bitmap.values().collect::<Vec<_>>(), vec![-5, 5]);
    }

    #[test]
    fn merge_rejects_different_domains() {
        let mut a = DistinctBitmap::try_new(0, 9).unwrap();
        let b = DistinctBitmap::try_new(1, 10).unwrap();
        assert!(matches!(
            a.merge(&b),
            Err(SketchError::DomainMismatch { .. })
        ));
    }

    #[test]
    fn domain_bits_handles_extremes() {
        assert_eq!(DistinctBitmap::domain_bits(0, 0), 1);
        assert_eq!(DistinctBitmap::domain_bits(3, 2), 0);
        assert_eq!(DistinctBitmap::domain_bits(-1, 1), 3);
    }
}
