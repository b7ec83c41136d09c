#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::{SketchError, SketchResult};

/// Linear-counting estimate of the number of distinct values.
///
/// Run over group-key hashes before the aggregation scan to size hashed tables. Each hash sets
/// one bit of an `m`-bit map; with `u` bits still clear the estimate is `-m * ln(u / m)`.
#[derive(Clone, Debug)]
pub struct NdvEstimator {
    bits: BitVec,
}

impl NdvEstimator {
    pub fn try_new(bits: usize) -> SketchResult<Self> {
        Ok(Self {
            bits: BitVec::try_zeroed(bits.max(64))?,
        })
    }

    pub fn insert_hash(&mut self, hash: u64) {
        let idx = (hash % self.bits.len() as u64) as usize;
        self.bits.set(idx);
    }

    /// Folds in an estimator built over another slice of the input. Both must have the same size.
    pub fn merge(&mut self, other: &NdvEstimator) -> SketchResult<()> {
        if self.bits.len() != other.bits.len() {
            return Err(SketchError::DomainMismatch {
                left_min: 0,
                left_bits: self.bits.len(),
                right_min: 0,
                right_bits: other.bits.len(),
            });
        }
        self.bits.or_inplace(&other.bits);
        Ok(())
    }

    /// `Some(1)` for empty input; `None` once every bit is set and the map carries no
    /// information, in which case callers fall back to a row-count based guess.
    pub fn estimate(&self) -> Option<u64> {
        let total = self.bits.len() as f64;
        let set = self.bits.count_ones();
        if set == 0 {
            return Some(1);
        }
        let unset = self.bits.count_zeros();
        if unset == 0 {
            return None;
        }
        let ratio = unset as f64 / total;
        Some((-total * ratio.ln()).round().max(1.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_i64;

    #[test]
    fn empty_input_estimates_one_group() {
        let est = NdvEstimator::try_new(1 << 12).unwrap();
        assert_eq!(est.estimate(), Some(1));
    }

    #[test]
    fn saturated_map_yields_no_estimate() {
        let mut est = NdvEstimator::try_new(64).unwrap();
        for v in 0..100_000i64 {
            est.insert_hash(hash_i64(v));
        }
        assert_eq!(est.estimate(), None);
    }

    #[test]
    fn duplicates_do_not_inflate_the_estimate() {
        let mut est = NdvEstimator::try_new(1 << 16).unwrap();
        for _ in 0..10 {
            for v in 0..1_000i64 {
                est.insert_hash(hash_i64(v));
            }
        }
        let n = est.estimate().unwrap() as f64;
        assert!((n - 1_000.0).abs() < 50.0, "estimate {n}");
    }

    #[test]
    fn merged_halves_estimate_the_union() {
        let mut left = NdvEstimator::try_new(1 << 16).unwrap();
        let mut right = NdvEstimator::try_new(1 << 16).unwrap();
        for v in 0..1_500i64 {
            left.insert_hash(hash_i64(v));
        }
        for v in 500..2_000i64 {
            right.insert_hash(hash_i64(v));
        }
        left.merge(&right).unwrap();
        let n = left.estimate().unwrap() as f64;
        assert!((n - 2_000.0).abs() < 100.0, "estimate {n}");

        let small = NdvEstimator::try_new(64).unwrap();
        assert!(left.merge(&small).is_err());
    }
}
