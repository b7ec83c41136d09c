#![forbid(unsafe_code)]

use crate::error::{AggError, AggResult};
use olap_sketch::{DEFAULT_EXACT_THRESHOLD, DEFAULT_MAX_CENTROIDS, DEFAULT_PRECISION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantileOptions {
    /// Digests holding at most this many values return exact order statistics.
    pub exact_threshold: usize,
    /// t-digest compression parameter.
    pub max_centroids: usize,
}

impl Default for QuantileOptions {
    fn default() -> Self {
        Self {
            exact_threshold: DEFAULT_EXACT_THRESHOLD,
            max_centroids: DEFAULT_MAX_CENTROIDS,
        }
    }
}

/// Per-query knobs for the aggregation engine.
///
/// All decisions derived from these (key strategy, slot widths, distinct-count strategy) are
/// made once when the query is planned, before any row is scanned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationOptions {
    /// Upper bound on bytes reserved by all partition tables and the reduced table of a query.
    pub memory_limit_bytes: usize,
    /// Hashed tables grow once `groups / capacity` would exceed this.
    pub hash_load_factor: f64,
    /// Dense key ranges up to this many buckets are always acceptable.
    pub dense_min_buckets: usize,
    /// Otherwise a dense range may use up to this many buckets per expected input row.
    pub dense_buckets_per_row: f64,
    /// Cap for the initial capacity of a hashed table; it grows from there.
    pub max_initial_hash_capacity: usize,
    /// Largest integer domain counted with a bitmap; wider domains use an exact hash set.
    pub max_bitmap_bits: usize,
    /// HyperLogLog precision for `approx_count_distinct` without an explicit error bound.
    pub hll_precision: u8,
    pub quantile: QuantileOptions,
    /// Linear-counting bitmap size for group-count estimation.
    pub ndv_estimator_bits: usize,
    /// Estimator size used when the key range exceeds `large_ndv_threshold`.
    pub large_ndv_estimator_bits: usize,
    pub large_ndv_threshold: u64,
    /// Hashed reductions with fewer total groups than this stay single-threaded.
    pub parallel_reduce_min_groups: usize,
    /// Reducer shards; `0` means one per pool thread.
    pub reduce_workers: usize,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 2 * 1024 * 1024 * 1024,
            hash_load_factor: 0.5,
            dense_min_buckets: 1 << 16,
            dense_buckets_per_row: 2.0,
            max_initial_hash_capacity: 1 << 20,
            max_bitmap_bits: 1 << 28,
            hll_precision: DEFAULT_PRECISION,
            quantile: QuantileOptions::default(),
            ndv_estimator_bits: 1 << 16,
            large_ndv_estimator_bits: 1 << 23,
            large_ndv_threshold: 10_000_000,
            parallel_reduce_min_groups: 1 << 14,
            reduce_workers: 0,
        }
    }
}

impl AggregationOptions {
    pub fn validate(&self) -> AggResult<()> {
        if !(self.hash_load_factor > 0.0 && self.hash_load_factor < 1.0) {
            return Err(AggError::InvalidArgument(format!(
                "hash load factor must lie in (0, 1), got {}",
                self.hash_load_factor
            )));
        }
        if !(olap_sketch::MIN_PRECISION..=olap_sketch::MAX_PRECISION).contains(&self.hll_precision)
        {
            return Err(AggError::InvalidArgument(format!(
                "HyperLogLog precision must lie in {}..={}, got {}",
                olap_sketch::MIN_PRECISION,
                olap_sketch::MAX_PRECISION,
                self.hll_precision
            )));
        }
        if self.dense_buckets_per_row.is_nan() || self.dense_buckets_per_row < 0.0 {
            return Err(AggError::InvalidArgument(format!(
                "dense buckets per row must be non-negative, got {}",
                self.dense_buckets_per_row
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AggregationOptions::default().validate().unwrap();
    }

    #[test]
    fn rejects_degenerate_load_factor() {
        for load in [0.0, 1.0, f64::NAN] {
            let options = AggregationOptions {
                hash_load_factor: load,
                ..AggregationOptions::default()
            };
            assert!(options.validate().unwrap_err().is_plan_error());
        }
    }
}
