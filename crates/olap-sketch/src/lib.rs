//! Mergeable accumulators for group-by aggregation.
//!
//! Every type in this crate is built independently by one execution unit and later folded
//! together with `merge`. Merges are commutative and associative, so the order in which
//! partial results arrive never changes the final answer:
//! - [`DistinctBitmap`]: exact distinct counting over a bounded integer range (bitwise OR).
//! - [`HyperLogLog`]: fixed-memory approximate distinct counting (register-wise max).
//! - [`QuantileDigest`]: bounded t-digest that stays exact for small inputs.
//! - [`NdvEstimator`]: linear-counting estimate of the number of groups, used for table sizing.

#![forbid(unsafe_code)]

mod bitmap;
mod digest;
mod distinct;
mod hash;
mod hll;
mod ndv;

pub use crate::bitmap::BitVec;
pub use crate::digest::{QuantileDigest, DEFAULT_EXACT_THRESHOLD, DEFAULT_MAX_CENTROIDS};
pub use crate::distinct::DistinctBitmap;
pub use crate::hash::{hash_bytes, hash_f64, hash_i64, splitmix64};
pub use crate::hll::{HyperLogLog, DEFAULT_PRECISION, MAX_PRECISION, MIN_PRECISION};
pub use crate::ndv::NdvEstimator;

pub type SketchResult<T> = Result<T, SketchError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SketchError {
    #[error("failed to allocate {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },

    #[error("HyperLogLog precision mismatch: {left} vs {right}")]
    PrecisionMismatch { left: u8, right: u8 },

    #[error("HyperLogLog precision {0} outside supported range 4..=16")]
    InvalidPrecision(u8),

    #[error("bitmap domains differ: [{left_min}; {left_bits}) vs [{right_min}; {right_bits})")]
    DomainMismatch {
        left_min: i64,
        left_bits: usize,
        right_min: i64,
        right_bits: usize,
    },
}
