#![forbid(unsafe_code)]

use crate::{SketchError, SketchResult};

pub const MIN_PRECISION: u8 = 4;
pub const MAX_PRECISION: u8 = 16;
/// 2048 registers, ~2.3% standard error.
pub const DEFAULT_PRECISION: u8 = 11;

/// HyperLogLog distinct-count estimator with `2^p` one-byte registers.
///
/// Inputs are 64-bit hashes; callers hash values with [`crate::hash_i64`],
/// [`crate::hash_f64`] or [`crate::hash_bytes`] so every execution unit agrees on them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HyperLogLog {
    p: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn try_with_precision(p: u8) -> SketchResult<Self> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&p) {
            return Err(SketchError::InvalidPrecision(p));
        }
        let m = 1usize << p;
        let mut registers = Vec::new();
        registers
            .try_reserve_exact(m)
            .map_err(|_| SketchError::Allocation {
                what: "HyperLogLog registers",
                bytes: m,
            })?;
        registers.resize(m, 0);
        Ok(Self { p, registers })
    }

    /// Smallest precision whose standard error `1.04 / sqrt(2^p)` is at most `relative_error`.
    pub fn precision_for_error(relative_error: f64) -> u8 {
        if relative_error.is_nan() || relative_error <= 0.0 {
            return MAX_PRECISION;
        }
        let registers = (1.04 / relative_error).powi(2);
        let p = registers.log2().ceil();
        (p.max(MIN_PRECISION as f64).min(MAX_PRECISION as f64)) as u8
    }

    pub fn precision(&self) -> u8 {
        self.p
    }

    pub fn registers(&self) -> &[u8] {
        &self.registers
    }

    pub fn insert_hash(&mut self, hash: u64) {
        let idx = (hash >> (64 - self.p)) as usize;
        let w = hash << self.p;
        // The low `p` bits of `w` are zero, so the rank is capped at `64 - p + 1`.
        let rank = (w.leading_zeros().min(64 - self.p as u32) + 1) as u8;
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    /// Register-wise maximum. Commutative, associative and idempotent.
    pub fn merge(&mut self, other: &HyperLogLog) -> SketchResult<()> {
        if self.p != other.p {
            return Err(SketchError::PrecisionMismatch {
                left: self.p,
                right: other.p,
            });
        }
        for (r, o) in self.registers.iter_mut().zip(other.registers.iter()) {
            *r = (*r).max(*o);
        }
        Ok(())
    }

    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        let mut inv_sum = 0.0;
        let mut zeros = 0u32;
        for &r in &self.registers {
            inv_sum += 2f64.powi(-(r as i32));
            if r == 0 {
                zeros += 1;
            }
        }

        let raw = alpha * m * m / inv_sum;

        // Small range correction (linear counting).
        if raw <= 2.5 * m && zeros > 0 {
            let z = zeros as f64;
            return (m * (m / z).ln()).round().max(0.0) as u64;
        }

        raw.round().max(0.0) as u64
    }

    pub fn heap_bytes(&self) -> usize {
        self.registers.capacity()
    }
}
