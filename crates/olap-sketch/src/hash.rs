#![forbid(unsafe_code)]

/// splitmix64 finalizer: a fast 64-bit mixer with good avalanche for HLL register selection.
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// FNV-1a over `bytes`, finished with splitmix64.
///
/// Stable across runs and processes; every execution unit must agree on key hashes so that
/// partitions can be sharded consistently during reduction.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    splitmix64(h)
}

pub fn hash_i64(v: i64) -> u64 {
    splitmix64(v as u64)
}

/// Hash of a float with `-0.0` folded onto `0.0` and every NaN folded onto one pattern.
pub fn hash_f64(v: f64) -> u64 {
    splitmix64(canonical_f64_bits(v))
}

pub(crate) fn canonical_f64_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_hash_canonicalizes_zero_and_nan() {
        assert_eq!(hash_f64(0.0), hash_f64(-0.0));
        assert_eq!(hash_f64(f64::NAN), hash_f64(-f64::NAN));
        assert_ne!(hash_f64(1.0), hash_f64(2.0));
    }

    #[test]
    fn byte_hash_is_stable() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }
}
