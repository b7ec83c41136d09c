#![forbid(unsafe_code)]

use ordered_float::OrderedFloat;
use std::borrow::Cow;

/// Digests holding at most this many values answer quantiles exactly.
pub const DEFAULT_EXACT_THRESHOLD: usize = 128;
/// Compression parameter: upper bound on the number of centroids kept after compression.
pub const DEFAULT_MAX_CENTROIDS: usize = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Centroid {
    mean: OrderedFloat<f64>,
    weight: OrderedFloat<f64>,
}

impl Centroid {
    fn singleton(value: OrderedFloat<f64>) -> Self {
        Self {
            mean: value,
            weight: OrderedFloat(1.0),
        }
    }

    fn absorb(&mut self, sum: f64, weight: f64) {
        if weight == 0.0 {
            return;
        }
        let total = self.weight.0 + weight;
        self.mean = OrderedFloat((self.mean.0 * self.weight.0 + sum) / total);
        self.weight = OrderedFloat(total);
    }
}

/// Mergeable, bounded-size quantile summary (t-digest).
///
/// Values are buffered raw until the buffer exceeds the exact threshold; from then on the digest
/// keeps at most `max_centroids` weighted centroids whose sizes are bounded by the `k_to_q`
/// scale function, tight near the tails and loose around the median.
///
/// While no compression has happened the digest still holds every value, and
/// [`QuantileDigest::quantile`] returns the exact order statistic: position `q * (n - 1)` in
/// sorted order with linear interpolation between neighbours. `q <= 0` and `q >= 1` always
/// return the exact minimum and maximum.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantileDigest {
    exact_threshold: usize,
    max_centroids: usize,
    buffer: Vec<OrderedFloat<f64>>,
    centroids: Vec<Centroid>,
    count: u64,
    min: f64,
    max: f64,
}

impl Default for QuantileDigest {
    fn default() -> Self {
        Self::new(DEFAULT_EXACT_THRESHOLD, DEFAULT_MAX_CENTROIDS)
    }
}

impl QuantileDigest {
    pub fn new(exact_threshold: usize, max_centroids: usize) -> Self {
        Self {
            exact_threshold,
            max_centroids: max_centroids.max(10),
            buffer: Vec::new(),
            centroids: Vec::new(),
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Whether every inserted value is still held verbatim.
    pub fn is_exact(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn centroid_count(&self) -> usize {
        self.centroids.len()
    }

    /// NaN inputs are ignored.
    pub fn update(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.buffer.push(OrderedFloat(value));
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        if self.buffer.len() > self.buffer_limit() {
            self.compress();
        }
    }

    pub fn merge(&mut self, other: &QuantileDigest) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.buffer.extend_from_slice(&other.buffer);

        if self.centroids.is_empty()
            && other.centroids.is_empty()
            && self.buffer.len() <= self.exact_threshold
        {
            return;
        }

        self.centroids.extend_from_slice(&other.centroids);
        self.compress();
    }

    /// Estimated value at quantile `q`, or `None` for an empty digest.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        if q <= 0.0 {
            return Some(self.min);
        }
        if q >= 1.0 {
            return Some(self.max);
        }

        if self.centroids.is_empty() {
            return Some(self.exact_quantile(q));
        }

        let digest = if self.buffer.is_empty() {
            Cow::Borrowed(self)
        } else {
            let mut compressed = self.clone();
            compressed.compress();
            Cow::Owned(compressed)
        };
        Some(digest.interpolate_centroids(q))
    }

    pub fn heap_bytes(&self) -> usize {
        self.buffer.capacity() * std::mem::size_of::<OrderedFloat<f64>>()
            + self.centroids.capacity() * std::mem::size_of::<Centroid>()
    }

    fn buffer_limit(&self) -> usize {
        if self.centroids.is_empty() {
            self.exact_threshold
        } else {
            2 * self.max_centroids
        }
    }

    fn exact_quantile(&self, q: f64) -> f64 {
        let mut values = self.buffer.clone();
        values.sort_unstable();
        let last = values.len() - 1;
        let pos = q * last as f64;
        let lo = (pos.floor() as usize).min(last);
        let hi = (pos.ceil() as usize).min(last);
        let a = values[lo].0;
        let b = values[hi].0;
        if lo == hi || a == b {
            return a;
        }
        a + (b - a) * (pos - lo as f64)
    }

    fn interpolate_centroids(&self, q: f64) -> f64 {
        let total = self.count as f64;
        let rank = q * total;

        let mut prev_center = 0.0;
        let mut prev_mean = self.min;
        let mut cumulative = 0.0;
        for c in &self.centroids {
            let center = cumulative + c.weight.0 / 2.0;
            if rank < center {
                let span = center - prev_center;
                let t = if span > 0.0 {
                    (rank - prev_center) / span
                } else {
                    0.0
                };
                let value = prev_mean + (c.mean.0 - prev_mean) * t;
                return value.clamp(self.min, self.max);
            }
            prev_center = center;
            prev_mean = c.mean.0;
            cumulative += c.weight.0;
        }

        let span = total - prev_center;
        let t = if span > 0.0 {
            (rank - prev_center) / span
        } else {
            1.0
        };
        (prev_mean + (self.max - prev_mean) * t).clamp(self.min, self.max)
    }

    fn k_to_q(k: f64, d: f64) -> f64 {
        let k_div_d = k / d;
        if k_div_d >= 0.5 {
            let base = 1.0 - k_div_d;
            1.0 - 2.0 * base * base
        } else {
            2.0 * k_div_d * k_div_d
        }
    }

    /// Folds the raw buffer into the centroid list and re-bounds centroid sizes.
    fn compress(&mut self) {
        if self.buffer.is_empty() && self.centroids.len() <= self.max_centroids {
            return;
        }

        let mut all = std::mem::take(&mut self.centroids);
        all.extend(self.buffer.drain(..).map(Centroid::singleton));
        all.sort_unstable();

        let total: f64 = all.iter().map(|c| c.weight.0).sum();
        let d = self.max_centroids as f64;
        let mut compressed = Vec::with_capacity(self.max_centroids);

        let mut iter = all.into_iter();
        let Some(mut curr) = iter.next() else {
            return;
        };
        let mut k_limit = 1.0;
        let mut q_limit_times_count = Self::k_to_q(k_limit, d) * total;
        k_limit += 1.0;

        let mut weight_so_far = curr.weight.0;
        let mut sum_to_merge = 0.0;
        let mut weight_to_merge = 0.0;
        for next in iter {
            weight_so_far += next.weight.0;
            if weight_so_far <= q_limit_times_count {
                sum_to_merge += next.mean.0 * next.weight.0;
                weight_to_merge += next.weight.0;
            } else {
                curr.absorb(sum_to_merge, weight_to_merge);
                compressed.push(curr);
                sum_to_merge = 0.0;
                weight_to_merge = 0.0;
                q_limit_times_count = Self::k_to_q(k_limit, d) * total;
                k_limit += 1.0;
                curr = next;
            }
        }
        curr.absorb(sum_to_merge, weight_to_merge);
        compressed.push(curr);
        compressed.sort_unstable();

        self.centroids = compressed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_digest_has_no_quantile() {
        let digest = QuantileDigest::default();
        assert_eq!(digest.quantile(0.5), None);
        assert_eq!(digest.min(), None);
    }

    #[test]
    fn single_value_is_every_quantile() {
        let mut digest = QuantileDigest::default();
        digest.update(4.5);
        for q in [0.0, 0.25, 0.5, 1.0] {
            assert_eq!(digest.quantile(q), Some(4.5));
        }
    }

    #[test]
    fn exact_mode_interpolates_between_neighbours() {
        let mut digest = QuantileDigest::default();
        for v in [4.0, 1.0, 3.0, 2.0] {
            digest.update(v);
        }
        assert!(digest.is_exact());
        // position 0.5 * 3 = 1.5 -> halfway between 2 and 3
        assert_eq!(digest.quantile(0.5), Some(2.5));
        assert_eq!(digest.quantile(0.25), Some(1.75));
    }

    #[test]
    fn nan_inputs_are_ignored() {
        let mut digest = QuantileDigest::default();
        digest.update(f64::NAN);
        digest.update(1.0);
        assert_eq!(digest.count(), 1);
    }

    #[test]
    fn compression_bounds_centroid_count() {
        let mut digest = QuantileDigest::new(16, 50);
        for v in 0..100_000 {
            digest.update(v as f64);
        }
        assert!(!digest.is_exact());
        assert!(digest.centroid_count() <= 2 * 50 + 1);
        let median = digest.quantile(0.5).unwrap();
        assert!((median - 50_000.0).abs() < 5_000.0, "median {median}");
        assert_eq!(digest.quantile(0.0), Some(0.0));
        assert_eq!(digest.quantile(1.0), Some(99_999.0));
    }

    #[test]
    fn merging_small_digests_stays_exact() {
        let mut a = QuantileDigest::new(8, 50);
        let mut b = QuantileDigest::new(8, 50);
        for v in [1.0, 2.0, 3.0] {
            a.update(v);
        }
        for v in [4.0, 5.0] {
            b.update(v);
        }
        a.merge(&b);
        assert!(a.is_exact());
        assert_eq!(a.count(), 5);
        assert_eq!(a.quantile(0.5), Some(3.0));
    }

    #[test]
    fn merging_past_threshold_compresses() {
        let mut a = QuantileDigest::new(8, 50);
        let mut b = QuantileDigest::new(8, 50);
        for v in 0..6 {
            a.update(v as f64);
            b.update((v + 6) as f64);
        }
        a.merge(&b);
        assert!(!a.is_exact());
        assert_eq!(a.count(), 12);
        assert_eq!(a.quantile(0.0), Some(0.0));
        assert_eq!(a.quantile(1.0), Some(11.0));
    }
}
