use olap_sketch::QuantileDigest;
use pretty_assertions::assert_eq;

/// Twenty doubles; the sorted middle pair is (2.3, 2.3).
const FIXTURE: [f64; 20] = [
    2.2, 2.2, 2.2, 2.2, 2.2, 2.3, 2.4, 2.4, 2.4, 2.4, 2.4, 2.5, 2.5, 2.6, 2.6, 2.1, 2.1, 2.1, 2.1,
    2.3,
];

fn digest_of(values: &[f64]) -> QuantileDigest {
    let mut digest = QuantileDigest::default();
    for &v in values {
        digest.update(v);
    }
    digest
}

#[test]
fn small_fixture_median_is_exact() {
    let digest = digest_of(&FIXTURE);
    assert!(digest.is_exact());
    assert_eq!(digest.quantile(0.5), Some(2.3));
}

#[test]
fn small_fixture_extremes_are_exact() {
    let digest = digest_of(&FIXTURE);
    assert_eq!(digest.quantile(0.0), Some(2.1));
    assert_eq!(digest.quantile(1.0), Some(2.6));
}

#[test]
fn small_fixture_is_exact_after_partial_merges() {
    // Split the fixture across four "execution units" and merge in two different orders.
    let parts: Vec<QuantileDigest> = FIXTURE.chunks(5).map(digest_of).collect();

    let mut forward = QuantileDigest::default();
    for part in &parts {
        forward.merge(part);
    }
    let mut backward = QuantileDigest::default();
    for part in parts.iter().rev() {
        backward.merge(part);
    }

    for digest in [&forward, &backward] {
        assert_eq!(digest.count(), 20);
        assert_eq!(digest.quantile(0.5), Some(2.3));
        assert_eq!(digest.quantile(0.0), Some(2.1));
        assert_eq!(digest.quantile(1.0), Some(2.6));
    }
}

#[test]
fn exactness_holds_up_to_configured_threshold() {
    let mut digest = QuantileDigest::new(20, 100);
    for v in (0..20).rev() {
        digest.update(v as f64);
    }
    assert!(digest.is_exact());
    // position 0.1 * 19 = 1.9
    let p10 = digest.quantile(0.1).unwrap();
    assert!((p10 - 1.9).abs() < 1e-12, "p10 {p10}");

    digest.update(20.0);
    assert!(!digest.is_exact());
}

#[test]
fn large_inputs_stay_bounded_and_accurate() {
    let mut a = QuantileDigest::default();
    let mut b = QuantileDigest::default();
    for i in 0..200_000u64 {
        // Interleave so both halves cover the whole range.
        let v = ((i * 7919) % 200_000) as f64;
        if i % 2 == 0 {
            a.update(v);
        } else {
            b.update(v);
        }
    }
    a.merge(&b);
    assert_eq!(a.count(), 200_000);
    for (q, expected) in [(0.1, 20_000.0), (0.5, 100_000.0), (0.9, 180_000.0)] {
        let got = a.quantile(q).unwrap();
        assert!(
            (got - expected).abs() / 200_000.0 < 0.02,
            "q={q} expected ~{expected}, got {got}"
        );
    }
}
