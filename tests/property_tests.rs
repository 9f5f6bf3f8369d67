//! Property-based tests for the scoring engine
//!
//! - Normalization bounds and degenerate metrics
//! - Equal and custom weighting
//! - Ranking order
//! - Run with ProptestConfig::with_cases(100)

use fleetscore::recover::RawResults;
use fleetscore::scoring::{metric_ranges, normalize, score, MetricWeights, RankedScores, Weighting};
use proptest::prelude::*;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Results for `hosts` hosts over `metrics` metrics named m0, m1, ...
fn arb_results(hosts: std::ops::RangeInclusive<usize>, metrics: usize) -> impl Strategy<Value = RawResults> {
    hosts.prop_flat_map(move |n| {
        proptest::collection::vec(proptest::collection::vec(-1.0e6f64..1.0e6, metrics), n).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, values)| {
                    let metrics: Vec<(String, f64)> =
                        values.into_iter().enumerate().map(|(j, v)| (format!("m{j}"), v)).collect();
                    (format!("host{i}"), metrics)
                })
                .collect()
        })
    })
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: normalized values stay in [0, 100]; the min maps to 0 and the max to 100
    #[test]
    fn prop_normalized_within_bounds(raw in arb_results(2..=12, 3)) {
        let ranges = metric_ranges(&raw).unwrap();
        let normalized = normalize(&raw).unwrap();

        for (host, metrics) in normalized.iter() {
            for (metric, value) in metrics {
                let range = ranges[metric];
                let raw_value = raw.get(host).unwrap()[metric];
                if range.is_degenerate() {
                    prop_assert_eq!(*value, 100.0);
                } else {
                    prop_assert!((-1e-9..=100.0 + 1e-9).contains(value));
                    if raw_value == range.min {
                        prop_assert!(value.abs() < 1e-9);
                    }
                    if raw_value == range.max {
                        prop_assert!((value - 100.0).abs() < 1e-9);
                    }
                }
            }
        }
    }

    /// Property: a metric with identical values everywhere normalizes to 100.0
    #[test]
    fn prop_degenerate_metric_is_100(value in -1.0e6f64..1.0e6, hosts in 1usize..10) {
        let raw: RawResults = (0..hosts)
            .map(|i| (format!("host{i}"), vec![("flat".to_string(), value)]))
            .collect();
        let ranked = score(&raw, &Weighting::Equal).unwrap();
        prop_assert!(ranked.iter().all(|(_, s)| s == 100.0));
    }

    /// Property: equal weighting is the mean of normalized values
    #[test]
    fn prop_equal_weighting_is_mean(raw in arb_results(1..=10, 4)) {
        let normalized = normalize(&raw).unwrap();
        let ranked = score(&raw, &Weighting::Equal).unwrap();

        for (host, metrics) in normalized.iter() {
            let mean = metrics.values().sum::<f64>() / metrics.len() as f64;
            prop_assert!(close(ranked.get(host).unwrap(), mean));
        }
    }

    /// Property: scaling every custom weight by a positive factor changes nothing
    #[test]
    fn prop_weight_scaling_invariant(
        raw in arb_results(2..=8, 2),
        a in 0.1f64..10.0,
        b in 0.1f64..10.0,
        factor in 0.1f64..100.0,
    ) {
        let base = MetricWeights::new([("m0", a), ("m1", b)]).unwrap();
        let scaled = MetricWeights::new([("m0", a * factor), ("m1", b * factor)]).unwrap();

        let x = score(&raw, &Weighting::Custom(base)).unwrap();
        let y = score(&raw, &Weighting::Custom(scaled)).unwrap();
        for (host, s) in x.iter() {
            prop_assert!(close(s, y.get(host).unwrap()));
        }
    }

    /// Property: uniform custom weights match equal weighting
    #[test]
    fn prop_uniform_weights_match_equal(raw in arb_results(2..=8, 3), w in 0.1f64..5.0) {
        let weights = MetricWeights::new([("m0", w), ("m1", w), ("m2", w)]).unwrap();
        let custom = score(&raw, &Weighting::Custom(weights)).unwrap();
        let equal = score(&raw, &Weighting::Equal).unwrap();
        for (host, s) in equal.iter() {
            prop_assert!(close(s, custom.get(host).unwrap()));
        }
    }

    /// Property: ranking is descending and keeps every host once
    #[test]
    fn prop_ranking_descending(raw in arb_results(1..=20, 3)) {
        let ranked = score(&raw, &Weighting::Equal).unwrap();
        prop_assert_eq!(ranked.len(), raw.len());
        let scores: Vec<f64> = ranked.iter().map(|(_, s)| s).collect();
        prop_assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    /// Property: equal scores keep their input order
    #[test]
    fn prop_ranking_stable_on_ties(n in 1usize..30, tie in 0.0f64..100.0) {
        let names: Vec<String> = (0..n).map(|i| format!("host{i}")).collect();
        let ranked = RankedScores::rank(names.iter().map(|h| (h.clone(), tie)));
        let order: Vec<&str> = ranked.iter().map(|(h, _)| h).collect();
        prop_assert_eq!(order, names.iter().map(String::as_str).collect::<Vec<_>>());
    }
}

#[test]
fn test_weights_two_two_equal_one_one() {
    let raw: RawResults = [
        ("a", vec![("A".to_string(), 1.0), ("B".to_string(), 9.0)]),
        ("b", vec![("A".to_string(), 5.0), ("B".to_string(), 3.0)]),
        ("c", vec![("A".to_string(), 3.0), ("B".to_string(), 4.0)]),
    ]
    .into_iter()
    .collect();

    let twos = score(&raw, &Weighting::Custom(MetricWeights::new([("A", 2.0), ("B", 2.0)]).unwrap())).unwrap();
    let ones = score(&raw, &Weighting::Custom(MetricWeights::new([("A", 1.0), ("B", 1.0)]).unwrap())).unwrap();
    assert_eq!(twos, ones);
}
