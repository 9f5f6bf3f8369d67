//! Normalization and scoring engine
//!
//! Turns host -> {metric -> raw value} into one comparable score per host:
//!
//! 1. min-max normalize every metric across hosts onto `[0, 100]`
//!    (a metric with no spread normalizes to exactly `100.0` everywhere),
//! 2. combine a host's normalized values by equal or custom weights,
//! 3. rank hosts by descending score, ties kept in input order.

use std::collections::BTreeMap;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::recover::RawResults;
use crate::record::SYSBENCH_METRICS;
use crate::{Error, Result};

/// Normalized value assigned to every host for a metric with max == min.
pub const DEGENERATE_SCORE: f64 = 100.0;

/// Per-metric weights, renormalized to sum to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricWeights {
    weights: BTreeMap<String, f64>,
}

impl MetricWeights {
    /// Validate and renormalize raw weights.
    ///
    /// Negative weights are accepted as given.
    ///
    /// # Errors
    ///
    /// Returns `InvalidWeights` if the weights sum to zero or to a
    /// non-finite total.
    pub fn new<I, S>(weights: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let raw: BTreeMap<String, f64> = weights.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let total: f64 = raw.values().sum();
        if total == 0.0 {
            return Err(Error::InvalidWeights("sum of custom weights must not be zero".to_string()));
        }
        if !total.is_finite() {
            return Err(Error::InvalidWeights(format!("sum of custom weights is {total}")));
        }
        Ok(Self {
            weights: raw.into_iter().map(|(k, v)| (k, v / total)).collect(),
        })
    }

    /// Weights of the standalone sysbench scorer: CPU and memory throughput
    /// count double, the two latency tests half.
    #[must_use]
    pub fn sysbench_default() -> Self {
        let raw = [2.0, 1.0, 2.0, 0.5, 0.5];
        let total: f64 = raw.iter().sum();
        Self {
            weights: SYSBENCH_METRICS
                .iter()
                .zip(raw)
                .map(|(name, w)| ((*name).to_string(), w / total))
                .collect(),
        }
    }

    /// Renormalized weight of `metric`.
    #[must_use]
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.weights.get(metric).copied()
    }

    /// Iterate over (metric, renormalized weight).
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of weighted metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Whether no metric is weighted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// How normalized metric values combine into an overall score.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Weighting {
    /// Arithmetic mean of the normalized values.
    #[default]
    Equal,
    /// Weighted sum using renormalized weights.
    Custom(MetricWeights),
}

/// Observed range of one metric across hosts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricRange {
    /// Smallest raw value
    pub min: f64,
    /// Largest raw value
    pub max: f64,
}

impl MetricRange {
    /// Whether the metric has no spread across hosts.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_degenerate(&self) -> bool {
        self.max == self.min
    }

    /// Min-max normalize `value` onto `[0, 100]`.
    #[must_use]
    pub fn normalize(&self, value: f64) -> f64 {
        if self.is_degenerate() {
            DEGENERATE_SCORE
        } else {
            (value - self.min) / (self.max - self.min) * 100.0
        }
    }
}

/// Compute every metric's min and max across hosts.
///
/// # Errors
///
/// Returns `SchemaMismatch` if hosts report different metric sets or a host
/// reports no metric at all.
pub fn metric_ranges(raw: &RawResults) -> Result<BTreeMap<String, MetricRange>> {
    let mut hosts = raw.iter();
    let Some((first_host, first)) = hosts.next() else {
        return Ok(BTreeMap::new());
    };
    if first.is_empty() {
        return Err(Error::SchemaMismatch(format!("host '{first_host}' reports no metrics")));
    }

    let mut ranges: BTreeMap<String, MetricRange> = first
        .iter()
        .map(|(k, v)| (k.clone(), MetricRange { min: *v, max: *v }))
        .collect();

    for (host, metrics) in hosts {
        if metrics.len() != ranges.len() || metrics.keys().any(|k| !ranges.contains_key(k)) {
            return Err(Error::SchemaMismatch(format!(
                "host '{host}' reports metrics {:?}, expected {:?}",
                metrics.keys().collect::<Vec<_>>(),
                ranges.keys().collect::<Vec<_>>()
            )));
        }
        for (metric, value) in metrics {
            if let Some(range) = ranges.get_mut(metric) {
                range.min = range.min.min(*value);
                range.max = range.max.max(*value);
            }
        }
    }
    Ok(ranges)
}

/// Min-max normalize every host's metrics.
///
/// # Errors
///
/// Returns `SchemaMismatch` under the same conditions as [`metric_ranges`].
pub fn normalize(raw: &RawResults) -> Result<RawResults> {
    let ranges = metric_ranges(raw)?;
    Ok(raw
        .iter()
        .map(|(host, metrics)| {
            let normalized: Vec<(String, f64)> = metrics
                .iter()
                .map(|(metric, value)| {
                    let range = ranges[metric.as_str()];
                    (metric.clone(), range.normalize(*value))
                })
                .collect();
            (host, normalized)
        })
        .collect())
}

/// Score and rank every host.
///
/// # Errors
///
/// Returns `SchemaMismatch` if hosts disagree on their metric sets and
/// `InvalidWeights` if custom weights do not name every metric.
pub fn score(raw: &RawResults, weighting: &Weighting) -> Result<RankedScores> {
    let normalized = normalize(raw)?;

    if let Weighting::Custom(weights) = weighting {
        if let Some((_, metrics)) = normalized.iter().next() {
            if let Some(missing) = metrics.keys().find(|m| weights.get(m).is_none()) {
                return Err(Error::InvalidWeights(format!("no weight given for metric '{missing}'")));
            }
        }
    }

    let scores = normalized.iter().map(|(host, metrics)| {
        let overall = match weighting {
            Weighting::Equal => {
                #[allow(clippy::cast_precision_loss)]
                let count = metrics.len() as f64;
                metrics.values().sum::<f64>() / count
            }
            Weighting::Custom(weights) => metrics
                .iter()
                .map(|(metric, value)| value * weights.get(metric).unwrap_or(0.0))
                .sum(),
        };
        (host.to_string(), overall)
    });
    Ok(RankedScores::rank(scores))
}

/// Overall scores ordered by descending score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedScores {
    entries: Vec<(String, f64)>,
}

impl RankedScores {
    /// Rank scores; equal scores keep their input order.
    pub fn rank<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut entries: Vec<(String, f64)> =
            scores.into_iter().map(|(h, s)| (h.into(), s)).collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        Self { entries }
    }

    /// Score of `hostname`.
    #[must_use]
    pub fn get(&self, hostname: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(h, _)| h == hostname)
            .map(|(_, s)| *s)
    }

    /// Iterate in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(h, s)| (h.as_str(), *s))
    }

    /// Best `k` hosts.
    #[must_use]
    pub fn top(&self, k: usize) -> &[(String, f64)] {
        &self.entries[..k.min(self.entries.len())]
    }

    /// Number of ranked hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was ranked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for RankedScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (host, score) in &self.entries {
            map.serialize_entry(host, score)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RankedScores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ScoresVisitor;

        impl<'de> Visitor<'de> for ScoresVisitor {
            type Value = RankedScores;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of hostname to numeric score")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((host, score)) = access.next_entry::<String, f64>()? {
                    entries.push((host, score));
                }
                Ok(RankedScores::rank(entries))
            }
        }

        deserializer.deserialize_map(ScoresVisitor)
    }
}
