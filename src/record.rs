//! Stored row types: raw subscores and overall scores per (timestamp, host)

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Address recorded for hosts the inventory does not resolve.
pub const UNKNOWN_ADDRESS: &str = "UNKNOWN";

/// Metric names emitted by the sysbench benchmark suite.
pub const SYSBENCH_METRICS: [&str; 5] = [
    "cpu_speed_test__events_per_second",
    "fileio_test__reads_per_second",
    "memory_speed_test__MiB_transferred",
    "mutex_test__avg_latency",
    "threads_test__avg_latency",
];

/// Ordered, fixed set of metric names a store is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSchema {
    names: Vec<String>,
}

impl MetricSchema {
    /// Create a schema from metric names.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the list is empty or names a metric twice.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Error::Config("metric schema must name at least one metric".to_string()));
        }
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(Error::Config("metric names must not be blank".to_string()));
            }
            if names[..i].contains(name) {
                return Err(Error::Config(format!("metric '{name}' listed twice")));
            }
        }
        Ok(Self { names })
    }

    /// The sysbench schema used by the stock benchmark playbook.
    #[must_use]
    pub fn sysbench() -> Self {
        Self {
            names: SYSBENCH_METRICS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Metric names in column order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a constructed schema.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether `name` is part of the schema.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Check that `metrics` names exactly the schema's metrics.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` naming the first unknown or missing metric.
    pub fn check(&self, hostname: &str, metrics: &BTreeMap<String, f64>) -> Result<()> {
        if let Some(unknown) = metrics.keys().find(|k| !self.contains(k)) {
            return Err(Error::SchemaMismatch(format!(
                "host '{hostname}' reports unknown metric '{unknown}'"
            )));
        }
        if let Some(missing) = self.names.iter().find(|n| !metrics.contains_key(*n)) {
            return Err(Error::SchemaMismatch(format!(
                "host '{hostname}' is missing metric '{missing}'"
            )));
        }
        Ok(())
    }
}

impl Default for MetricSchema {
    fn default() -> Self {
        Self::sysbench()
    }
}

/// Truncate a round timestamp to the precision the store keeps (microseconds).
#[must_use]
pub fn round_timestamp(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

/// Composite key shared by both tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundKey {
    timestamp: DateTime<Utc>,
    hostname: String,
}

impl RoundKey {
    /// Create a key; the timestamp is truncated to microseconds.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, hostname: impl Into<String>) -> Self {
        Self {
            timestamp: round_timestamp(timestamp),
            hostname: hostname.into(),
        }
    }

    /// Round timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Host name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

/// Raw benchmark subscores for one host in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetricSet {
    key: RoundKey,
    address: String,
    metrics: BTreeMap<String, f64>,
}

impl RawMetricSet {
    /// Build a row holding exactly the schema's metrics.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if `metrics` does not match the schema.
    pub fn new(
        key: RoundKey,
        address: impl Into<String>,
        schema: &MetricSchema,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<Self> {
        let mut row = Self {
            key,
            address: address.into(),
            metrics: BTreeMap::new(),
        };
        row.apply_metrics(schema, metrics)?;
        Ok(row)
    }

    /// Composite key.
    #[must_use]
    pub const fn key(&self) -> &RoundKey {
        &self.key
    }

    /// Round timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.key.timestamp
    }

    /// Host name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.key.hostname
    }

    /// Resolved address, or [`UNKNOWN_ADDRESS`].
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Value of one metric.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// All metric values keyed by name.
    #[must_use]
    pub const fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Overwrite every metric field from `metrics`, one schema field at a time.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` on unknown or missing metrics; the row is
    /// left untouched in that case.
    pub fn apply_metrics(
        &mut self,
        schema: &MetricSchema,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<()> {
        schema.check(&self.key.hostname, metrics)?;
        for name in schema.names() {
            if let Some(value) = metrics.get(name) {
                self.metrics.insert(name.clone(), *value);
            }
        }
        Ok(())
    }
}

/// Overall normalized score for one host in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallScore {
    key: RoundKey,
    address: String,
    score: f64,
}

impl OverallScore {
    /// Create a score row.
    #[must_use]
    pub fn new(key: RoundKey, address: impl Into<String>, score: f64) -> Self {
        Self {
            key,
            address: address.into(),
            score,
        }
    }

    /// Composite key.
    #[must_use]
    pub const fn key(&self) -> &RoundKey {
        &self.key
    }

    /// Round timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.key.timestamp
    }

    /// Host name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.key.hostname
    }

    /// Resolved address, or [`UNKNOWN_ADDRESS`].
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Overall score.
    #[must_use]
    pub const fn score(&self) -> f64 {
        self.score
    }

    /// Overwrite the score field.
    pub fn set_score(&mut self, score: f64) {
        self.score = score;
    }
}
