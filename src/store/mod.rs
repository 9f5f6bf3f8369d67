//! Record store: the two time-indexed tables rounds are merged into
//!
//! Both tables are uniquely keyed by (timestamp, hostname). The ingestion
//! merger needs point lookup, insert, and field-level update; readers of
//! history need range scans by timestamp. All writes of one ingestion call
//! travel in a single [`Transaction`] and become visible together.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use fleetscore::record::{MetricSchema, OverallScore, RoundKey};
//! use fleetscore::store::{MemoryStore, RecordStore, Transaction, Write};
//!
//! # async fn example() -> fleetscore::Result<()> {
//! let store = MemoryStore::new(MetricSchema::new(["cpu"])?);
//! let key = RoundKey::new(Utc::now(), "node-a");
//!
//! let mut tx = Transaction::new();
//! tx.push(Write::InsertScore(OverallScore::new(key.clone(), "10.0.0.1", 88.0)));
//! store.commit(tx).await?;
//!
//! assert!(store.find_score(&key).await?.is_some());
//! # Ok(())
//! # }
//! ```

mod memory;
mod parquet_store;

pub use self::memory::MemoryStore;
pub use self::parquet_store::ParquetStore;

use std::collections::{BTreeMap, HashSet};
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::record::{MetricSchema, OverallScore, RawMetricSet, RoundKey};
use crate::{Error, Result};

/// One write inside a [`Transaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Insert a new raw subscore row; the key must be free.
    InsertRaw(RawMetricSet),
    /// Overwrite the metric fields of an existing raw row.
    UpdateRawMetrics {
        /// Row to update
        key: RoundKey,
        /// New values for every schema metric
        metrics: BTreeMap<String, f64>,
    },
    /// Insert a new overall score row; the key must be free.
    InsertScore(OverallScore),
    /// Overwrite the score field of an existing row.
    UpdateScore {
        /// Row to update
        key: RoundKey,
        /// New overall score
        score: f64,
    },
}

/// Ordered batch of writes committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    writes: Vec<Write>,
}

impl Transaction {
    /// Create an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write.
    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    /// Writes in commit order.
    #[must_use]
    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    /// Number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether the transaction carries no write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Check every write against the current table contents before any of
    /// them is applied.
    ///
    /// # Errors
    ///
    /// Returns `Storage` for a duplicate insert or an update of an absent
    /// row, and `SchemaMismatch` for metrics outside `schema`.
    pub fn validate(
        &self,
        schema: &MetricSchema,
        raw_exists: impl Fn(&RoundKey) -> bool,
        score_exists: impl Fn(&RoundKey) -> bool,
    ) -> Result<()> {
        let mut new_raw: HashSet<&RoundKey> = HashSet::new();
        let mut new_scores: HashSet<&RoundKey> = HashSet::new();

        for write in &self.writes {
            match write {
                Write::InsertRaw(row) => {
                    schema.check(row.hostname(), row.metrics())?;
                    if raw_exists(row.key()) || !new_raw.insert(row.key()) {
                        return Err(duplicate("raw_benchmark_subscores", row.key()));
                    }
                }
                Write::UpdateRawMetrics { key, metrics } => {
                    schema.check(key.hostname(), metrics)?;
                    if !raw_exists(key) && !new_raw.contains(key) {
                        return Err(absent("raw_benchmark_subscores", key));
                    }
                }
                Write::InsertScore(row) => {
                    if score_exists(row.key()) || !new_scores.insert(row.key()) {
                        return Err(duplicate("overall_normalized_score", row.key()));
                    }
                }
                Write::UpdateScore { key, .. } => {
                    if !score_exists(key) && !new_scores.contains(key) {
                        return Err(absent("overall_normalized_score", key));
                    }
                }
            }
        }
        Ok(())
    }
}

fn duplicate(table: &str, key: &RoundKey) -> Error {
    Error::Storage(format!(
        "{table}: row ({}, {}) already exists",
        key.timestamp(),
        key.hostname()
    ))
}

fn absent(table: &str, key: &RoundKey) -> Error {
    Error::Storage(format!(
        "{table}: no row ({}, {}) to update",
        key.timestamp(),
        key.hostname()
    ))
}

/// Store contract for raw subscores and overall scores.
pub trait RecordStore: Send + Sync {
    /// Metric schema the raw table is bound to.
    fn schema(&self) -> &MetricSchema;

    /// Point lookup of a raw subscore row.
    fn find_raw(&self, key: &RoundKey) -> impl Future<Output = Result<Option<RawMetricSet>>> + Send;

    /// Point lookup of an overall score row.
    fn find_score(&self, key: &RoundKey)
        -> impl Future<Output = Result<Option<OverallScore>>> + Send;

    /// Apply every write of `tx`, or none of them.
    fn commit(&self, tx: Transaction) -> impl Future<Output = Result<()>> + Send;

    /// Raw rows at or after `cutoff` (all rows for `None`), ordered by
    /// (timestamp, hostname).
    fn raw_since(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<Vec<RawMetricSet>>> + Send;

    /// Score rows at or after `cutoff` (all rows for `None`), ordered by
    /// (timestamp, hostname).
    fn scores_since(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<Vec<OverallScore>>> + Send;
}

/// Plain ordered tables, used by stores that snapshot and persist whole
/// tables on commit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) raw: BTreeMap<RoundKey, RawMetricSet>,
    pub(crate) scores: BTreeMap<RoundKey, OverallScore>,
}

impl Tables {
    pub(crate) fn apply(&mut self, schema: &MetricSchema, tx: Transaction) -> Result<()> {
        tx.validate(
            schema,
            |k| self.raw.contains_key(k),
            |k| self.scores.contains_key(k),
        )?;
        for write in tx.writes {
            match write {
                Write::InsertRaw(row) => {
                    self.raw.insert(row.key().clone(), row);
                }
                Write::UpdateRawMetrics { key, metrics } => {
                    if let Some(row) = self.raw.get_mut(&key) {
                        row.apply_metrics(schema, &metrics)?;
                    }
                }
                Write::InsertScore(row) => {
                    self.scores.insert(row.key().clone(), row);
                }
                Write::UpdateScore { key, score } => {
                    if let Some(row) = self.scores.get_mut(&key) {
                        row.set_score(score);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn raw_since(&self, cutoff: Option<DateTime<Utc>>) -> Vec<RawMetricSet> {
        self.raw
            .values()
            .filter(|row| cutoff.map_or(true, |c| row.timestamp() >= c))
            .cloned()
            .collect()
    }

    pub(crate) fn scores_since(&self, cutoff: Option<DateTime<Utc>>) -> Vec<OverallScore> {
        self.scores
            .values()
            .filter(|row| cutoff.map_or(true, |c| row.timestamp() >= c))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UNKNOWN_ADDRESS;
    use chrono::TimeZone;

    fn schema() -> MetricSchema {
        MetricSchema::new(["cpu", "io"]).unwrap()
    }

    fn metrics(cpu: f64, io: f64) -> BTreeMap<String, f64> {
        [("cpu".to_string(), cpu), ("io".to_string(), io)].into_iter().collect()
    }

    fn key(host: &str) -> RoundKey {
        RoundKey::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(), host)
    }

    #[test]
    fn test_validate_rejects_duplicate_insert_in_same_tx() {
        let row = RawMetricSet::new(key("a"), UNKNOWN_ADDRESS, &schema(), &metrics(1.0, 2.0)).unwrap();
        let mut tx = Transaction::new();
        tx.push(Write::InsertRaw(row.clone()));
        tx.push(Write::InsertRaw(row));
        let err = tx.validate(&schema(), |_| false, |_| false).unwrap_err();
        assert!(matches!(err, Error::Storage(msg) if msg.contains("already exists")));
    }

    #[test]
    fn test_validate_rejects_update_of_absent_row() {
        let mut tx = Transaction::new();
        tx.push(Write::UpdateScore { key: key("a"), score: 1.0 });
        assert!(tx.validate(&schema(), |_| false, |_| false).is_err());
        assert!(tx.validate(&schema(), |_| false, |_| true).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_metric_in_update() {
        let mut bad = metrics(1.0, 2.0);
        bad.insert("gpu".to_string(), 3.0);
        let mut tx = Transaction::new();
        tx.push(Write::UpdateRawMetrics { key: key("a"), metrics: bad });
        let err = tx.validate(&schema(), |_| true, |_| true).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }

    #[test]
    fn test_tables_apply_is_all_or_nothing() {
        let mut tables = Tables::default();
        let mut tx = Transaction::new();
        tx.push(Write::InsertScore(OverallScore::new(key("a"), UNKNOWN_ADDRESS, 10.0)));
        tx.push(Write::UpdateScore { key: key("b"), score: 5.0 });

        assert!(tables.apply(&schema(), tx).is_err());
        assert!(tables.scores.is_empty());
    }

    #[test]
    fn test_tables_since_filters_and_orders() {
        let mut tables = Tables::default();
        let early = RoundKey::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), "b");
        let late_b = RoundKey::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(), "b");
        let late_a = RoundKey::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(), "a");
        let mut tx = Transaction::new();
        for k in [&late_b, &early, &late_a] {
            tx.push(Write::InsertScore(OverallScore::new(k.clone(), UNKNOWN_ADDRESS, 1.0)));
        }
        tables.apply(&schema(), tx).unwrap();

        let cutoff = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let rows = tables.scores_since(Some(cutoff));
        let hosts: Vec<&str> = rows.iter().map(OverallScore::hostname).collect();
        assert_eq!(hosts, vec!["a", "b"]);
        assert_eq!(tables.scores_since(None).len(), 3);
    }
}
