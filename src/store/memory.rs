//! In-memory record store using `DashMap`.
//!
//! Data is lost on process restart; use [`ParquetStore`](super::ParquetStore)
//! for durable history.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{RecordStore, Transaction, Write};
use crate::record::{MetricSchema, OverallScore, RawMetricSet, RoundKey};
use crate::Result;

/// In-memory record store backed by lock-free concurrent hashmaps.
///
/// Lookups never block. Commits are serialized so a transaction is
/// validated against a stable view of both tables before it is applied.
pub struct MemoryStore {
    schema: MetricSchema,
    raw: DashMap<RoundKey, RawMetricSet>,
    scores: DashMap<RoundKey, OverallScore>,
    commit_lock: Mutex<()>,
}

impl MemoryStore {
    /// Create an empty store bound to `schema`.
    #[must_use]
    pub fn new(schema: MetricSchema) -> Self {
        Self {
            schema,
            raw: DashMap::new(),
            scores: DashMap::new(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Number of raw subscore rows.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    /// Number of overall score rows.
    #[must_use]
    pub fn score_len(&self) -> usize {
        self.scores.len()
    }

    /// Whether both tables are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.scores.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MetricSchema::sysbench())
    }
}

impl RecordStore for MemoryStore {
    fn schema(&self) -> &MetricSchema {
        &self.schema
    }

    async fn find_raw(&self, key: &RoundKey) -> Result<Option<RawMetricSet>> {
        Ok(self.raw.get(key).map(|row| row.value().clone()))
    }

    async fn find_score(&self, key: &RoundKey) -> Result<Option<OverallScore>> {
        Ok(self.scores.get(key).map(|row| row.value().clone()))
    }

    async fn commit(&self, tx: Transaction) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        tx.validate(
            &self.schema,
            |k| self.raw.contains_key(k),
            |k| self.scores.contains_key(k),
        )?;

        for write in tx.writes {
            match write {
                Write::InsertRaw(row) => {
                    self.raw.insert(row.key().clone(), row);
                }
                Write::UpdateRawMetrics { key, metrics } => {
                    if let Some(mut row) = self.raw.get_mut(&key) {
                        row.apply_metrics(&self.schema, &metrics)?;
                    }
                }
                Write::InsertScore(row) => {
                    self.scores.insert(row.key().clone(), row);
                }
                Write::UpdateScore { key, score } => {
                    if let Some(mut row) = self.scores.get_mut(&key) {
                        row.set_score(score);
                    }
                }
            }
        }
        Ok(())
    }

    async fn raw_since(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<RawMetricSet>> {
        let mut rows: Vec<RawMetricSet> = self
            .raw
            .iter()
            .filter(|row| cutoff.map_or(true, |c| row.timestamp() >= c))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(rows)
    }

    async fn scores_since(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<OverallScore>> {
        let mut rows: Vec<OverallScore> = self
            .scores
            .iter()
            .filter(|row| cutoff.map_or(true, |c| row.timestamp() >= c))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(rows)
    }
}
