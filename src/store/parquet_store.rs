//! Durable record store persisted as two Parquet files.
//!
//! ```text
//! <data_dir>/raw_benchmark_subscores.parquet
//!     timestamp (µs, UTC) | hostname | address | <metric 1> | ... | <metric N>
//! <data_dir>/overall_normalized_score.parquet
//!     timestamp (µs, UTC) | hostname | address | overall_score
//! ```
//!
//! Tables are held in memory and rewritten in full on every commit: each
//! file is written to a temporary sibling and renamed into place, so a crash
//! mid-commit leaves the previous version readable. History tables grow by
//! one row per host per round, which keeps full rewrites small.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{RecordStore, Tables, Transaction};
use crate::record::{MetricSchema, OverallScore, RawMetricSet, RoundKey};
use crate::{Error, Result};

const RAW_FILE: &str = "raw_benchmark_subscores.parquet";
const SCORE_FILE: &str = "overall_normalized_score.parquet";
const SCORE_COLUMN: &str = "overall_score";

/// Record store persisted under a data directory.
pub struct ParquetStore {
    dir: PathBuf,
    schema: MetricSchema,
    tables: RwLock<Tables>,
}

impl ParquetStore {
    /// Open (or create) the store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if existing files cannot be read or their columns
    /// do not match `schema`.
    pub fn open(dir: impl Into<PathBuf>, schema: MetricSchema) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut tables = Tables::default();
        let raw_path = dir.join(RAW_FILE);
        if raw_path.exists() {
            for batch in read_batches(&raw_path)? {
                for row in decode_raw(&batch, &schema)? {
                    tables.raw.insert(row.key().clone(), row);
                }
            }
        }
        let score_path = dir.join(SCORE_FILE);
        if score_path.exists() {
            for batch in read_batches(&score_path)? {
                for row in decode_scores(&batch)? {
                    tables.scores.insert(row.key().clone(), row);
                }
            }
        }

        info!(
            dir = %dir.display(),
            raw_rows = tables.raw.len(),
            score_rows = tables.scores.len(),
            "opened parquet record store"
        );
        Ok(Self {
            dir,
            schema,
            tables: RwLock::new(tables),
        })
    }

    /// Directory holding the Parquet files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecordStore for ParquetStore {
    fn schema(&self) -> &MetricSchema {
        &self.schema
    }

    async fn find_raw(&self, key: &RoundKey) -> Result<Option<RawMetricSet>> {
        Ok(self.tables.read().await.raw.get(key).cloned())
    }

    async fn find_score(&self, key: &RoundKey) -> Result<Option<OverallScore>> {
        Ok(self.tables.read().await.scores.get(key).cloned())
    }

    async fn commit(&self, tx: Transaction) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut next = tables.clone();
        next.apply(&self.schema, tx)?;

        // Encoding and file writes block; keep them off the runtime workers.
        let dir = self.dir.clone();
        let metrics = self.schema.clone();
        *tables = tokio::task::spawn_blocking(move || persist(&dir, &metrics, &next).map(|()| next))
            .await
            .map_err(|e| Error::Storage(format!("persist task failed: {e}")))??;
        Ok(())
    }

    async fn raw_since(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<RawMetricSet>> {
        Ok(self.tables.read().await.raw_since(cutoff))
    }

    async fn scores_since(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<OverallScore>> {
        Ok(self.tables.read().await.scores_since(cutoff))
    }
}

/// Write both tables to temporaries, then rename them into place.
fn persist(dir: &Path, metrics: &MetricSchema, tables: &Tables) -> Result<()> {
    let raw_schema = raw_arrow_schema(metrics);
    let raw = encode_raw(&raw_schema, metrics, tables.raw.values())?;
    let scores = encode_scores(tables.scores.values())?;

    let raw_tmp = write_temp(&dir.join(RAW_FILE), &raw)?;
    let score_tmp = write_temp(&dir.join(SCORE_FILE), &scores)?;
    std::fs::rename(raw_tmp, dir.join(RAW_FILE))?;
    std::fs::rename(score_tmp, dir.join(SCORE_FILE))?;
    debug!(
        raw_rows = raw.num_rows(),
        score_rows = scores.num_rows(),
        "persisted record tables"
    );
    Ok(())
}

fn timestamp_field() -> Field {
    Field::new(
        "timestamp",
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        false,
    )
}

fn raw_arrow_schema(metrics: &MetricSchema) -> SchemaRef {
    let mut fields = vec![
        timestamp_field(),
        Field::new("hostname", DataType::Utf8, false),
        Field::new("address", DataType::Utf8, false),
    ];
    fields.extend(
        metrics
            .names()
            .iter()
            .map(|name| Field::new(name, DataType::Float64, false)),
    );
    Arc::new(Schema::new(fields))
}

fn score_arrow_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        timestamp_field(),
        Field::new("hostname", DataType::Utf8, false),
        Field::new("address", DataType::Utf8, false),
        Field::new(SCORE_COLUMN, DataType::Float64, false),
    ]))
}

fn encode_raw<'a>(
    arrow_schema: &SchemaRef,
    metrics: &MetricSchema,
    rows: impl Iterator<Item = &'a RawMetricSet> + Clone,
) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(
            TimestampMicrosecondArray::from_iter_values(rows.clone().map(|r| r.timestamp().timestamp_micros()))
                .with_timezone("UTC"),
        ),
        Arc::new(StringArray::from_iter_values(rows.clone().map(RawMetricSet::hostname))),
        Arc::new(StringArray::from_iter_values(rows.clone().map(RawMetricSet::address))),
    ];
    for name in metrics.names() {
        let values = rows
            .clone()
            .map(|r| {
                r.metric(name).ok_or_else(|| {
                    Error::Storage(format!("row for '{}' has no value for '{name}'", r.hostname()))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        columns.push(Arc::new(Float64Array::from(values)));
    }
    Ok(RecordBatch::try_new(Arc::clone(arrow_schema), columns)?)
}

fn encode_scores<'a>(rows: impl Iterator<Item = &'a OverallScore> + Clone) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(
            TimestampMicrosecondArray::from_iter_values(rows.clone().map(|r| r.timestamp().timestamp_micros()))
                .with_timezone("UTC"),
        ),
        Arc::new(StringArray::from_iter_values(rows.clone().map(OverallScore::hostname))),
        Arc::new(StringArray::from_iter_values(rows.clone().map(OverallScore::address))),
        Arc::new(Float64Array::from_iter_values(rows.map(OverallScore::score))),
    ];
    Ok(RecordBatch::try_new(score_arrow_schema(), columns)?)
}

fn write_temp(target: &Path, batch: &RecordBatch) -> Result<PathBuf> {
    let tmp = target.with_extension("parquet.tmp");
    let file = File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(tmp)
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)
        .map_err(|e| Error::Storage(format!("Failed to open {}: {e}", path.display())))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::Storage(format!("Failed to parse {}: {e}", path.display())))?
        .build()
        .map_err(|e| Error::Storage(format!("Failed to create reader for {}: {e}", path.display())))?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::Storage(format!("missing column '{name}'")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Storage(format!("column '{name}' has unexpected type")))
}

fn timestamp_at(array: &TimestampMicrosecondArray, i: usize) -> Result<DateTime<Utc>> {
    let micros = array.value(i);
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Storage(format!("timestamp {micros} out of range")))
}

fn decode_raw(batch: &RecordBatch, metrics: &MetricSchema) -> Result<Vec<RawMetricSet>> {
    let stored: Vec<&str> = batch
        .schema_ref()
        .fields()
        .iter()
        .skip(3)
        .map(|f| f.name().as_str())
        .collect();
    if stored.len() != metrics.len() || stored.iter().any(|name| !metrics.contains(name)) {
        return Err(Error::Storage(format!(
            "stored metric columns {stored:?} do not match configured schema {:?}",
            metrics.names()
        )));
    }

    let timestamps = column::<TimestampMicrosecondArray>(batch, "timestamp")?;
    let hostnames = column::<StringArray>(batch, "hostname")?;
    let addresses = column::<StringArray>(batch, "address")?;
    let values = metrics
        .names()
        .iter()
        .map(|name| Ok((name.clone(), column::<Float64Array>(batch, name)?)))
        .collect::<Result<Vec<_>>>()?;

    (0..batch.num_rows())
        .map(|i| {
            let key = RoundKey::new(timestamp_at(timestamps, i)?, hostnames.value(i));
            let row_metrics: BTreeMap<String, f64> = values
                .iter()
                .map(|(name, array)| (name.clone(), array.value(i)))
                .collect();
            RawMetricSet::new(key, addresses.value(i), metrics, &row_metrics)
        })
        .collect()
}

fn decode_scores(batch: &RecordBatch) -> Result<Vec<OverallScore>> {
    let timestamps = column::<TimestampMicrosecondArray>(batch, "timestamp")?;
    let hostnames = column::<StringArray>(batch, "hostname")?;
    let addresses = column::<StringArray>(batch, "address")?;
    let scores = column::<Float64Array>(batch, SCORE_COLUMN)?;

    (0..batch.num_rows())
        .map(|i| {
            let key = RoundKey::new(timestamp_at(timestamps, i)?, hostnames.value(i));
            Ok(OverallScore::new(key, addresses.value(i), scores.value(i)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Write;
    use chrono::TimeZone;

    fn schema() -> MetricSchema {
        MetricSchema::new(["cpu", "io"]).unwrap()
    }

    fn metrics(cpu: f64, io: f64) -> BTreeMap<String, f64> {
        [("cpu".to_string(), cpu), ("io".to_string(), io)].into_iter().collect()
    }

    #[tokio::test]
    async fn test_parquet_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Utc.timestamp_opt(1_714_564_800, 987_654_321).unwrap();
        let key = RoundKey::new(ts, "node-a");

        {
            let store = ParquetStore::open(dir.path(), schema()).unwrap();
            let mut tx = Transaction::new();
            tx.push(Write::InsertRaw(
                RawMetricSet::new(key.clone(), "10.0.0.1", &schema(), &metrics(1.5, 2.5)).unwrap(),
            ));
            tx.push(Write::InsertScore(OverallScore::new(key.clone(), "10.0.0.1", 100.0)));
            store.commit(tx).await.unwrap();
        }

        let reopened = ParquetStore::open(dir.path(), schema()).unwrap();
        let raw = reopened.find_raw(&key).await.unwrap().unwrap();
        assert_eq!(raw.metric("io"), Some(2.5));
        assert_eq!(raw.address(), "10.0.0.1");
        let score = reopened.find_score(&key).await.unwrap().unwrap();
        assert!((score.score() - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_parquet_store_rejects_schema_change() {
        let dir = tempfile::tempdir().unwrap();
        let key = RoundKey::new(Utc::now(), "node-a");
        let store = ParquetStore::open(dir.path(), schema()).unwrap();
        let mut tx = Transaction::new();
        tx.push(Write::InsertRaw(
            RawMetricSet::new(key, "10.0.0.1", &schema(), &metrics(1.0, 2.0)).unwrap(),
        ));
        store.commit(tx).await.unwrap();
        drop(store);

        let other = MetricSchema::new(["cpu", "memory"]).unwrap();
        assert!(matches!(
            ParquetStore::open(dir.path(), other),
            Err(Error::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_parquet_store_failed_commit_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::open(dir.path(), schema()).unwrap();
        let key = RoundKey::new(Utc::now(), "node-a");

        let mut tx = Transaction::new();
        tx.push(Write::UpdateScore { key: key.clone(), score: 3.0 });
        assert!(store.commit(tx).await.is_err());

        assert!(store.scores_since(None).await.unwrap().is_empty());
        assert!(!dir.path().join(SCORE_FILE).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_commits_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ParquetStore::open(dir.path(), schema()).unwrap());
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let key = RoundKey::new(ts, format!("node{i}"));
                    let mut tx = Transaction::new();
                    tx.push(Write::InsertScore(OverallScore::new(key, "10.0.0.1", f64::from(i))));
                    store.commit(tx).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        drop(store);

        let reopened = ParquetStore::open(dir.path(), schema()).unwrap();
        assert_eq!(reopened.scores_since(None).await.unwrap().len(), 8);
    }

    #[test]
    fn test_empty_store_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("fleet");
        let store = ParquetStore::open(&nested, schema()).unwrap();
        assert!(nested.is_dir());
        assert_eq!(store.dir(), nested.as_path());
    }
}
