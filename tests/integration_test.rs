//! Integration test for the benchmark round pipeline
//!
//! Tests the complete path of one round:
//! 1. Parse the inventory and recover the near-JSON results artifact
//! 2. Score and rank the hosts
//! 3. Ingest into a Parquet-backed store and read it back after reopening

use std::fs;

use chrono::{Duration, TimeZone, Utc};
use fleetscore::history::{score_history, TimePeriod};
use fleetscore::ingest::ingest;
use fleetscore::inventory::Inventory;
use fleetscore::record::{MetricSchema, RoundKey, SYSBENCH_METRICS, UNKNOWN_ADDRESS};
use fleetscore::recover::read_results_file;
use fleetscore::scoring::{score, MetricWeights, Weighting};
use fleetscore::store::{MemoryStore, ParquetStore, RecordStore};

const INVENTORY: &str = "\
[benchmark_hosts]
bench-east ansible_host=192.168.1.10 ansible_user=ubuntu
bench_west ansible_host=192.168.1.11 ansible_user=ubuntu
";

fn sysbench_line(host: &str, cpu: f64, fileio: f64, memory: f64, mutex: f64, threads: f64) -> String {
    let values = [cpu, fileio, memory, mutex, threads];
    let fields: Vec<String> = SYSBENCH_METRICS
        .iter()
        .zip(values)
        .map(|(name, value)| format!("\"{name}\": {value:?}"))
        .collect();
    format!("{host}: {{{}}}", fields.join(", "))
}

#[tokio::test]
async fn test_round_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let inventory_path = dir.path().join("inventory");
    let results_path = dir.path().join("results.json");
    fs::write(&inventory_path, INVENTORY).unwrap();
    fs::write(
        &results_path,
        format!(
            "{},\n{}\n",
            sysbench_line("bench_west", 1200.0, 300.0, 9000.0, 0.5, 1.5),
            sysbench_line("bench_central", 800.0, 500.0, 6000.0, 0.25, 2.5),
        ),
    )
    .unwrap();

    let inventory = Inventory::load(&inventory_path).unwrap();
    let raw = read_results_file(&results_path).unwrap();
    assert_eq!(raw.hostnames().collect::<Vec<_>>(), ["bench_west", "bench_central"]);

    let scores = score(&raw, &Weighting::Custom(MetricWeights::sysbench_default())).unwrap();
    let timestamp = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();

    let data_dir = dir.path().join("data");
    {
        let store = ParquetStore::open(&data_dir, MetricSchema::sysbench()).unwrap();
        let summary = ingest(&store, &raw, &scores, timestamp, &inventory).await.unwrap();
        assert_eq!(summary.raw_inserted, 2);
        assert_eq!(summary.scores_inserted, 2);
    }

    let store = ParquetStore::open(&data_dir, MetricSchema::sysbench()).unwrap();
    let west = store
        .find_raw(&RoundKey::new(timestamp, "bench_west"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(west.address(), "192.168.1.11");
    assert_eq!(west.metric("cpu_speed_test__events_per_second"), Some(1200.0));

    let central = store
        .find_score(&RoundKey::new(timestamp, "bench_central"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(central.address(), UNKNOWN_ADDRESS);
    assert!((central.score() - scores.get("bench_central").unwrap()).abs() < 1e-12);

    // Same round again: rows are updated, never duplicated.
    let summary = ingest(&store, &raw, &scores, timestamp, &inventory).await.unwrap();
    assert_eq!(summary.raw_updated, 2);
    assert_eq!(summary.scores_updated, 2);
    assert_eq!(store.raw_since(None).await.unwrap().len(), 2);

    let history = score_history(&store, TimePeriod::Last7Days, timestamp + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    let history = score_history(&store, TimePeriod::Last7Days, timestamp + Duration::days(8))
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_single_host_scores_100() {
    let dir = tempfile::tempdir().unwrap();
    let results_path = dir.path().join("results.json");
    fs::write(&results_path, sysbench_line("solo", 950.0, 120.0, 4000.0, 0.3, 1.1)).unwrap();

    let raw = read_results_file(&results_path).unwrap();
    let scores = score(&raw, &Weighting::Equal).unwrap();
    assert_eq!(scores.get("solo"), Some(100.0));

    let store = MemoryStore::default();
    let timestamp = Utc::now();
    ingest(&store, &raw, &scores, timestamp, &Inventory::new()).await.unwrap();

    let row = store
        .find_score(&RoundKey::new(timestamp, "solo"))
        .await
        .unwrap()
        .unwrap();
    assert!((row.score() - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_malformed_artifact_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let results_path = dir.path().join("results.json");
    // Truncated mid-write.
    fs::write(&results_path, "web1: {\"cpu_speed_test__events_per_second\": 12").unwrap();

    let err = read_results_file(&results_path).unwrap_err();
    assert!(matches!(err, fleetscore::Error::MalformedInput { ref path, .. } if path == &results_path));

    let store = ParquetStore::open(dir.path().join("data"), MetricSchema::sysbench()).unwrap();
    assert!(store.raw_since(None).await.unwrap().is_empty());
}

#[test]
fn test_missing_results_file_is_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_results_file(dir.path().join("absent.json")).unwrap_err();
    assert!(err.is_recoverable());
}
