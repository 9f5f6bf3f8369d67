//! Ingestion merger: idempotent find-or-insert of one round into the store
//!
//! For every host of the round, the raw subscore row and the overall score
//! row keyed by (timestamp, hostname) are looked up. Existing rows get their
//! metric fields (or score) overwritten; missing rows are inserted with the
//! host's inventory address. Every check runs before the first write, and
//! all writes of the round are committed as one transaction.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::inventory::Inventory;
use crate::record::{round_timestamp, OverallScore, RawMetricSet, RoundKey};
use crate::recover::RawResults;
use crate::scoring::RankedScores;
use crate::store::{RecordStore, Transaction, Write};
use crate::{Error, Result};

/// Row counts written by one ingestion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// New raw subscore rows
    pub raw_inserted: usize,
    /// Raw subscore rows overwritten in place
    pub raw_updated: usize,
    /// New overall score rows
    pub scores_inserted: usize,
    /// Overall score rows overwritten in place
    pub scores_updated: usize,
}

impl IngestSummary {
    /// Number of hosts the round touched.
    #[must_use]
    pub const fn hosts(&self) -> usize {
        self.raw_inserted + self.raw_updated
    }
}

/// Merge one round into `store`.
///
/// # Errors
///
/// Returns `SchemaMismatch` if a host has no score or reports metrics outside
/// the store's schema; nothing is written in that case. Store failures are
/// propagated.
pub async fn ingest<S: RecordStore>(
    store: &S,
    raw: &RawResults,
    scores: &RankedScores,
    timestamp: DateTime<Utc>,
    inventory: &Inventory,
) -> Result<IngestSummary> {
    let schema = store.schema();
    let timestamp = round_timestamp(timestamp);

    let mut checked = Vec::with_capacity(raw.len());
    for (hostname, metrics) in raw.iter() {
        schema.check(hostname, metrics)?;
        let score = scores.get(hostname).ok_or_else(|| {
            Error::SchemaMismatch(format!("host '{hostname}' has raw metrics but no overall score"))
        })?;
        checked.push((hostname, metrics, score));
    }

    let mut tx = Transaction::new();
    let mut summary = IngestSummary::default();
    for (hostname, metrics, score) in checked {
        let key = RoundKey::new(timestamp, hostname);
        let address = inventory.address_or_unknown(hostname);

        if store.find_raw(&key).await?.is_some() {
            tx.push(Write::UpdateRawMetrics {
                key: key.clone(),
                metrics: metrics.clone(),
            });
            summary.raw_updated += 1;
        } else {
            tx.push(Write::InsertRaw(RawMetricSet::new(
                key.clone(),
                address,
                schema,
                metrics,
            )?));
            summary.raw_inserted += 1;
        }

        if store.find_score(&key).await?.is_some() {
            tx.push(Write::UpdateScore {
                key: key.clone(),
                score,
            });
            summary.scores_updated += 1;
        } else {
            tx.push(Write::InsertScore(OverallScore::new(key, address, score)));
            summary.scores_inserted += 1;
        }
        debug!(host = hostname, address, score, "staged host for ingestion");
    }

    store.commit(tx).await?;
    info!(
        %timestamp,
        raw_inserted = summary.raw_inserted,
        raw_updated = summary.raw_updated,
        scores_inserted = summary.scores_inserted,
        scores_updated = summary.scores_updated,
        "ingested round"
    );
    Ok(summary)
}
