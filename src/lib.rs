//! # fleetscore: fleet benchmark scoring and history
//!
//! **Version**: 0.1.0
//!
//! fleetscore periodically benchmarks a fleet of hosts through an external
//! runner, turns the per-host raw metrics into one comparable score per host,
//! and keeps the history of both in an embedded store.
//!
//! ## Pipeline
//!
//! - **Inventory**: hostname -> address from an Ansible-style inventory
//! - **Recovery**: repair the runner's near-JSON results artifact
//! - **Scoring**: min-max normalization, equal or custom weights, ranking
//! - **Scheduling**: staleness-gated benchmark runs, one round per interval
//! - **Ingestion**: idempotent find-or-insert keyed by (timestamp, hostname)
//!
//! ## Example Usage
//!
//! ```rust
//! use fleetscore::recover::recover_results;
//! use fleetscore::scoring::{score, Weighting};
//!
//! let raw = recover_results(r#"web1: {"cpu": 10.0}, web2: {"cpu": 30.0}"#)?;
//! let ranked = score(&raw, &Weighting::Equal)?;
//!
//! assert_eq!(ranked.top(1)[0].0, "web2");
//! assert_eq!(ranked.get("web1"), Some(0.0));
//! # Ok::<(), fleetscore::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod history;
pub mod ingest;
pub mod inventory;
pub mod record;
pub mod recover;
pub mod runner;
pub mod scheduler;
pub mod scoring;
pub mod store;

pub use error::{Error, Result};
