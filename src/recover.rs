//! Tolerant JSON recoverer for the combined benchmark results artifact
//!
//! The benchmark playbook concatenates per-host results as
//!
//! ```text
//! node1: {"cpu_speed_test__events_per_second": 1021.4, ...}
//! node2: {"cpu_speed_test__events_per_second": 987.0, ...}
//! ```
//!
//! with bare hostname keys and no enclosing braces. Recovery quotes every
//! bare key sitting in front of `: {`, wraps the text in braces, and parses
//! the result. The only accepted shape is an object of objects with numeric
//! leaves.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::INLINE_SOURCE;
use crate::{Error, Result};

fn bare_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\w+): \{").expect("static pattern is valid"))
}

/// Per-host raw metric values, in artifact order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResults {
    hosts: Vec<(String, BTreeMap<String, f64>)>,
}

impl RawResults {
    /// Create an empty result set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host, replacing its metrics if it is already present.
    pub fn insert(&mut self, hostname: impl Into<String>, metrics: BTreeMap<String, f64>) {
        let hostname = hostname.into();
        if let Some(slot) = self.hosts.iter_mut().find(|(h, _)| *h == hostname) {
            slot.1 = metrics;
        } else {
            self.hosts.push((hostname, metrics));
        }
    }

    /// Metrics of one host.
    #[must_use]
    pub fn get(&self, hostname: &str) -> Option<&BTreeMap<String, f64>> {
        self.hosts.iter().find(|(h, _)| h == hostname).map(|(_, m)| m)
    }

    /// Iterate over hosts in artifact order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, f64>)> {
        self.hosts.iter().map(|(h, m)| (h.as_str(), m))
    }

    /// Host names in artifact order.
    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|(h, _)| h.as_str())
    }

    /// Number of hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether no host reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl<H, M> FromIterator<(H, M)> for RawResults
where
    H: Into<String>,
    M: IntoIterator<Item = (String, f64)>,
{
    fn from_iter<T: IntoIterator<Item = (H, M)>>(iter: T) -> Self {
        let mut results = Self::new();
        for (host, metrics) in iter {
            results.insert(host, metrics.into_iter().collect());
        }
        results
    }
}

/// Quote bare keys written as `key: {` and wrap the text in braces.
#[must_use]
pub fn repair(text: &str) -> String {
    let quoted = bare_key_pattern().replace_all(text.trim(), r#""$1": {"#);
    format!("{{{quoted}}}")
}

/// Repair and parse near-JSON text into a JSON value.
///
/// # Errors
///
/// Returns `MalformedInput` if the text is empty or still not valid JSON
/// after repair.
pub fn recover_value(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Err(Error::malformed(INLINE_SOURCE, "results file is empty"));
    }
    serde_json::from_str(&repair(text)).map_err(|e| Error::malformed(INLINE_SOURCE, e))
}

/// Repair, parse, and shape-check a results artifact held in memory.
///
/// # Errors
///
/// Returns `MalformedInput` on unparseable text or any shape other than
/// host -> {metric -> number}.
pub fn recover_results(text: &str) -> Result<RawResults> {
    let value = recover_value(text)?;
    let Value::Object(hosts) = value else {
        return Err(Error::malformed(INLINE_SOURCE, "top level is not an object"));
    };

    let mut results = RawResults::new();
    for (hostname, body) in hosts {
        let Value::Object(fields) = body else {
            return Err(Error::malformed(
                INLINE_SOURCE,
                format!("host '{hostname}' does not map to an object"),
            ));
        };
        let mut metrics = BTreeMap::new();
        for (metric, leaf) in fields {
            let number = leaf.as_f64().ok_or_else(|| {
                Error::malformed(
                    INLINE_SOURCE,
                    format!("host '{hostname}': metric '{metric}' is not a number"),
                )
            })?;
            metrics.insert(metric, number);
        }
        results.insert(hostname, metrics);
    }
    Ok(results)
}

/// Read and recover the results artifact at `path`.
///
/// # Errors
///
/// Returns `MissingArtifact` if the file does not exist and `MalformedInput`
/// (carrying `path`) if it cannot be read or recovered.
pub fn read_results_file(path: impl AsRef<Path>) -> Result<RawResults> {
    let path = path.as_ref();
    debug!(path = %path.display(), "recovering results artifact");
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingArtifact(format!(
                "results artifact {} not found",
                path.display()
            )));
        }
        Err(e) => return Err(Error::malformed(path, e)),
    };
    recover_results(&text).map_err(|e| e.at_path(path))
}
