//! Inventory resolver: hostname -> address from an Ansible INI inventory
//!
//! ```text
//! [benchmark_hosts]
//! node-a ansible_host=10.0.0.1 ansible_user=ubuntu
//! node-b ansible_host=10.0.0.2
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::INLINE_SOURCE;
use crate::record::UNKNOWN_ADDRESS;
use crate::{Error, Result};

const HOST_MARKER: &str = "ansible_host";

/// Hostname to address mapping derived from the inventory file each round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    hosts: BTreeMap<String, String>,
}

impl Inventory {
    /// Create an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse an inventory file.
    ///
    /// # Errors
    ///
    /// Returns `MalformedInput` if the file cannot be read or a host line
    /// carries the marker without an address.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "parsing inventory");
        let text = std::fs::read_to_string(path).map_err(|e| Error::malformed(path, e))?;
        Self::parse(&text).map_err(|e| e.at_path(path))
    }

    /// Parse inventory text.
    ///
    /// # Errors
    ///
    /// Returns `MalformedInput` (reported at [`INLINE_SOURCE`]) for a host line whose
    /// `ansible_host=` token has no address.
    pub fn parse(text: &str) -> Result<Self> {
        let mut hosts = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(hostname) = tokens.next() else {
                continue;
            };
            // Only a token keyed exactly `ansible_host` declares a host.
            let Some(marker) = tokens.find(|token| token.split('=').next() == Some(HOST_MARKER)) else {
                continue;
            };
            let address = marker
                .split_once('=')
                .map(|(_, value)| value)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    Error::malformed(
                        INLINE_SOURCE,
                        format!("line {}: host '{hostname}' has no {HOST_MARKER} address", lineno + 1),
                    )
                })?;
            hosts.insert(hostname.to_string(), address.to_string());
        }
        Ok(Self { hosts })
    }

    /// Add or replace one entry.
    pub fn insert(&mut self, hostname: impl Into<String>, address: impl Into<String>) {
        self.hosts.insert(hostname.into(), address.into());
    }

    /// Address of `hostname`, if declared.
    #[must_use]
    pub fn address(&self, hostname: &str) -> Option<&str> {
        self.hosts.get(hostname).map(String::as_str)
    }

    /// Address of `hostname`, or [`UNKNOWN_ADDRESS`].
    #[must_use]
    pub fn address_or_unknown(&self, hostname: &str) -> &str {
        self.address(hostname).unwrap_or(UNKNOWN_ADDRESS)
    }

    /// Number of declared hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether no host is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Iterate over (hostname, address) pairs in hostname order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.hosts.iter().map(|(h, a)| (h.as_str(), a.as_str()))
    }
}

impl<H: Into<String>, A: Into<String>> FromIterator<(H, A)> for Inventory {
    fn from_iter<T: IntoIterator<Item = (H, A)>>(iter: T) -> Self {
        Self {
            hosts: iter.into_iter().map(|(h, a)| (h.into(), a.into())).collect(),
        }
    }
}
