//! Historical queries over stored rounds

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::record::{OverallScore, RawMetricSet};
use crate::store::RecordStore;
use crate::{Error, Result};

/// Look-back window for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimePeriod {
    /// Rounds from the last 7 days
    Last7Days,
    /// Rounds from the last 30 days
    Last30Days,
    /// Rounds from the last 365 days
    LastYear,
    /// Every stored round
    #[default]
    All,
}

impl TimePeriod {
    /// Earliest timestamp included when querying at `now`; `None` means no bound.
    #[must_use]
    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = match self {
            Self::Last7Days => 7,
            Self::Last30Days => 30,
            Self::LastYear => 365,
            Self::All => return None,
        };
        Some(now - Duration::days(days))
    }

    /// Query-string name of the period.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Last7Days => "last_7_days",
            Self::Last30Days => "last_30_days",
            Self::LastYear => "last_year",
            Self::All => "all",
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimePeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "last_7_days" => Ok(Self::Last7Days),
            "last_30_days" => Ok(Self::Last30Days),
            "last_year" => Ok(Self::LastYear),
            "all" | "" => Ok(Self::All),
            other => Err(Error::Config(format!("invalid time period '{other}'"))),
        }
    }
}

/// Raw subscores recorded within `period` of `now`.
///
/// # Errors
///
/// Propagates store failures.
pub async fn raw_history<S: RecordStore>(
    store: &S,
    period: TimePeriod,
    now: DateTime<Utc>,
) -> Result<Vec<RawMetricSet>> {
    store.raw_since(period.cutoff(now)).await
}

/// Overall scores recorded within `period` of `now`.
///
/// # Errors
///
/// Propagates store failures.
pub async fn score_history<S: RecordStore>(
    store: &S,
    period: TimePeriod,
    now: DateTime<Utc>,
) -> Result<Vec<OverallScore>> {
    store.scores_since(period.cutoff(now)).await
}
