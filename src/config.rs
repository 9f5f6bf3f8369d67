//! Daemon configuration from `FLEETSCORE_*` environment variables
//!
//! Durations use humantime syntax (`90s`, `30m`, `3h`). The benchmark command
//! is one string split with shell-word rules; every `{inventory}` placeholder
//! in it is replaced by the inventory path when the runner is built.

use std::path::PathBuf;
use std::time::Duration;

use crate::record::MetricSchema;
use crate::scoring::{MetricWeights, Weighting};
use crate::{Error, Result};

/// Placeholder in the benchmark command replaced by the inventory path.
pub const INVENTORY_PLACEHOLDER: &str = "{inventory}";

/// Benchmark command used when none is configured.
pub const DEFAULT_BENCHMARK_COMMAND: &str = "ansible-playbook -v -i {inventory} benchmark-playbook.yml";

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_RUN_INTERVAL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(3 * 60 * 60);
const DEFAULT_OUTPUT_BUFFER: usize = 256;

/// Where a round's overall scores come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreSource {
    /// Score the raw results in-process.
    Computed(Weighting),
    /// Read the most recently created score file of a directory.
    Directory(PathBuf),
}

impl Default for ScoreSource {
    fn default() -> Self {
        Self::Computed(Weighting::Equal)
    }
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Inventory file
    pub inventory_path: PathBuf,
    /// Combined results artifact written by the benchmark
    pub results_path: PathBuf,
    /// Directory of the Parquet store
    pub data_dir: PathBuf,
    /// Score files are written here when computing scores
    pub score_output_dir: Option<PathBuf>,
    /// Score source of each round
    pub score_source: ScoreSource,
    /// Metric schema the store is bound to
    pub schema: MetricSchema,
    /// Time between rounds
    pub run_interval: Duration,
    /// Granularity of the interval check
    pub poll_interval: Duration,
    /// Artifact age after which the benchmark is re-run
    pub staleness_threshold: Duration,
    /// Benchmark program and arguments, placeholders unexpanded
    pub benchmark_command: Vec<String>,
    /// Capacity of the benchmark output channel
    pub output_buffer: usize,
}

impl Config {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::from_lookup`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `Config` for missing or unparseable values and `InvalidWeights`
    /// for custom weights that cannot be renormalized.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| Error::Config(format!("{key} is not set")));

        let inventory_path = PathBuf::from(required("FLEETSCORE_INVENTORY_PATH")?);
        let results_path = PathBuf::from(required("FLEETSCORE_RESULTS_PATH")?);
        let data_dir = PathBuf::from(get("FLEETSCORE_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into()));
        let scores_dir = get("FLEETSCORE_SCORES_DIR").map(PathBuf::from);

        let schema = match get("FLEETSCORE_METRICS") {
            Some(list) => MetricSchema::new(list.split(',').map(str::trim))?,
            None => MetricSchema::sysbench(),
        };

        let weighting = parse_weighting(
            get("FLEETSCORE_WEIGHTING").as_deref(),
            get("FLEETSCORE_WEIGHTS").as_deref(),
        )?;
        if let Weighting::Custom(weights) = &weighting {
            if let Some(missing) = schema.names().iter().find(|m| weights.get(m).is_none()) {
                return Err(Error::InvalidWeights(format!("no weight given for metric '{missing}'")));
            }
        }

        let (score_source, score_output_dir) = match get("FLEETSCORE_SCORE_SOURCE").as_deref() {
            None | Some("computed") => (ScoreSource::Computed(weighting), scores_dir),
            Some("directory") => {
                let dir = scores_dir.ok_or_else(|| {
                    Error::Config("FLEETSCORE_SCORES_DIR is required when FLEETSCORE_SCORE_SOURCE=directory".into())
                })?;
                (ScoreSource::Directory(dir), None)
            }
            Some(other) => {
                return Err(Error::Config(format!(
                    "FLEETSCORE_SCORE_SOURCE must be 'computed' or 'directory', got '{other}'"
                )))
            }
        };

        let duration = |key: &str, default: Duration| -> Result<Duration> {
            let value = match get(key) {
                Some(text) => parse_duration(key, &text)?,
                None => default,
            };
            if value.is_zero() {
                return Err(Error::Config(format!("{key} must be greater than zero")));
            }
            Ok(value)
        };

        let benchmark_command = parse_command(
            &get("FLEETSCORE_BENCHMARK_COMMAND").unwrap_or_else(|| DEFAULT_BENCHMARK_COMMAND.into()),
        )?;

        let output_buffer = match get("FLEETSCORE_OUTPUT_BUFFER") {
            Some(text) => match text.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::Config(format!(
                        "FLEETSCORE_OUTPUT_BUFFER must be a positive integer, got '{text}'"
                    )))
                }
            },
            None => DEFAULT_OUTPUT_BUFFER,
        };

        Ok(Self {
            inventory_path,
            results_path,
            data_dir,
            score_output_dir,
            score_source,
            schema,
            run_interval: duration("FLEETSCORE_RUN_INTERVAL", DEFAULT_RUN_INTERVAL)?,
            poll_interval: duration("FLEETSCORE_POLL_INTERVAL", DEFAULT_POLL_INTERVAL)?,
            staleness_threshold: duration("FLEETSCORE_STALENESS_THRESHOLD", DEFAULT_STALENESS_THRESHOLD)?,
            benchmark_command,
            output_buffer,
        })
    }

    /// Benchmark command with placeholders expanded.
    #[must_use]
    pub fn expanded_command(&self) -> Vec<String> {
        let inventory = self.inventory_path.display().to_string();
        self.benchmark_command
            .iter()
            .map(|arg| arg.replace(INVENTORY_PLACEHOLDER, &inventory))
            .collect()
    }
}

fn parse_duration(key: &str, text: &str) -> Result<Duration> {
    humantime::parse_duration(text).map_err(|e| Error::Config(format!("{key}: invalid duration '{text}': {e}")))
}

fn parse_command(text: &str) -> Result<Vec<String>> {
    let words = shell_words::split(text)
        .map_err(|e| Error::Config(format!("FLEETSCORE_BENCHMARK_COMMAND: {e}")))?;
    if words.is_empty() {
        return Err(Error::Config("FLEETSCORE_BENCHMARK_COMMAND is empty".into()));
    }
    Ok(words)
}

/// Parse a `metric=weight,...` list.
///
/// # Errors
///
/// Returns `Config` for syntax errors and `InvalidWeights` when the weights
/// sum to zero.
pub fn parse_weights(text: &str) -> Result<MetricWeights> {
    let mut pairs = Vec::new();
    for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (metric, weight) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("weight '{pair}' is not of the form metric=weight")))?;
        let weight: f64 = weight
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("weight for '{}' is not a number", metric.trim())))?;
        pairs.push((metric.trim().to_string(), weight));
    }
    MetricWeights::new(pairs)
}

fn parse_weighting(mode: Option<&str>, weights: Option<&str>) -> Result<Weighting> {
    match (mode, weights) {
        (None | Some("equal"), None) => Ok(Weighting::Equal),
        (Some("equal"), Some(_)) => Err(Error::Config(
            "FLEETSCORE_WEIGHTS is set but FLEETSCORE_WEIGHTING=equal".into(),
        )),
        (Some("sysbench"), _) => Ok(Weighting::Custom(MetricWeights::sysbench_default())),
        (None | Some("custom"), Some(list)) => Ok(Weighting::Custom(parse_weights(list)?)),
        (Some("custom"), None) => Err(Error::Config(
            "FLEETSCORE_WEIGHTING=custom requires FLEETSCORE_WEIGHTS".into(),
        )),
        (Some(other), _) => Err(Error::Config(format!(
            "FLEETSCORE_WEIGHTING must be 'equal', 'sysbench' or 'custom', got '{other}'"
        ))),
    }
}
