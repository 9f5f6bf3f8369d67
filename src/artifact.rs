//! On-disk artifacts of a benchmark round
//!
//! - the combined results file, whose modification time stamps the round;
//! - score files: flat `hostname -> score` JSON objects, one per round, of
//!   which the most recently created is authoritative.

use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::scoring::RankedScores;
use crate::{Error, Result};

/// File name prefix of score files.
pub const SCORE_FILE_PREFIX: &str = "combined_cloud_benchmarker_results__overall_score_sorted__";

/// Last modification time of `path`, or `None` if it does not exist.
///
/// # Errors
///
/// Returns `Io` for failures other than the file being absent.
pub fn modified_at(path: impl AsRef<Path>) -> Result<Option<DateTime<Utc>>> {
    match fs::metadata(path.as_ref()) {
        Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn created_or_modified(path: &Path) -> Option<SystemTime> {
    let meta = fs::metadata(path).ok()?;
    meta.created().or_else(|_| meta.modified()).ok()
}

/// Most recently created `.json` file in `dir`.
///
/// # Errors
///
/// Returns `MissingArtifact` if the directory is absent or holds no score file.
pub fn latest_score_file(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::MissingArtifact(format!("score directory {}: {e}", dir.display()))
    })?;

    entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| created_or_modified(&path).map(|t| (t, path)))
        .max_by_key(|(t, _)| *t)
        .map(|(_, path)| path)
        .ok_or_else(|| Error::MissingArtifact(format!("no score file in {}", dir.display())))
}

/// Read a flat `hostname -> score` JSON file.
///
/// # Errors
///
/// Returns `MalformedInput` if the file cannot be read or is not a map of
/// numbers.
pub fn read_score_file(path: impl AsRef<Path>) -> Result<RankedScores> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading score file");
    let text = fs::read_to_string(path).map_err(|e| Error::malformed(path, e))?;
    serde_json::from_str(&text).map_err(|e| Error::malformed(path, e))
}

/// Read the authoritative score file of `dir`.
///
/// # Errors
///
/// See [`latest_score_file`] and [`read_score_file`].
pub fn read_latest_scores(dir: impl AsRef<Path>) -> Result<RankedScores> {
    read_score_file(latest_score_file(dir)?)
}

/// Name of the score file written for a round scored at `at`.
#[must_use]
pub fn score_file_name(at: DateTime<Utc>) -> String {
    format!("{SCORE_FILE_PREFIX}{}.json", at.format("%m_%d_%Y__%H_%M_%S"))
}

/// Write `scores` to `dir` (created if needed) in rank order, four-space
/// indented.
///
/// # Errors
///
/// Returns `Io` or `Json` on write failure.
pub fn write_score_file(dir: impl AsRef<Path>, scores: &RankedScores, at: DateTime<Utc>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(score_file_name(at));

    let mut out = BufWriter::new(File::create(&path)?);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    scores.serialize(&mut serializer)?;
    out.flush()?;

    info!(path = %path.display(), hosts = scores.len(), "wrote score file");
    Ok(path)
}
