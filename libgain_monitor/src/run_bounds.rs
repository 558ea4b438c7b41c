use std::path::{Path, PathBuf};
use time::OffsetDateTime;

use super::config::DataType;
use super::error::RunBoundsError;
use super::series::from_unix_seconds;
use super::source::RunFileLister;

/// Start and end of a run. Calibration-only runs collapse to a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBounds {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl RunBounds {
    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }
}

fn to_timestamp(seconds: f64) -> Result<OffsetDateTime, RunBoundsError> {
    from_unix_seconds(seconds).map_err(|_| RunBoundsError::BadTimestamp(seconds))
}

fn first_probe_timestamp<L: RunFileLister + ?Sized>(
    lister: &L,
    file: &Path,
    probe_channel: &str,
) -> Result<OffsetDateTime, RunBoundsError> {
    let stamps = lister.read_probe_timestamps(file, probe_channel)?;
    let first = stamps
        .first()
        .ok_or_else(|| RunBoundsError::EmptyProbe(file.to_path_buf()))?;
    to_timestamp(*first)
}

fn last_probe_timestamp<L: RunFileLister + ?Sized>(
    lister: &L,
    file: &Path,
    probe_channel: &str,
) -> Result<OffsetDateTime, RunBoundsError> {
    let stamps = lister.read_probe_timestamps(file, probe_channel)?;
    let last = stamps
        .last()
        .ok_or_else(|| RunBoundsError::EmptyProbe(file.to_path_buf()))?;
    to_timestamp(*last)
}

/// Bounds from a sorted file listing: first probe timestamp of the first file and last
/// probe timestamp of the last file. None for an empty listing.
pub fn resolve_bounds<L: RunFileLister + ?Sized>(
    lister: &L,
    run_files_sorted: &[PathBuf],
    probe_channel: &str,
) -> Result<Option<RunBounds>, RunBoundsError> {
    let (Some(first), Some(last)) = (run_files_sorted.first(), run_files_sorted.last()) else {
        return Ok(None);
    };
    Ok(Some(RunBounds {
        start: first_probe_timestamp(lister, first, probe_channel)?,
        end: last_probe_timestamp(lister, last, probe_channel)?,
    }))
}

/// Determine when a run started and ended.
///
/// Runs with physics data are bounded by their physics files. A run that only exists
/// as a calibration run collapses to the end of its calibration data so that it shows
/// as a marker rather than an interval. If neither listing is available the run data
/// is missing and that is an error.
pub fn get_run_start_end_times<L: RunFileLister + ?Sized>(
    lister: &L,
    period: &str,
    run: &str,
    probe_channel: &str,
) -> Result<RunBounds, RunBoundsError> {
    if let Some(files) = lister.list_run_files(period, run, DataType::Physics)? {
        if let Some(bounds) = resolve_bounds(lister, &files, probe_channel)? {
            return Ok(bounds);
        }
    }

    log::debug!("No physics data for {period} {run}; using calibration data");
    let cal_files = lister
        .list_run_files(period, run, DataType::Calibration)?
        .ok_or_else(|| RunBoundsError::MissingRunData(period.to_string(), run.to_string()))?;
    let last = cal_files
        .last()
        .ok_or_else(|| RunBoundsError::MissingRunData(period.to_string(), run.to_string()))?;
    let end = last_probe_timestamp(lister, last, probe_channel)?;
    Ok(RunBounds { start: end, end })
}
