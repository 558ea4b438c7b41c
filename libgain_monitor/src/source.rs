//! Interfaces to the production data the monitor consumes.
//!
//! The core builders only talk to these traits; [`crate::data_store::ProdDataStore`]
//! implements them over a production directory tree, tests implement them in memory.
use std::path::{Path, PathBuf};

use super::config::DataType;
use super::error::{CalibrationFileError, HDFReaderError};
use super::series::TimeSeries;

/// The two calibration document layouts. Each carries its own key table and is
/// chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVariant {
    /// Single-run calibration
    Hit,
    /// Calibration aggregated over a partition of runs
    PartitionAggregate,
}

impl SchemaVariant {
    /// Parameter tier directory name
    pub fn tier(&self) -> &'static str {
        match self {
            SchemaVariant::Hit => "hit",
            SchemaVariant::PartitionAggregate => "pht",
        }
    }

    /// Key of the energy-calibration result set inside a channel's `results`
    pub fn results_key(&self) -> &'static str {
        match self {
            SchemaVariant::Hit => "ecal",
            SchemaVariant::PartitionAggregate => "partition_ecal",
        }
    }

    /// Partition calibrations win when requested and present for the run
    pub fn select<R: CalibrationReader + ?Sized>(
        reader: &R,
        period: &str,
        run: &str,
        partition: bool,
    ) -> Self {
        if partition && reader.has_partition(period, run) {
            SchemaVariant::PartitionAggregate
        } else {
            SchemaVariant::Hit
        }
    }
}

pub trait CalibrationReader {
    /// The parsed calibration document for a run. JSON and YAML both end up as a
    /// `serde_yaml::Value`.
    fn read_calibration(
        &self,
        period: &str,
        run: &str,
        variant: SchemaVariant,
    ) -> Result<serde_yaml::Value, CalibrationFileError>;

    /// Whether a non-empty partition calibration exists for a run
    fn has_partition(&self, period: &str, run: &str) -> bool;
}

pub trait RunFileLister {
    /// Sorted tier files of a run, or None if the run directory does not exist
    fn list_run_files(
        &self,
        period: &str,
        run: &str,
        data_type: DataType,
    ) -> Result<Option<Vec<PathBuf>>, std::io::Error>;

    /// Event timestamps (seconds since the epoch) of a channel in one tier file
    fn read_probe_timestamps(&self, file: &Path, channel: &str)
        -> Result<Vec<f64>, HDFReaderError>;
}

pub trait EventSeriesReader {
    /// One named per-event series of a channel over a run. Empty when the run
    /// holds no such data.
    fn read_series(
        &self,
        period: &str,
        run: &str,
        channel: &str,
        key: &str,
    ) -> Result<TimeSeries, HDFReaderError>;
}

/// Everything the orchestrator needs from the production
pub trait DataSource: CalibrationReader + RunFileLister + EventSeriesReader {}

impl<T: CalibrationReader + RunFileLister + EventSeriesReader> DataSource for T {}
