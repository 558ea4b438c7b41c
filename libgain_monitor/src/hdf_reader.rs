use hdf5::File;
use std::path::{Path, PathBuf};

use super::constants::TIMESTAMP_COLUMN;
use super::error::HDFReaderError;
use super::series::TimeSeries;

/// A simple struct which wraps around the hdf5-rust library.
///
/// Opens a tier file for reading per-channel event columns. Tables follow the
/// production layout
// Structure
// ch1027201
// |---- dsp
// |    |---- timestamp(dset)
// |    |---- cuspEmax(dset)
// |    |---- ...
// ch1104000
// |---- dsp
// |    |---- ...
#[derive(Debug)]
pub struct HDFReader {
    file_handle: File,
    path: PathBuf,
}

impl HDFReader {
    /// Open the file at path for reading
    pub fn open(path: &Path) -> Result<Self, HDFReaderError> {
        if !path.exists() {
            return Err(HDFReaderError::BadFilePath(path.to_path_buf()));
        }
        Ok(Self {
            file_handle: File::open(path)?,
            path: path.to_path_buf(),
        })
    }

    fn dataset_name(channel: &str, tier: &str, column: &str) -> String {
        format!("{channel}/{tier}/{column}")
    }

    /// Whether a channel table exists in this file
    pub fn has_channel(&self, channel: &str, tier: &str) -> bool {
        self.file_handle
            .group(&format!("{channel}/{tier}"))
            .is_ok()
    }

    /// Read one column of a channel table as f64
    pub fn read_column(
        &self,
        channel: &str,
        tier: &str,
        column: &str,
    ) -> Result<Vec<f64>, HDFReaderError> {
        let name = Self::dataset_name(channel, tier, column);
        let dataset = self
            .file_handle
            .dataset(&name)
            .map_err(|_| HDFReaderError::MissingDataset(name.clone(), self.path.clone()))?;
        Ok(dataset.read_raw::<f64>()?)
    }

    /// Event timestamps of a channel, seconds since the epoch
    pub fn read_timestamps(&self, channel: &str, tier: &str) -> Result<Vec<f64>, HDFReaderError> {
        self.read_column(channel, tier, TIMESTAMP_COLUMN)
    }

    /// A column indexed by the channel's event timestamps
    pub fn read_series(
        &self,
        channel: &str,
        tier: &str,
        column: &str,
    ) -> Result<TimeSeries, HDFReaderError> {
        let timestamps = self.read_timestamps(channel, tier)?;
        let values = self.read_column(channel, tier, column)?;
        if timestamps.len() != values.len() {
            return Err(HDFReaderError::LengthMismatch(
                self.path.clone(),
                timestamps.len(),
                values.len(),
            ));
        }
        Ok(TimeSeries::from_unix(&timestamps, values)?)
    }
}
