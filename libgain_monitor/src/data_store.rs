use std::path::{Path, PathBuf};

use super::config::{Config, DataType};
use super::constants::{CALIBRATION_EXTENSIONS, TIER_FILE_EXTENSION};
use super::error::{CalibrationFileError, HDFReaderError};
use super::hdf_reader::HDFReader;
use super::series::TimeSeries;
use super::source::{CalibrationReader, EventSeriesReader, RunFileLister, SchemaVariant};

/// ProdDataStore reads calibration documents and tier files from a production tree.
///
/// Parameters live under `{prod}/generated/par/{hit|pht}/cal/{period}/{run}` and tier
/// files under `{prod}/generated/tier/{tier}/{cal|phy}/{period}/{run}`.
#[derive(Debug, Clone)]
pub struct ProdDataStore {
    config: Config,
}

impl ProdDataStore {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Files of a directory with the given extension, sorted by name
    fn get_file_stack(parent_path: &Path, extension: &str) -> Result<Vec<PathBuf>, std::io::Error> {
        let mut file_list: Vec<PathBuf> = Vec::new();
        for item in parent_path.read_dir()? {
            let item_path = item?.path();
            if item_path.is_file()
                && item_path
                    .extension()
                    .is_some_and(|ext| ext.to_string_lossy() == extension)
            {
                file_list.push(item_path);
            }
        }
        file_list.sort(); // Production names only differ in the timestamp field
        Ok(file_list)
    }

    /// Find the calibration document of a run directory; json preferred over yaml
    fn find_calibration_file(par_dir: &Path) -> Result<PathBuf, CalibrationFileError> {
        for extension in CALIBRATION_EXTENSIONS {
            if let Ok(files) = Self::get_file_stack(par_dir, extension) {
                if let Some(first) = files.into_iter().next() {
                    return Ok(first);
                }
            }
        }
        Err(CalibrationFileError::MissingCalibrationFile(
            par_dir.to_path_buf(),
        ))
    }

    /// Parse a calibration document, JSON or YAML, into one value type
    pub fn read_calibration_file(path: &Path) -> Result<serde_yaml::Value, CalibrationFileError> {
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.to_string_lossy() == "json");
        if is_json {
            let json: serde_json::Value = serde_json::from_str(&contents)?;
            Ok(serde_yaml::to_value(json)?)
        } else {
            Ok(serde_yaml::from_str::<serde_yaml::Value>(&contents)?)
        }
    }
}

impl CalibrationReader for ProdDataStore {
    fn read_calibration(
        &self,
        period: &str,
        run: &str,
        variant: SchemaVariant,
    ) -> Result<serde_yaml::Value, CalibrationFileError> {
        let par_dir = self.config.get_par_directory(variant.tier(), period, run);
        let path = Self::find_calibration_file(&par_dir)?;
        log::debug!("Reading calibration document {}", path.to_string_lossy());
        Self::read_calibration_file(&path)
    }

    fn has_partition(&self, period: &str, run: &str) -> bool {
        let par_dir = self
            .config
            .get_par_directory(SchemaVariant::PartitionAggregate.tier(), period, run);
        match par_dir.read_dir() {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    }
}

impl RunFileLister for ProdDataStore {
    fn list_run_files(
        &self,
        period: &str,
        run: &str,
        data_type: DataType,
    ) -> Result<Option<Vec<PathBuf>>, std::io::Error> {
        let run_dir = self
            .config
            .get_tier_directory(&self.config.series_tier, data_type, period, run);
        if !run_dir.exists() {
            return Ok(None);
        }
        Ok(Some(Self::get_file_stack(&run_dir, TIER_FILE_EXTENSION)?))
    }

    fn read_probe_timestamps(
        &self,
        file: &Path,
        channel: &str,
    ) -> Result<Vec<f64>, HDFReaderError> {
        HDFReader::open(file)?.read_timestamps(channel, &self.config.series_tier)
    }
}

impl EventSeriesReader for ProdDataStore {
    fn read_series(
        &self,
        period: &str,
        run: &str,
        channel: &str,
        key: &str,
    ) -> Result<TimeSeries, HDFReaderError> {
        let mut series = TimeSeries::new();
        let files = match self.list_run_files(period, run, DataType::Physics) {
            Ok(Some(files)) => files,
            Ok(None) => return Ok(series),
            Err(e) => {
                log::warn!("Could not list physics files of {period} {run}: {e}");
                return Ok(series);
            }
        };
        let total_bytes: u64 = files
            .iter()
            .filter_map(|p| p.metadata().ok())
            .map(|m| m.len())
            .sum();
        log::debug!(
            "Reading {key} of {channel} from {} files ({}) in {period} {run}",
            files.len(),
            human_bytes::human_bytes(total_bytes as f64)
        );
        for file in files.iter() {
            let reader = HDFReader::open(file)?;
            if !reader.has_channel(channel, &self.config.series_tier) {
                continue;
            }
            series.extend(reader.read_series(channel, &self.config.series_tier, key)?);
        }
        Ok(series)
    }
}
