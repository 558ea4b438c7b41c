use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("Expression failed to parse an unexpected character '{0}' at position {1}")]
    UnexpectedCharacter(char, usize),
    #[error("Expression failed to parse a number literal: {0}")]
    BadNumber(String),
    #[error("Expression found an unexpected token {0} at position {1}")]
    UnexpectedToken(String, usize),
    #[error("Expression ended before it was complete")]
    UnexpectedEnd,
    #[error("Expression references unknown identifier {0}")]
    UnknownIdentifier(String),
}

#[derive(Debug, Error)]
pub enum CalibrationFileError {
    #[error("No calibration file of any supported format was found in {0:?}")]
    MissingCalibrationFile(PathBuf),
    #[error("CalibrationFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("CalibrationFile failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("CalibrationFile failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum HDFReaderError {
    #[error("HDFReader failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HDFReader could not open file {0:?} because it does not exist")]
    BadFilePath(PathBuf),
    #[error("HDFReader could not find dataset {0} in file {1:?}")]
    MissingDataset(String, PathBuf),
    #[error("HDFReader found columns of different length in {0:?}: {1} timestamps and {2} values")]
    LengthMismatch(PathBuf, usize, usize),
    #[error("HDFReader failed to convert timestamps: {0}")]
    BadTimestamps(#[from] SeriesError),
}

#[derive(Debug, Error)]
pub enum RunBoundsError {
    #[error("Run data for period {0} run {1} could not be listed")]
    MissingRunData(String, String),
    #[error("RunBounds failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("RunBounds failed due to HDFReader error: {0}")]
    ReaderError(#[from] HDFReaderError),
    #[error("RunBounds found no probe timestamps in {0:?}")]
    EmptyProbe(PathBuf),
    #[error("RunBounds found an invalid timestamp {0}")]
    BadTimestamp(f64),
}

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("Series failed to parse resampling cadence '{0}'")]
    BadCadence(String),
    #[error("Series failed to parse timestamp '{0}': {1}")]
    BadTimestamp(String, String),
    #[error("Series found an invalid unix timestamp {0}")]
    BadUnixTimestamp(f64),
}

#[derive(Debug, Error)]
pub enum CalibSeriesError {
    #[error("CalibSeries failed due to calibration file error: {0}")]
    FileError(#[from] CalibrationFileError),
    #[error("CalibSeries failed due to RunBounds error: {0}")]
    BoundsError(#[from] RunBoundsError),
}

#[derive(Debug, Error)]
pub enum PulserError {
    #[error("PulserSeries for channel {0} has a NaN baseline; too little valid data")]
    InsufficientBaseline(String),
    #[error("PulserSeries failed due to Series error: {0}")]
    SeriesError(#[from] SeriesError),
    #[error("PulserSeries failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("ChannelMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ChannelMap failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("ChannelMap failed to parse a boolean: {0}")]
    BoolError(#[from] std::str::ParseBoolError),
    #[error("ChannelMap failed to parse a validity stamp: {0}")]
    StampError(#[from] SeriesError),
    #[error("ChannelMap was given a file with the incorrect format; most likely the number of columns is incorrect")]
    BadFileFormat,
    #[error("ChannelMap contains no entries")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config failed due to Series error: {0}")]
    SeriesError(#[from] SeriesError),
    #[error("Config asks for {0} worker threads; at least one is required")]
    BadThreadCount(i32),
}

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("Watermark failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Watermark failed to parse a timestamp: {0}")]
    ParsingError(#[from] std::num::ParseFloatError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to ChannelMap error: {0}")]
    MapError(#[from] ChannelMapError),
    #[error("Processor failed due to CalibSeries error: {0}")]
    CalibError(#[from] CalibSeriesError),
    #[error("Processor failed due to RunBounds error: {0}")]
    BoundsError(#[from] RunBoundsError),
    #[error("Processor failed due to PulserSeries error: {0}")]
    PulserError(#[from] PulserError),
    #[error("Processor failed due to Series error: {0}")]
    SeriesError(#[from] SeriesError),
    #[error("Processor failed due to Watermark error: {0}")]
    WatermarkError(#[from] WatermarkError),
    #[error("Processor failed to write YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Processor found no runs for period {0}")]
    NoRuns(String),
    #[error("A Processor worker thread panicked")]
    WorkerPanic,
}
