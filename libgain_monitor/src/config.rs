use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::series::{parse_stamp, Cadence, IgnoreInterval};

/// Resolution fit flavour read from the calibration documents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    #[default]
    Linear,
    Quadratic,
}

/// Which production tier a run's calibration is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Calibration,
    Physics,
}

impl DataType {
    pub fn dir_name(&self) -> &'static str {
        match self {
            DataType::Calibration => "cal",
            DataType::Physics => "phy",
        }
    }
}

/// An ignore window as written in the configuration, stamps in YYYYMMDDTHHMMSSZ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreWindow {
    pub start: String,
    pub stop: String,
}

/// Static alert limits in keV, used when a run has no resolution to derive limits from
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl Envelope {
    pub fn is_unset(&self) -> bool {
        self.low.is_none() && self.high.is_none()
    }
}

/// Structure representing the application configuration. Contains pathing, run lists and
/// the experiment-curated exception tables.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub prod_path: PathBuf,
    pub output_path: PathBuf,
    pub channel_map_path: PathBuf,
    pub periods: BTreeMap<String, Vec<String>>,
    pub pulser_channel: String,
    pub probe_channel: String,
    pub energy_key: String,
    pub series_tier: String,
    pub calibration_key: String,
    pub fallback_calibration_key: String,
    pub resampling_cadence: String,
    pub energy_scale: f64,
    pub compute_variation: bool,
    pub partition: bool,
    pub fit: FitMode,
    #[serde(default)]
    pub extra_calibration_runs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub ignore_intervals: BTreeMap<String, Vec<IgnoreWindow>>,
    #[serde(default)]
    pub no_pulser_channels: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub envelope: Envelope,
    pub watermark_path: Option<PathBuf>,
    pub n_threads: i32,
}

impl Default for Config {
    /// Generate a new Config object. Paths are placeholders.
    fn default() -> Self {
        Self {
            prod_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            channel_map_path: PathBuf::from("None"),
            periods: BTreeMap::from([(
                String::from("p03"),
                vec![String::from("r000"), String::from("r001")],
            )]),
            pulser_channel: String::from("ch1027201"),
            probe_channel: String::from("ch1027201"),
            energy_key: String::from("cuspEmax"),
            series_tier: String::from("dsp"),
            calibration_key: String::from("cuspEmax_ctc_cal"),
            fallback_calibration_key: String::from("cuspEmax_cal"),
            resampling_cadence: String::from("1h"),
            energy_scale: 2039.0,
            compute_variation: true,
            partition: false,
            fit: FitMode::Linear,
            extra_calibration_runs: BTreeMap::new(),
            ignore_intervals: BTreeMap::new(),
            no_pulser_channels: BTreeMap::new(),
            envelope: Envelope::default(),
            watermark_path: None,
            n_threads: 1,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Directory holding the calibration parameters of a run for a given parameter tier
    pub fn get_par_directory(&self, tier: &str, period: &str, run: &str) -> PathBuf {
        self.prod_path
            .join("generated")
            .join("par")
            .join(tier)
            .join(DataType::Calibration.dir_name())
            .join(period)
            .join(run)
    }

    /// Directory holding the tier files of a run
    pub fn get_tier_directory(
        &self,
        tier: &str,
        data_type: DataType,
        period: &str,
        run: &str,
    ) -> PathBuf {
        self.prod_path
            .join("generated")
            .join("tier")
            .join(tier)
            .join(data_type.dir_name())
            .join(period)
            .join(run)
    }

    /// Directory receiving the outputs of one period
    pub fn get_output_directory(&self, period: &str) -> PathBuf {
        self.output_path.join(period)
    }

    /// Parsed resampling cadence
    pub fn get_cadence(&self) -> Result<Cadence, ConfigError> {
        Ok(self.resampling_cadence.parse::<Cadence>()?)
    }

    /// Ignore intervals registered for a period; empty if none
    pub fn get_ignore_intervals(&self, period: &str) -> Result<Vec<IgnoreInterval>, ConfigError> {
        let Some(windows) = self.ignore_intervals.get(period) else {
            return Ok(vec![]);
        };
        windows
            .iter()
            .map(|w| -> Result<IgnoreInterval, ConfigError> {
                Ok(IgnoreInterval::new(
                    parse_stamp(&w.start)?,
                    parse_stamp(&w.stop)?,
                ))
            })
            .collect()
    }

    /// Trailing calibration-only runs registered for a period
    pub fn get_extra_calibration_runs(&self, period: &str) -> &[String] {
        self.extra_calibration_runs
            .get(period)
            .map(|runs| runs.as_slice())
            .unwrap_or(&[])
    }

    /// Whether pulser correction is disabled for a channel in a period
    pub fn skips_pulser(&self, period: &str, channel: &str) -> bool {
        self.no_pulser_channels
            .get(period)
            .is_some_and(|chans| chans.iter().any(|c| c == channel))
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.periods, config.periods);
        assert_eq!(parsed.fit, FitMode::Linear);
        assert!(parsed.envelope.is_unset());
        assert!(parsed.get_cadence().is_ok());
    }

    #[test]
    fn test_tables() {
        let yaml = r#"
prod_path: /data/prod
output_path: /data/out
channel_map_path: /data/map.csv
periods:
  p07: [r001, r002]
pulser_channel: ch1027201
probe_channel: ch1027201
energy_key: cuspEmax
series_tier: dsp
calibration_key: cuspEmax_ctc_cal
fallback_calibration_key: cuspEmax_cal
resampling_cadence: 30min
energy_scale: 2039.0
compute_variation: true
partition: true
fit: quadratic
extra_calibration_runs:
  p07: [r008]
ignore_intervals:
  p07:
    - {start: 20230601T000000Z, stop: 20230601T120000Z}
no_pulser_channels:
  p07: [ch1104000]
envelope: {low: -2.0, high: 2.0}
watermark_path: null
n_threads: 2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.fit, FitMode::Quadratic);
        assert_eq!(config.get_extra_calibration_runs("p07"), &[String::from("r008")]);
        assert!(config.get_extra_calibration_runs("p03").is_empty());
        assert_eq!(config.get_ignore_intervals("p07").unwrap().len(), 1);
        assert!(config.skips_pulser("p07", "ch1104000"));
        assert!(!config.skips_pulser("p03", "ch1104000"));
        assert_eq!(
            config.get_par_directory("pht", "p07", "r001"),
            PathBuf::from("/data/prod/generated/par/pht/cal/p07/r001")
        );
        assert_eq!(
            config.get_tier_directory("dsp", DataType::Physics, "p07", "r001"),
            PathBuf::from("/data/prod/generated/tier/dsp/phy/p07/r001")
        );
    }

    #[test]
    fn test_missing_file() {
        let err = Config::read_config_file(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(err, Err(ConfigError::BadFilePath(_))));
    }
}
