/// Nominal energy of the 208Tl full-energy peak in keV
pub const FEP_ENERGY: f64 = 2614.5;
/// Nominal peak energies inside this open window identify the FEP fit
pub const FEP_WINDOW_LOW: f64 = 2613.0;
pub const FEP_WINDOW_HIGH: f64 = 2616.0;

/// Token identifying the resolution-at-Qbb field; the unit suffix varies
pub const QBB_FWHM_TOKEN: &str = "Qbb_fwhm_in_";

/// Fraction of the series averaged into the baseline
pub const BASELINE_FRACTION: f64 = 0.1;

/// FWHM to gaussian sigma
pub const FWHM_TO_SIGMA: f64 = 2.355;

/// Classifier tolerances
pub const SLOW_SHIFT_LIMIT: f64 = 0.5;
pub const SUDDEN_SHIFT_LIMIT: f64 = 0.25;

/// Nominal validity of one calibration run, in days
pub const CALIBRATION_VALIDITY_DAYS: i64 = 7;

/// Column holding the event time in tier files
pub const TIMESTAMP_COLUMN: &str = "timestamp";
/// Tier file extension
pub const TIER_FILE_EXTENSION: &str = "lh5";
/// Supported calibration document extensions, in lookup order
pub const CALIBRATION_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Per-period outputs
pub const STABILITY_FILE_NAME: &str = "gain_stability.yaml";
pub const ALERT_FILE_NAME: &str = "alerts.txt";
