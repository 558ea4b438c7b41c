//! # gain_monitor
//!
//! gain_monitor tracks the gain stability of germanium detector channels over the runs
//! of a data-taking period. It reads the calibration documents and tier files written by
//! the processing production, builds per-channel calibration histories and
//! pulser-corrected gain series, classifies every channel as stable or unstable, and
//! raises alerts when the gain drifts outside the resolution-derived limits.
//!
//! ## Installation
//!
//! The only method of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Tier files are HDF5, so HDF5 must be installed before building gain_monitor. Typically
//! this will be installed using a package manager (homebrew, apt, etc), and the Rust
//! libraries will auto detect the location of the HDF install. If HDF5 lives in a custom
//! location, write the following snippet into the file `.cargo/config.toml` in the
//! repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./gain_monitor_cli` from the top
//! level repository. The binary is installed to your cargo install location (typically
//! `~/.cargo/bin/`).
//!
//! ## Configuration
//!
//! A template configuration is written by `gain_monitor_cli new -p config.yaml`. The YAML
//! format of a configuration file is as follows:
//!
//! ```yml
//! prod_path: /data/prod
//! output_path: /data/monitoring
//! channel_map_path: /data/channel_map.csv
//! periods:
//!   p03: [r000, r001]
//! pulser_channel: ch1027201
//! probe_channel: ch1027201
//! energy_key: cuspEmax
//! series_tier: dsp
//! calibration_key: cuspEmax_ctc_cal
//! fallback_calibration_key: cuspEmax_cal
//! resampling_cadence: 1h
//! energy_scale: 2039.0
//! compute_variation: true
//! partition: false
//! fit: linear
//! extra_calibration_runs:
//!   p07: [r008]
//! ignore_intervals:
//!   p03:
//!     - {start: 20230601T000000Z, stop: 20230601T120000Z}
//! no_pulser_channels:
//!   p03: [ch1104000]
//! envelope: {low: -2.0, high: 2.0}
//! watermark_path: /data/monitoring/last_checked
//! n_threads: 1
//! ```
//!
//! Run lists must be in chronological order. `extra_calibration_runs` appends
//! calibration-only runs after a period's run list, `ignore_intervals` removes bad data
//! from the gain series and `no_pulser_channels` turns off the pulser correction for
//! individual channels. `envelope` holds fallback alert limits in keV for runs without a
//! resolution; alerting is off when both sides are null or when no watermark is stored.
//!
//! ### Channel Map Format
//!
//! The channel map is a CSV file with a header line. The columns are as follows:
//!
//! ```csv
//! valid_from,channel,name,string,position,processable
//! ```
//!
//! `valid_from` is a `YYYYMMDDTHHMMSSZ` stamp opening a validity block; the map used for a
//! period is the block valid at the start of its first readable run.
//!
//! ## Output
//!
//! For every period the monitor writes `{output_path}/{period}/gain_stability.yaml`
//! holding the calibration history and stability report of each channel, and appends one
//! line per alert to `{output_path}/{period}/alerts.txt`. The CLI also writes a
//! `gain_monitor.log` file to the output directory.
pub mod alerting;
pub mod calib_record;
pub mod calib_series;
pub mod channel_map;
pub mod config;
pub mod constants;
pub mod data_store;
pub mod error;
pub mod expression;
pub mod hdf_reader;
pub mod process;
pub mod pulser;
pub mod run_bounds;
pub mod series;
pub mod source;
pub mod stability;
pub mod watermark;
pub mod worker_status;
