use serde::Serialize;
use time::OffsetDateTime;

use super::calib_record::{extract, CalibrationRecord, ExtractionKeys};
use super::config::FitMode;
use super::error::{CalibSeriesError, CalibrationFileError, RunBoundsError};
use super::run_bounds::get_run_start_end_times;
use super::series::serialize_stamps;
use super::source::{CalibrationReader, RunFileLister, SchemaVariant};

/// One channel's calibration history over a run list. All vectors share one length,
/// one entry per processed run, in run-list order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationTimeSeries {
    pub runs: Vec<String>,
    pub fep: Vec<f64>,
    pub fep_err: Vec<f64>,
    pub cal_const: Vec<f64>,
    pub cal_const_err: Vec<f64>,
    #[serde(serialize_with = "serialize_stamps")]
    pub run_start: Vec<OffsetDateTime>,
    #[serde(serialize_with = "serialize_stamps")]
    pub run_end: Vec<OffsetDateTime>,
    pub res: Vec<f64>,
    pub res_quad: Vec<f64>,
    pub fep_diff: Vec<f64>,
    pub cal_const_diff: Vec<f64>,
}

impl CalibrationTimeSeries {
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn push(
        &mut self,
        run: &str,
        record: &CalibrationRecord,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) {
        self.runs.push(run.to_string());
        self.fep.push(record.fep_peak_pos);
        self.fep_err.push(record.fep_peak_pos_err);
        self.cal_const.push(record.fep_cal);
        self.cal_const_err.push(record.fep_cal_err);
        self.run_start.push(start);
        self.run_end.push(end);
        self.res.push(record.fwhm_linear);
        self.res_quad.push(record.fwhm_quadratic);
    }

    /// Fill the drift columns relative to the first nonzero value of each column
    fn compute_diffs(&mut self, energy_scale: f64) {
        self.fep_diff = compute_diff(&self.fep, reference_value(&self.fep), energy_scale);
        self.cal_const_diff = compute_diff(
            &self.cal_const,
            reference_value(&self.cal_const),
            energy_scale,
        );
    }
}

/// First finite nonzero value in array order, 0 if there is none
pub fn reference_value(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .find(|v| v.is_finite() && *v != 0.0)
        .unwrap_or(0.0)
}

/// Relative deviation from a reference, scaled: (v - ref) / ref * scale.
///
/// A zero reference means there is nothing to compare to and every entry is NaN.
pub fn compute_diff(values: &[f64], init_value: f64, scale: f64) -> Vec<f64> {
    if init_value == 0.0 || init_value.is_nan() {
        return vec![f64::NAN; values.len()];
    }
    values
        .iter()
        .map(|v| (v - init_value) / init_value * scale)
        .collect()
}

/// Everything that identifies one calibration history query
#[derive(Debug, Clone, Copy)]
pub struct CalibSeriesRequest<'a> {
    pub channel: &'a str,
    pub period: &'a str,
    /// Runs in chronological order
    pub run_list: &'a [String],
    /// Calibration-only runs appended after the run list
    pub extra_runs: &'a [String],
    pub partition: bool,
    pub energy_scale: f64,
    pub fit: FitMode,
    pub calibration_keys: [&'a str; 2],
    pub probe_channel: &'a str,
}

/// Build the calibration history of one channel.
///
/// The run list must be chronological; run labels out of order are reported. Runs
/// without a calibration document or whose bounds cannot be read are skipped with a
/// warning.
pub fn build<S: CalibrationReader + RunFileLister + ?Sized>(
    source: &S,
    request: &CalibSeriesRequest,
) -> Result<CalibrationTimeSeries, CalibSeriesError> {
    let mut runs: Vec<&String> = request.run_list.iter().collect();
    for extra in request.extra_runs {
        if !runs.contains(&extra) {
            runs.push(extra);
        }
    }
    if !runs.windows(2).all(|w| w[0] <= w[1]) {
        log::warn!(
            "Run list for {} is not in ascending order; drift is computed in list order",
            request.period
        );
    }

    let mut series = CalibrationTimeSeries::default();
    for run in runs {
        let variant = SchemaVariant::select(source, request.period, run, request.partition);
        let record = match source.read_calibration(request.period, run, variant) {
            Ok(blob) => {
                let keys = ExtractionKeys {
                    calibration_keys: request.calibration_keys,
                    variant,
                    fit: request.fit,
                };
                extract(&blob, request.channel, &keys)
            }
            Err(CalibrationFileError::MissingCalibrationFile(path)) => {
                log::warn!(
                    "No calibration file for {} {run} in {}; skipping run",
                    request.period,
                    path.to_string_lossy()
                );
                continue;
            }
            Err(CalibrationFileError::IOError(e)) => {
                return Err(CalibrationFileError::IOError(e).into())
            }
            Err(e) => {
                log::warn!(
                    "Unreadable calibration document for {} {run}: {e}",
                    request.period
                );
                CalibrationRecord::null()
            }
        };

        let bounds = get_run_start_end_times(source, request.period, run, request.probe_channel);
        let bounds = match bounds {
            Ok(bounds) => bounds,
            Err(RunBoundsError::MissingRunData(period, run)) => {
                log::warn!("No run data for {period} {run}; skipping run");
                continue;
            }
            Err(e) => {
                log::warn!(
                    "Could not bound {} {run} for {}: {e}; skipping run",
                    request.period,
                    request.channel
                );
                continue;
            }
        };
        series.push(run, &record, bounds.start, bounds.end);
    }

    series.compute_diffs(request.energy_scale);
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataType;
    use crate::error::HDFReaderError;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    /// Per-run calibration documents, one physics file per run with two probe stamps
    struct FakeProduction {
        docs: HashMap<String, String>,
        partitions: HashMap<String, String>,
        physics_runs: Vec<String>,
        empty_probe: Vec<String>,
    }

    impl FakeProduction {
        fn new() -> Self {
            Self {
                docs: HashMap::new(),
                partitions: HashMap::new(),
                physics_runs: vec![],
                empty_probe: vec![],
            }
        }

        fn add_run(&mut self, run: &str, mu: f64, physics: bool) {
            self.docs.insert(run.to_string(), doc(mu, 2.5));
            if physics {
                self.physics_runs.push(run.to_string());
            }
        }
    }

    fn doc(mu: f64, fwhm: f64) -> String {
        format!(
            r#"
ch1:
  pars:
    operations:
      cuspEmax_ctc_cal: {{expression: "a*cuspEmax_ctc", parameters: {{a: 0.5}}}}
  results:
    ecal:
      cuspEmax_ctc_cal:
        eres_linear: {{Qbb_fwhm_in_kev: {fwhm}}}
        pk_fits:
          "2614.5": {{parameters: {{mu: {mu}}}, uncertainties: {{mu: 0.5}}}}
"#
        )
    }

    fn run_number(path: &Path) -> f64 {
        path.to_string_lossy()
            .trim_start_matches('r')
            .trim_end_matches(".lh5")
            .parse::<f64>()
            .unwrap_or(0.0)
    }

    impl CalibrationReader for FakeProduction {
        fn read_calibration(
            &self,
            _period: &str,
            run: &str,
            variant: SchemaVariant,
        ) -> Result<serde_yaml::Value, CalibrationFileError> {
            let table = match variant {
                SchemaVariant::Hit => &self.docs,
                SchemaVariant::PartitionAggregate => &self.partitions,
            };
            let text = table
                .get(run)
                .ok_or_else(|| CalibrationFileError::MissingCalibrationFile(PathBuf::from(run)))?;
            Ok(serde_yaml::from_str(text)?)
        }

        fn has_partition(&self, _period: &str, run: &str) -> bool {
            self.partitions.contains_key(run)
        }
    }

    impl RunFileLister for FakeProduction {
        fn list_run_files(
            &self,
            _period: &str,
            run: &str,
            data_type: DataType,
        ) -> Result<Option<Vec<PathBuf>>, std::io::Error> {
            let known = match data_type {
                DataType::Physics => self.physics_runs.iter().any(|r| r == run),
                DataType::Calibration => self.docs.contains_key(run),
            };
            Ok(known.then(|| vec![PathBuf::from(format!("{run}.lh5"))]))
        }

        fn read_probe_timestamps(
            &self,
            file: &Path,
            _channel: &str,
        ) -> Result<Vec<f64>, HDFReaderError> {
            let run = file.to_string_lossy().trim_end_matches(".lh5").to_string();
            if self.empty_probe.contains(&run) {
                return Ok(vec![]);
            }
            let base = 1.7e9 + run_number(file) * 86400.0;
            Ok(vec![base, base + 3600.0])
        }
    }

    fn request<'a>(runs: &'a [String], extra: &'a [String]) -> CalibSeriesRequest<'a> {
        CalibSeriesRequest {
            channel: "ch1",
            period: "p07",
            run_list: runs,
            extra_runs: extra,
            partition: false,
            energy_scale: 2039.0,
            fit: FitMode::Linear,
            calibration_keys: ["cuspEmax_ctc_cal", "cuspEmax_cal"],
            probe_channel: "ch0",
        }
    }

    fn labels(runs: &[&str]) -> Vec<String> {
        runs.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_compute_diff() {
        let diff = compute_diff(&[1.0, 2.0, 3.0], 0.0, 10.0);
        assert_eq!(diff.len(), 3);
        assert!(diff.iter().all(|d| d.is_nan()));
        assert_eq!(compute_diff(&[2.0, 3.0], 2.0, 10.0), vec![0.0, 5.0]);
    }

    #[test]
    fn test_reference_is_first_nonzero() {
        assert_eq!(reference_value(&[0.0, f64::NAN, 4.0, 5.0]), 4.0);
        assert_eq!(reference_value(&[0.0, f64::NAN]), 0.0);
    }

    #[test]
    fn test_build_series() {
        let mut prod = FakeProduction::new();
        prod.add_run("r001", 5000.0, true);
        prod.add_run("r002", 5005.0, true);
        prod.add_run("r008", 5010.0, false);
        let runs = labels(&["r001", "r002"]);
        let extra = labels(&["r008", "r002"]);
        let series = build(&prod, &request(&runs, &extra)).unwrap();

        assert_eq!(series.runs, labels(&["r001", "r002", "r008"]));
        for column in [
            series.fep.len(),
            series.fep_err.len(),
            series.cal_const.len(),
            series.cal_const_err.len(),
            series.run_start.len(),
            series.run_end.len(),
            series.res.len(),
            series.res_quad.len(),
            series.fep_diff.len(),
            series.cal_const_diff.len(),
        ] {
            assert_eq!(column, 3);
        }
        assert_eq!(series.cal_const, vec![2500.0, 2502.5, 2505.0]);
        assert_eq!(series.cal_const_diff[0], 0.0);
        assert!((series.cal_const_diff[1] - 2.5 / 2500.0 * 2039.0).abs() < 1e-9);
        assert_eq!(series.fep_diff[0], 0.0);
        assert_eq!(series.res, vec![2.5, 2.5, 2.5]);
        assert!(series.res_quad.iter().all(|r| r.is_nan()));
        // Physics run spans its file; the calibration-only run is a marker
        assert_ne!(series.run_start[0], series.run_end[0]);
        assert_eq!(series.run_start[2], series.run_end[2]);
    }

    #[test]
    fn test_absent_reference_gives_nan_diffs() {
        let mut prod = FakeProduction::new();
        prod.add_run("r001", 0.0, true);
        prod.docs.insert("r002".to_string(), String::from("ch9: {}\n"));
        prod.physics_runs.push("r002".to_string());
        let runs = labels(&["r001", "r002"]);
        let series = build(&prod, &request(&runs, &[])).unwrap();
        assert_eq!(series.len(), 2);
        assert!(series.fep_diff.iter().all(|d| d.is_nan()));
        assert!(series.cal_const_diff.iter().all(|d| d.is_nan()));
    }

    #[test]
    fn test_missing_documents_skip_runs() {
        let mut prod = FakeProduction::new();
        prod.add_run("r001", 5000.0, true);
        let runs = labels(&["r001", "r002"]);
        let series = build(&prod, &request(&runs, &[])).unwrap();
        assert_eq!(series.runs, labels(&["r001"]));
    }

    #[test]
    fn test_unbounded_run_is_skipped() {
        let mut prod = FakeProduction::new();
        prod.add_run("r001", 5000.0, true);
        prod.add_run("r002", 5005.0, true);
        prod.add_run("r003", 5010.0, true);
        prod.empty_probe.push("r002".to_string());
        let runs = labels(&["r001", "r002", "r003"]);
        let series = build(&prod, &request(&runs, &[])).unwrap();
        assert_eq!(series.runs, labels(&["r001", "r003"]));
        assert_eq!(series.run_start.len(), 2);
        assert_eq!(series.cal_const_diff.len(), 2);
    }

    #[test]
    fn test_partition_preferred_when_requested() {
        let mut prod = FakeProduction::new();
        prod.add_run("r001", 5000.0, true);
        prod.partitions.insert(
            "r001".to_string(),
            doc(6000.0, 2.0).replace("ecal:", "partition_ecal:"),
        );
        let runs = labels(&["r001"]);
        let mut req = request(&runs, &[]);
        assert_eq!(build(&prod, &req).unwrap().fep, vec![5000.0]);
        req.partition = true;
        let series = build(&prod, &req).unwrap();
        assert_eq!(series.fep, vec![6000.0]);
        assert_eq!(series.res, vec![2.0]);
    }

    #[test]
    fn test_build_is_idempotent() {
        let mut prod = FakeProduction::new();
        prod.add_run("r001", 5000.0, true);
        prod.add_run("r002", 4990.0, true);
        let runs = labels(&["r001", "r002"]);
        let first = build(&prod, &request(&runs, &[])).unwrap();
        let second = build(&prod, &request(&runs, &[])).unwrap();
        assert_eq!(first.runs, second.runs);
        assert_eq!(first.fep_diff, second.fep_diff);
        assert_eq!(first.run_start, second.run_start);
    }
}
