use super::error::PulserError;
use super::series::{Cadence, IgnoreInterval, TimeSeries};
use super::source::EventSeriesReader;

/// A raw series with its resampled mean and std
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GainSeries {
    pub raw: TimeSeries,
    pub resampled_mean: TimeSeries,
    pub resampled_std: TimeSeries,
}

impl GainSeries {
    pub fn from_raw(raw: TimeSeries, cadence: Cadence) -> Self {
        let resampled = raw.resample(cadence);
        Self {
            raw,
            resampled_mean: resampled.mean,
            resampled_std: resampled.std,
        }
    }
}

/// Detector gain deviation over a period, with the pulser deviation and the
/// pulser-corrected detector deviation when pulser data is available.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PulserCorrectedSeries {
    pub detector: GainSeries,
    pub pulser: Option<GainSeries>,
    pub corrected: Option<GainSeries>,
}

impl PulserCorrectedSeries {
    /// The corrected series if there is one, else the uncorrected detector series
    pub fn best(&self) -> &GainSeries {
        self.corrected.as_ref().unwrap_or(&self.detector)
    }
}

/// Everything that identifies one pulser-corrected gain query
#[derive(Debug, Clone, Copy)]
pub struct PulserRequest<'a> {
    pub channel: &'a str,
    pub pulser_channel: &'a str,
    pub period: &'a str,
    /// Runs in chronological order
    pub run_list: &'a [String],
    pub energy_key: &'a str,
    pub cadence: Cadence,
    pub energy_scale: f64,
    pub compute_variation: bool,
    pub ignore_intervals: &'a [IgnoreInterval],
    /// False for channels listed as not using the pulser correction
    pub use_pulser: bool,
}

/// Concatenate a channel's per-run series in run-list order. Runs that cannot be read
/// are left out with a warning.
pub fn get_dfs<R: EventSeriesReader + ?Sized>(
    reader: &R,
    period: &str,
    run_list: &[String],
    channel: &str,
    key: &str,
) -> TimeSeries {
    let mut series = TimeSeries::new();
    for run in run_list {
        let run_series = match reader.read_series(period, run, channel, key) {
            Ok(run_series) => run_series,
            Err(e) => {
                log::warn!("Could not read {key} of {channel} in {period} {run}: {e}; skipping");
                continue;
            }
        };
        if run_series.is_empty() {
            log::debug!("No {key} data for {channel} in {period} {run}");
        }
        series.extend(run_series);
    }
    series
}

/// Filtered, baseline-normalised and scaled deviation of a raw series. None when the
/// baseline window holds no valid data.
fn deviation(raw: &TimeSeries, request: &PulserRequest) -> Option<TimeSeries> {
    let filtered = raw.filter_by_period(request.ignore_intervals);
    let baseline = filtered.baseline();
    if baseline.is_nan() {
        return None;
    }
    let deviation = if request.compute_variation {
        filtered.deviation(baseline)
    } else {
        filtered
    };
    Some(deviation.scaled(request.energy_scale))
}

/// Turn raw detector and pulser series into resampled gain deviations.
///
/// A NaN detector baseline means too little data and is an error for the channel.
/// An empty or unusable pulser series only drops the pulser and corrected parts.
pub fn get_pulser_data(
    detector_raw: &TimeSeries,
    pulser_raw: &TimeSeries,
    request: &PulserRequest,
) -> Result<PulserCorrectedSeries, PulserError> {
    let detector = deviation(detector_raw, request)
        .ok_or_else(|| PulserError::InsufficientBaseline(request.channel.to_string()))?;

    let pulser = if !request.use_pulser || pulser_raw.is_empty() {
        None
    } else {
        let pulser = deviation(pulser_raw, request);
        if pulser.is_none() {
            log::warn!(
                "Pulser {} has no valid baseline in {}; {} stays uncorrected",
                request.pulser_channel,
                request.period,
                request.channel
            );
        }
        pulser
    };

    let corrected = pulser
        .as_ref()
        .map(|p| GainSeries::from_raw(detector.subtract_common(p), request.cadence));

    Ok(PulserCorrectedSeries {
        detector: GainSeries::from_raw(detector, request.cadence),
        pulser: pulser.map(|p| GainSeries::from_raw(p, request.cadence)),
        corrected,
    })
}

/// Load and build the pulser-corrected gain series of one channel over a run list
pub fn build<R: EventSeriesReader + ?Sized>(
    reader: &R,
    request: &PulserRequest,
) -> Result<PulserCorrectedSeries, PulserError> {
    let detector_raw = get_dfs(
        reader,
        request.period,
        request.run_list,
        request.channel,
        request.energy_key,
    );
    let pulser_raw = if request.use_pulser {
        get_dfs(
            reader,
            request.period,
            request.run_list,
            request.pulser_channel,
            request.energy_key,
        )
    } else {
        TimeSeries::new()
    };
    get_pulser_data(&detector_raw, &pulser_raw, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HDFReaderError;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use time::macros::datetime;
    use time::Duration;

    struct FakeReader {
        series: HashMap<(String, String), TimeSeries>,
        unreadable: Vec<String>,
    }

    impl EventSeriesReader for FakeReader {
        fn read_series(
            &self,
            _period: &str,
            run: &str,
            channel: &str,
            _key: &str,
        ) -> Result<TimeSeries, HDFReaderError> {
            if self.unreadable.iter().any(|r| r == run) {
                return Err(HDFReaderError::MissingDataset(
                    channel.to_string(),
                    PathBuf::from(run),
                ));
            }
            Ok(self
                .series
                .get(&(run.to_string(), channel.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    /// One sample every 10 minutes for `hours` hours starting at `start`
    fn ramp(start_hour: i64, hours: i64, value: impl Fn(i64) -> f64) -> TimeSeries {
        let t0 = datetime!(2025-01-01 00:00 UTC) + Duration::hours(start_hour);
        let mut series = TimeSeries::new();
        for i in 0..hours * 6 {
            series.push(t0 + Duration::minutes(10 * i), value(i));
        }
        series
    }

    fn request<'a>(runs: &'a [String], ignore: &'a [IgnoreInterval]) -> PulserRequest<'a> {
        PulserRequest {
            channel: "ch1",
            pulser_channel: "puls",
            period: "p03",
            run_list: runs,
            energy_key: "cuspEmax",
            cadence: "1h".parse().unwrap(),
            energy_scale: 1000.0,
            compute_variation: true,
            ignore_intervals: ignore,
            use_pulser: true,
        }
    }

    #[test]
    fn test_pulser_drift_cancels() {
        // Detector and pulser drift together by 1% after the first hour
        let drift = |i: i64| if i < 6 { 1.0 } else { 1.01 };
        let det = ramp(0, 10, |i| 100.0 * drift(i));
        let puls = ramp(0, 10, |i| 50.0 * drift(i));
        let result = get_pulser_data(&det, &puls, &request(&[], &[])).unwrap();

        let raw_dev = result.detector.resampled_mean.values();
        assert!((raw_dev[0]).abs() < 1e-9);
        assert!((raw_dev[5] - 10.0).abs() < 1e-6);
        let corrected = result.corrected.as_ref().unwrap();
        assert!(corrected
            .resampled_mean
            .values()
            .iter()
            .all(|v| v.abs() < 1e-6));
        assert_eq!(result.best(), corrected);
        assert!(result.pulser.is_some());
    }

    #[test]
    fn test_no_pulser_leaves_correction_absent() {
        let det = ramp(0, 3, |_| 100.0);
        let result = get_pulser_data(&det, &TimeSeries::new(), &request(&[], &[])).unwrap();
        assert!(result.pulser.is_none());
        assert!(result.corrected.is_none());
        assert_eq!(result.best(), &result.detector);

        let mut no_pulser = request(&[], &[]);
        no_pulser.use_pulser = false;
        let puls = ramp(0, 3, |_| 50.0);
        let result = get_pulser_data(&det, &puls, &no_pulser).unwrap();
        assert!(result.corrected.is_none());
    }

    #[test]
    fn test_nan_baseline_aborts_channel() {
        let det = ramp(0, 2, |_| f64::NAN);
        let err = get_pulser_data(&det, &TimeSeries::new(), &request(&[], &[]));
        assert!(matches!(err, Err(PulserError::InsufficientBaseline(_))));
    }

    #[test]
    fn test_correction_uses_common_timestamps_only() {
        let det = ramp(0, 2, |_| 100.0);
        // Pulser only fires during the second hour
        let puls = ramp(1, 1, |_| 50.0);
        let result = get_pulser_data(&det, &puls, &request(&[], &[])).unwrap();
        let corrected = result.corrected.unwrap();
        assert_eq!(corrected.raw.len(), 6);
        assert_eq!(corrected.resampled_mean.len(), 1);
        assert_eq!(
            corrected.resampled_mean.index()[0],
            datetime!(2025-01-01 01:00 UTC)
        );
    }

    #[test]
    fn test_gaps_and_ignored_windows_become_nan() {
        let mut det = ramp(0, 2, |_| 100.0);
        det.extend(ramp(5, 1, |_| 100.0));
        let ignore = [IgnoreInterval::new(
            datetime!(2025-01-01 01:00 UTC),
            datetime!(2025-01-01 01:59 UTC),
        )];
        let result = get_pulser_data(&det, &TimeSeries::new(), &request(&[], &ignore)).unwrap();
        let mean = result.detector.resampled_mean.values();
        let std = result.detector.resampled_std.values();
        assert_eq!(mean.len(), 6);
        for i in 1..5 {
            assert!(mean[i].is_nan());
            assert!(std[i].is_nan());
        }
        assert_eq!(mean[0], 0.0);
        assert_eq!(mean[5], 0.0);
    }

    #[test]
    fn test_build_concatenates_runs() {
        let mut series = HashMap::new();
        series.insert(("r000".to_string(), "ch1".to_string()), ramp(0, 1, |_| 100.0));
        series.insert(("r001".to_string(), "ch1".to_string()), ramp(2, 1, |_| 102.0));
        series.insert(("r000".to_string(), "puls".to_string()), ramp(0, 1, |_| 10.0));
        let reader = FakeReader {
            series,
            unreadable: vec![],
        };
        let runs = vec!["r000".to_string(), "r001".to_string()];
        let result = build(&reader, &request(&runs, &[])).unwrap();
        assert_eq!(result.detector.raw.len(), 12);
        assert!((result.detector.resampled_mean.values()[2] - 20.0).abs() < 1e-9);
        // Pulser only covers the first run
        assert_eq!(result.corrected.unwrap().raw.len(), 6);
    }

    #[test]
    fn test_unreadable_run_is_skipped() {
        let mut series = HashMap::new();
        for (run, hour) in [("r000", 0), ("r001", 2), ("r002", 4)] {
            series.insert((run.to_string(), "ch1".to_string()), ramp(hour, 1, |_| 100.0));
            series.insert((run.to_string(), "puls".to_string()), ramp(hour, 1, |_| 10.0));
        }
        let reader = FakeReader {
            series,
            unreadable: vec!["r001".to_string()],
        };
        let runs = vec!["r000".to_string(), "r001".to_string(), "r002".to_string()];
        let raw = get_dfs(&reader, "p03", &runs, "ch1", "cuspEmax");
        assert_eq!(raw.len(), 12);

        let result = build(&reader, &request(&runs, &[])).unwrap();
        assert_eq!(result.detector.raw.len(), 12);
        assert_eq!(result.corrected.unwrap().raw.len(), 12);
    }
}
