use serde::Serialize;
use std::fmt::Display;
use time::{Duration, OffsetDateTime};

use super::config::Envelope;
use super::constants::CALIBRATION_VALIDITY_DAYS;
use super::series::{format_stamp, TimeSeries};

/// One threshold violation. Created once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    #[serde(serialize_with = "serialize_stamp")]
    pub timestamp: OffsetDateTime,
    pub period: String,
    pub run: String,
    pub channel_name: String,
    pub string_id: String,
    pub metric_name: String,
    pub value: f64,
    pub low: f64,
    pub high: f64,
}

fn serialize_stamp<S: serde::Serializer>(
    ts: &OffsetDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_stamp(ts))
}

impl Display for AlertEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} {} | {} (string {}) | {} = {:.3} outside [{:.3}, {:.3}]",
            format_stamp(&self.timestamp),
            self.period,
            self.run,
            self.channel_name,
            self.string_id,
            self.metric_name,
            self.value,
            self.low,
            self.high
        )
    }
}

/// Alert limits for one run: ±FWHM/2 when the run has a resolution, else the static
/// envelope. None when neither is available.
pub fn run_limits(fwhm: f64, envelope: &Envelope) -> Option<(f64, f64)> {
    if fwhm.is_finite() {
        let half = fwhm.abs() / 2.0;
        return Some((-half, half));
    }
    if envelope.is_unset() {
        return None;
    }
    Some((
        envelope.low.unwrap_or(f64::NEG_INFINITY),
        envelope.high.unwrap_or(f64::INFINITY),
    ))
}

/// Inputs of one threshold scan
#[derive(Debug, Clone, Copy)]
pub struct ThresholdCheck<'a> {
    /// Samples newer than the watermark; the caller does the filtering
    pub data_series: Option<&'a TimeSeries>,
    pub watermark: Option<f64>,
    pub run_starts: &'a [OffsetDateTime],
    /// Linear FWHM per run, aligned with `run_starts`
    pub resolutions: &'a [f64],
    pub envelope: Envelope,
    pub period: &'a str,
    pub run: &'a str,
    pub channel_name: &'a str,
    pub string_id: &'a str,
    pub metric_name: &'a str,
}

/// Scan a series against per-run limits and append one event per violating sample.
///
/// Does nothing without data, without a watermark, or with an unset envelope. Each run
/// covers the full calibration validity window after its start, so overlapping windows
/// judge a sample against every run they cover. A sample breaking the same limits twice
/// is reported once.
pub fn check_threshold(check: &ThresholdCheck, accumulator: &mut Vec<AlertEvent>) {
    let Some(series) = check.data_series else {
        return;
    };
    if check.watermark.is_none() || check.envelope.is_unset() {
        return;
    }

    let first_new = accumulator.len();
    let validity = Duration::days(CALIBRATION_VALIDITY_DAYS);
    for (i, start) in check.run_starts.iter().enumerate() {
        let stop = *start + validity;
        let fwhm = check.resolutions.get(i).copied().unwrap_or(f64::NAN);
        let Some((low, high)) = run_limits(fwhm, &check.envelope) else {
            continue;
        };
        for (ts, value) in series.window(start, &stop).iter() {
            let outside = *value < low || *value > high;
            let reported = accumulator[first_new..]
                .iter()
                .any(|e| e.timestamp == *ts && e.low == low && e.high == high);
            if outside && !reported {
                accumulator.push(AlertEvent {
                    timestamp: *ts,
                    period: check.period.to_string(),
                    run: check.run.to_string(),
                    channel_name: check.channel_name.to_string(),
                    string_id: check.string_id.to_string(),
                    metric_name: check.metric_name.to_string(),
                    value: *value,
                    low,
                    high,
                });
            }
        }
    }
}

/// Text lines for a list of events
pub fn alert_lines(events: &[AlertEvent]) -> Vec<String> {
    events.iter().map(|e| e.to_string()).collect()
}
