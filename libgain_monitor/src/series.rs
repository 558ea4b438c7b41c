use std::collections::HashMap;
use std::str::FromStr;

use serde::Serializer;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use super::constants::BASELINE_FRACTION;
use super::error::SeriesError;

/// Compact UTC stamp used in configuration and channel maps, e.g. 20250102T000000Z
const STAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

/// Parse a compact UTC stamp
pub fn parse_stamp(stamp: &str) -> Result<OffsetDateTime, SeriesError> {
    PrimitiveDateTime::parse(stamp, STAMP_FORMAT)
        .map(|dt| dt.assume_utc())
        .map_err(|e| SeriesError::BadTimestamp(stamp.to_string(), e.to_string()))
}

/// Render a timestamp as a compact UTC stamp
pub fn format_stamp(ts: &OffsetDateTime) -> String {
    ts.to_offset(UtcOffset::UTC)
        .format(STAMP_FORMAT)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// Convert seconds since the epoch into a UTC timestamp
pub fn from_unix_seconds(seconds: f64) -> Result<OffsetDateTime, SeriesError> {
    if !seconds.is_finite() {
        return Err(SeriesError::BadUnixTimestamp(seconds));
    }
    OffsetDateTime::from_unix_timestamp_nanos((seconds * 1e9).round() as i128)
        .map_err(|_| SeriesError::BadUnixTimestamp(seconds))
}

/// Seconds since the epoch as a float
pub fn to_unix_seconds(ts: &OffsetDateTime) -> f64 {
    ts.unix_timestamp_nanos() as f64 * 1e-9
}

/// serde helper writing timestamps as compact stamps
pub(crate) fn serialize_stamps<S: Serializer>(
    stamps: &[OffsetDateTime],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(stamps.iter().map(format_stamp))
}

/// Bin width for resampling. Parsed from strings like "1h", "30min", "1D" or "10s".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence(Duration);

impl Cadence {
    pub fn width(&self) -> Duration {
        self.0
    }
}

impl FromStr for Cadence {
    type Err = SeriesError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (count, unit) = trimmed.split_at(split);
        let count: i64 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .map_err(|_| SeriesError::BadCadence(s.to_string()))?
        };
        let unit_width = match unit {
            "s" | "S" | "sec" => Duration::SECOND,
            "min" | "T" | "m" => Duration::MINUTE,
            "h" | "H" => Duration::HOUR,
            "d" | "D" => Duration::DAY,
            "w" | "W" => Duration::WEEK,
            _ => return Err(SeriesError::BadCadence(s.to_string())),
        };
        let width = i32::try_from(count)
            .ok()
            .filter(|c| *c > 0)
            .and_then(|c| unit_width.checked_mul(c))
            .ok_or_else(|| SeriesError::BadCadence(s.to_string()))?;
        Ok(Self(width))
    }
}

/// A closed time window whose samples are excluded from the analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgnoreInterval {
    pub start: OffsetDateTime,
    pub stop: OffsetDateTime,
}

impl IgnoreInterval {
    pub fn new(start: OffsetDateTime, stop: OffsetDateTime) -> Self {
        Self { start, stop }
    }

    pub fn contains(&self, ts: &OffsetDateTime) -> bool {
        *ts >= self.start && *ts <= self.stop
    }
}

/// A timestamp-indexed series of values. Timestamps are kept in UTC.
///
/// Order is insertion order; concatenating runs keeps each run's order but does
/// not re-sort globally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    index: Vec<OffsetDateTime>,
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parallel vectors. Extra entries of the longer vector are dropped.
    pub fn from_parts(index: Vec<OffsetDateTime>, mut values: Vec<f64>) -> Self {
        let mut index: Vec<OffsetDateTime> = index
            .into_iter()
            .map(|ts| ts.to_offset(UtcOffset::UTC))
            .collect();
        if index.len() != values.len() {
            log::warn!(
                "TimeSeries built from {} timestamps and {} values; truncating",
                index.len(),
                values.len()
            );
            let n = index.len().min(values.len());
            index.truncate(n);
            values.truncate(n);
        }
        Self { index, values }
    }

    /// Build from seconds since the epoch
    pub fn from_unix(seconds: &[f64], values: Vec<f64>) -> Result<Self, SeriesError> {
        let index = seconds
            .iter()
            .map(|s| from_unix_seconds(*s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_parts(index, values))
    }

    pub fn push(&mut self, ts: OffsetDateTime, value: f64) {
        self.index.push(ts.to_offset(UtcOffset::UTC));
        self.values.push(value);
    }

    /// Append another series after this one
    pub fn extend(&mut self, other: TimeSeries) {
        self.index.extend(other.index);
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn index(&self) -> &[OffsetDateTime] {
        &self.index
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OffsetDateTime, &f64)> {
        self.index.iter().zip(self.values.iter())
    }

    pub fn last_timestamp(&self) -> Option<OffsetDateTime> {
        self.index.iter().max().copied()
    }

    fn filtered<F: Fn(&OffsetDateTime) -> bool>(&self, keep: F) -> Self {
        let mut out = Self::new();
        for (ts, v) in self.iter() {
            if keep(ts) {
                out.index.push(*ts);
                out.values.push(*v);
            }
        }
        out
    }

    /// Remove every sample inside any of the ignore intervals (bounds included)
    pub fn filter_by_period(&self, intervals: &[IgnoreInterval]) -> Self {
        self.filtered(|ts| !intervals.iter().any(|iv| iv.contains(ts)))
    }

    /// Samples strictly after `start`
    pub fn after(&self, start: &OffsetDateTime) -> Self {
        self.filtered(|ts| ts > start)
    }

    /// Samples in the half-open window [start, stop)
    pub fn window(&self, start: &OffsetDateTime, stop: &OffsetDateTime) -> Self {
        self.filtered(|ts| ts >= start && ts < stop)
    }

    /// Mean of the first 10% of the series (at least one sample), skipping NaN.
    ///
    /// NaN when the window holds no finite value.
    pub fn baseline(&self) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        let n = ((self.len() as f64 * BASELINE_FRACTION) as usize).max(1);
        nan_mean(&self.values[..n])
    }

    /// Fractional deviation from a baseline, (x - b) / b
    pub fn deviation(&self, baseline: f64) -> Self {
        self.map(|x| (x - baseline) / baseline)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        self.map(|x| x * factor)
    }

    fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        Self {
            index: self.index.clone(),
            values: self.values.iter().map(|x| f(*x)).collect(),
        }
    }

    /// self - other, evaluated only at timestamps present in both (inner join).
    ///
    /// Keeps the order of `self`. Duplicate timestamps in `other` resolve to the first.
    pub fn subtract_common(&self, other: &TimeSeries) -> Self {
        let mut lookup: HashMap<i128, f64> = HashMap::with_capacity(other.len());
        for (ts, v) in other.iter() {
            lookup.entry(ts.unix_timestamp_nanos()).or_insert(*v);
        }
        let mut out = Self::new();
        for (ts, v) in self.iter() {
            if let Some(o) = lookup.get(&ts.unix_timestamp_nanos()) {
                out.index.push(*ts);
                out.values.push(v - o);
            }
        }
        out
    }

    /// Gap-aware resampling into epoch-aligned bins.
    ///
    /// Every bin between the first and last populated one is emitted. A bin whose
    /// count of finite samples is zero gets NaN for both mean and std.
    pub fn resample(&self, cadence: Cadence) -> Resampled {
        let width = cadence.width().whole_nanoseconds().max(1);
        let mut bins: HashMap<i128, Accumulator> = HashMap::new();
        let mut first_bin: Option<i128> = None;
        let mut last_bin: Option<i128> = None;
        for (ts, v) in self.iter() {
            let bin = ts.unix_timestamp_nanos().div_euclid(width);
            first_bin = Some(first_bin.map_or(bin, |b| b.min(bin)));
            last_bin = Some(last_bin.map_or(bin, |b| b.max(bin)));
            let acc = bins.entry(bin).or_default();
            if v.is_finite() {
                acc.add(*v);
            }
        }

        let mut out = Resampled::default();
        let (Some(first), Some(last)) = (first_bin, last_bin) else {
            return out;
        };
        for bin in first..=last {
            let Ok(start) = OffsetDateTime::from_unix_timestamp_nanos(bin * width) else {
                continue;
            };
            let acc = bins.get(&bin).copied().unwrap_or_default();
            let (mean, std) = if acc.count == 0 {
                (f64::NAN, f64::NAN)
            } else {
                (acc.mean, acc.sample_std())
            };
            out.mean.push(start, mean);
            out.std.push(start, std);
            out.count.push(acc.count);
        }
        out
    }
}

/// Result of resampling: mean and std share one bin index; `count` is the
/// number of finite raw samples per bin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resampled {
    pub mean: TimeSeries,
    pub std: TimeSeries,
    pub count: Vec<usize>,
}

/// Welford accumulator
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Accumulator {
    fn add(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn sample_std(&self) -> f64 {
        if self.count < 2 {
            return f64::NAN;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }
}

/// Mean ignoring NaN; NaN if nothing is finite
pub fn nan_mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Population standard deviation ignoring NaN; NaN if nothing is finite
pub fn nan_std(values: &[f64]) -> f64 {
    let mean = nan_mean(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + (v - mean).powi(2), n + 1));
    (sum / n as f64).sqrt()
}
