use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::mpsc::Sender;
use time::OffsetDateTime;

use super::alerting::{alert_lines, check_threshold, AlertEvent, ThresholdCheck};
use super::calib_series::{self, CalibSeriesRequest, CalibrationTimeSeries};
use super::channel_map::{ChannelInfo, ChannelMap};
use super::config::Config;
use super::constants::{ALERT_FILE_NAME, FWHM_TO_SIGMA, STABILITY_FILE_NAME};
use super::data_store::ProdDataStore;
use super::error::{ConfigError, ProcessorError, PulserError};
use super::pulser::{self, PulserRequest};
use super::run_bounds::get_run_start_end_times;
use super::series::{from_unix_seconds, to_unix_seconds, Cadence, IgnoreInterval};
use super::source::DataSource;
use super::stability::{evaluate_psd_performance, StabilityReport, StabilityStatus};
use super::watermark::Watermark;
use super::worker_status::{BarColor, WorkerStatus};

/// Everything shared by the channels of one period
struct PeriodContext<'a> {
    config: &'a Config,
    period: &'a str,
    runs: &'a [String],
    cadence: Cadence,
    ignore_intervals: &'a [IgnoreInterval],
    watermark: Option<OffsetDateTime>,
}

/// Monitoring outcome of one detector channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelResult {
    #[serde(flatten)]
    pub info: ChannelInfo,
    /// False when the gain series had no usable baseline
    pub gain_monitored: bool,
    pub pulser_corrected: bool,
    pub stability: StabilityReport,
    pub calibration: CalibrationTimeSeries,
    pub alerts: Vec<AlertEvent>,
    #[serde(skip)]
    pub newest_sample: Option<OffsetDateTime>,
}

/// Everything written to a period's stability file
#[derive(Debug, Clone, Serialize)]
pub struct PeriodSummary {
    pub period: String,
    pub runs: Vec<String>,
    pub channels: Vec<ChannelResult>,
}

impl PeriodSummary {
    pub fn n_unstable(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.stability.status == StabilityStatus::Unstable)
            .count()
    }

    pub fn n_alerts(&self) -> usize {
        self.channels.iter().map(|c| c.alerts.len()).sum()
    }
}

/// Calibration history, stability and alerts of one channel
fn process_channel<S: DataSource + ?Sized>(
    source: &S,
    ctx: &PeriodContext,
    info: &ChannelInfo,
) -> Result<ChannelResult, ProcessorError> {
    let config = ctx.config;
    let calibration = calib_series::build(
        source,
        &CalibSeriesRequest {
            channel: &info.channel,
            period: ctx.period,
            run_list: ctx.runs,
            extra_runs: config.get_extra_calibration_runs(ctx.period),
            partition: config.partition,
            energy_scale: config.energy_scale,
            fit: config.fit,
            calibration_keys: [
                config.calibration_key.as_str(),
                config.fallback_calibration_key.as_str(),
            ],
            probe_channel: &config.probe_channel,
        },
    )?;

    let current_run = ctx.runs.last().map(String::as_str).unwrap_or_default();
    let sigma: Vec<f64> = calibration.res.iter().map(|r| r / FWHM_TO_SIGMA).collect();
    let stability = evaluate_psd_performance(
        &calibration.cal_const_diff,
        &sigma,
        &calibration.runs,
        current_run,
        &info.name,
    );

    let gain = match pulser::build(
        source,
        &PulserRequest {
            channel: &info.channel,
            pulser_channel: &config.pulser_channel,
            period: ctx.period,
            run_list: ctx.runs,
            energy_key: &config.energy_key,
            cadence: ctx.cadence,
            energy_scale: config.energy_scale,
            compute_variation: config.compute_variation,
            ignore_intervals: ctx.ignore_intervals,
            use_pulser: !config.skips_pulser(ctx.period, &info.channel),
        },
    ) {
        Ok(gain) => Some(gain),
        Err(PulserError::InsufficientBaseline(channel)) => {
            log::warn!(
                "No valid gain baseline for {} ({channel}) in {}; skipping gain monitoring",
                info.name,
                ctx.period
            );
            None
        }
        Err(e) => return Err(e.into()),
    };

    let mut result = ChannelResult {
        info: info.clone(),
        gain_monitored: gain.is_some(),
        pulser_corrected: false,
        stability,
        calibration,
        alerts: vec![],
        newest_sample: None,
    };
    let Some(gain) = gain else {
        return Ok(result);
    };

    result.pulser_corrected = gain.corrected.is_some();
    let best = &gain.best().resampled_mean;
    result.newest_sample = best.last_timestamp();
    let fresh = ctx.watermark.map(|w| best.after(&w));
    let string_id = info.string.to_string();
    let check = ThresholdCheck {
        data_series: fresh.as_ref(),
        watermark: ctx.watermark.map(|w| to_unix_seconds(&w)),
        run_starts: &result.calibration.run_start,
        resolutions: &result.calibration.res,
        envelope: config.envelope,
        period: ctx.period,
        run: current_run,
        channel_name: &info.name,
        string_id: &string_id,
        metric_name: if result.pulser_corrected {
            "corrected_gain_shift"
        } else {
            "gain_shift"
        },
    };
    let mut alerts = vec![];
    check_threshold(&check, &mut alerts);
    result.alerts = alerts;
    Ok(result)
}

/// Process the channels of one worker. Failing channels are logged and skipped.
fn process_subset<S: DataSource + ?Sized>(
    source: &S,
    ctx: &PeriodContext,
    channels: &[ChannelInfo],
    subset: &[usize],
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<Vec<(usize, ChannelResult)>, ProcessorError> {
    let mut results = vec![];
    for (done, idx) in subset.iter().enumerate() {
        let info = &channels[*idx];
        let progress = done as f32 / subset.len() as f32;
        tx.send(WorkerStatus::new(
            progress,
            ctx.period,
            &info.name,
            worker_id,
            BarColor::CYAN,
        ))?;
        match process_channel(source, ctx, info) {
            Ok(result) => results.push((*idx, result)),
            Err(e) => {
                log::warn!(
                    "Skipping {} ({}) in {}: {e}",
                    info.name,
                    info.channel,
                    ctx.period
                );
                tx.send(WorkerStatus::new(
                    progress,
                    ctx.period,
                    &info.name,
                    worker_id,
                    BarColor::RED,
                ))?;
            }
        }
    }
    tx.send(WorkerStatus::new(1.0, ctx.period, "", worker_id, BarColor::GREEN))?;
    Ok(results)
}

/// Write the stability file and append the alert lines of a period
fn write_period_outputs(config: &Config, summary: &PeriodSummary) -> Result<(), ProcessorError> {
    let out_dir = config.get_output_directory(&summary.period);
    std::fs::create_dir_all(&out_dir)?;
    std::fs::write(
        out_dir.join(STABILITY_FILE_NAME),
        serde_yaml::to_string(summary)?,
    )?;

    let events: Vec<AlertEvent> = summary
        .channels
        .iter()
        .flat_map(|c| c.alerts.iter().cloned())
        .collect();
    if events.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(out_dir.join(ALERT_FILE_NAME))?;
    for line in alert_lines(&events) {
        writeln!(file, "{line}")?;
    }
    log::warn!("{} alerts raised in {}", events.len(), summary.period);
    Ok(())
}

/// Move the watermark forward to the newest sample of the period, never backward
fn advance_watermark(config: &Config, summary: &PeriodSummary) -> Result<(), ProcessorError> {
    let Some(path) = &config.watermark_path else {
        return Ok(());
    };
    let Some(newest) = summary.channels.iter().filter_map(|c| c.newest_sample).max() else {
        return Ok(());
    };
    let newest = to_unix_seconds(&newest);
    match Watermark::load(path)? {
        Some(current) if current >= newest => (),
        _ => Watermark::store(path, newest)?,
    }
    Ok(())
}

/// Start of the first run of a period that can be bounded
fn period_start<S: DataSource + ?Sized>(
    source: &S,
    period: &str,
    runs: &[String],
    probe_channel: &str,
) -> Result<OffsetDateTime, ProcessorError> {
    let mut last_error = None;
    for run in runs {
        match get_run_start_end_times(source, period, run, probe_channel) {
            Ok(bounds) => return Ok(bounds.start),
            Err(e) => {
                log::warn!("Could not bound {period} {run}: {e}");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(e.into()),
        None => Err(ProcessorError::NoRuns(period.to_string())),
    }
}

/// Monitor every processable channel of a period and write the period outputs.
///
/// Channels are spread over `n_threads` scoped workers; results are put back in
/// (string, position) order before anything is written.
pub fn process_period<S: DataSource + Sync + ?Sized>(
    config: &Config,
    source: &S,
    channel_map: &ChannelMap,
    period: &str,
    runs: &[String],
    tx: &Sender<WorkerStatus>,
) -> Result<PeriodSummary, ProcessorError> {
    let first_start = period_start(source, period, runs, &config.probe_channel)?;
    let channels: Vec<ChannelInfo> = channel_map
        .strings_at(&first_start, &[config.pulser_channel.as_str()])
        .into_iter()
        .flat_map(|(_, channels)| channels)
        .collect();
    log::info!(
        "Period {period}: {} runs, {} channels to monitor",
        runs.len(),
        channels.len()
    );

    let watermark = match &config.watermark_path {
        Some(path) => Watermark::load(path)?,
        None => None,
    };
    let ignore_intervals = config.get_ignore_intervals(period)?;
    let ctx = PeriodContext {
        config,
        period,
        runs,
        cadence: config.get_cadence()?,
        ignore_intervals: &ignore_intervals,
        watermark: watermark.map(from_unix_seconds).transpose()?,
    };

    let subsets = create_subsets(config.n_threads as usize, channels.len());
    let joined = std::thread::scope(|s| {
        let handles: Vec<_> = subsets
            .iter()
            .enumerate()
            .map(|(worker_id, subset)| {
                let tx = tx.clone();
                let ctx = &ctx;
                let channels = &channels;
                s.spawn(move || process_subset(source, ctx, channels, subset, &tx, worker_id))
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
    });

    let mut indexed = vec![];
    for worker in joined {
        match worker {
            Ok(results) => indexed.extend(results?),
            Err(_) => return Err(ProcessorError::WorkerPanic),
        }
    }
    indexed.sort_by_key(|(idx, _)| *idx);

    let summary = PeriodSummary {
        period: period.to_string(),
        runs: runs.to_vec(),
        channels: indexed.into_iter().map(|(_, result)| result).collect(),
    };
    write_period_outputs(config, &summary)?;
    advance_watermark(config, &summary)?;
    Ok(summary)
}

/// The main loop of the gain monitor.
///
/// This takes in a config (and progress monitor) and monitors every configured period
/// in order. Periods where no run can be bounded are skipped.
pub fn process(config: Config, tx: Sender<WorkerStatus>) -> Result<(), ProcessorError> {
    if !config.is_n_threads_valid() {
        return Err(ConfigError::BadThreadCount(config.n_threads).into());
    }
    let channel_map = ChannelMap::new(&config.channel_map_path)?;
    let source = ProdDataStore::new(&config);

    for (period, runs) in config.periods.iter() {
        log::info!("Processing period {period}...");
        match process_period(&config, &source, &channel_map, period, runs, &tx) {
            Ok(summary) => log::info!(
                "Finished period {period}: {} channels, {} unstable, {} alerts.",
                summary.channels.len(),
                summary.n_unstable(),
                summary.n_alerts()
            ),
            Err(ProcessorError::NoRuns(p)) => log::warn!("Period {p} lists no runs, skipping..."),
            Err(ProcessorError::BoundsError(e)) => {
                log::warn!("Could not bound the runs of {period}: {e}. Skipping...")
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Divide the channel indices into a set of subsets (per thread/worker)
pub fn create_subsets(n_threads: usize, n_items: usize) -> Vec<Vec<usize>> {
    let mut subsets: Vec<Vec<usize>> = vec![Vec::new(); n_threads.max(1)];
    let n_subsets = subsets.len();

    for idx in 0..n_items {
        subsets[idx % n_subsets].push(idx)
    }

    subsets
}
