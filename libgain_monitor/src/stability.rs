use serde::Serialize;

use super::constants::{SLOW_SHIFT_LIMIT, SUDDEN_SHIFT_LIMIT};
use super::series::{nan_mean, nan_std};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityStatus {
    Stable,
    Unstable,
    #[default]
    Indeterminate,
}

/// Classification of one channel's per-run mean/sigma history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StabilityReport {
    pub channel: String,
    pub current_run: String,
    pub status: StabilityStatus,
    pub slow_shift_fail_runs: Vec<String>,
    pub sudden_shift_fail_runs: Vec<String>,
    pub slow_shifts: Vec<f64>,
    pub sudden_shifts: Vec<f64>,
    pub mean_avg: f64,
    pub mean_std: f64,
    pub sigma_avg: f64,
    pub sigma_std: f64,
}

impl StabilityReport {
    pub fn is_stable(&self) -> bool {
        self.status == StabilityStatus::Stable
    }
}

/// Drift of every run from the first valid run, in units of the average sigma
pub fn slow_shifts(mean_vals: &[f64], first_valid: usize, sigma_avg: f64) -> Vec<f64> {
    let reference = mean_vals[first_valid];
    mean_vals
        .iter()
        .map(|m| (m - reference) / sigma_avg)
        .collect()
}

/// Run-to-run jumps in units of the earlier run's sigma. The first entry is a
/// defined 0 for the first valid run; undefined jumps are NaN.
pub fn sudden_shifts(mean_vals: &[f64], sigma_vals: &[f64], first_valid: usize) -> Vec<f64> {
    let mut shifts = vec![0.0];
    for i in first_valid..mean_vals.len().saturating_sub(1) {
        let (prev, curr) = (mean_vals[i], mean_vals[i + 1]);
        let sigma = sigma_vals.get(i).copied().unwrap_or(f64::NAN);
        if prev.is_nan() || curr.is_nan() || sigma.is_nan() || sigma == 0.0 {
            shifts.push(f64::NAN);
        } else {
            shifts.push((curr - prev).abs() / sigma);
        }
    }
    shifts
}

/// Classify the stability of one channel.
///
/// Slow shifts fail strictly above the limit, sudden shifts fail at or above theirs.
/// A history with no valid mean is indeterminate and reports no failures.
pub fn evaluate_psd_performance(
    mean_vals: &[f64],
    sigma_vals: &[f64],
    run_labels: &[String],
    current_run: &str,
    det_name: &str,
) -> StabilityReport {
    let mut report = StabilityReport {
        channel: det_name.to_string(),
        current_run: current_run.to_string(),
        mean_avg: nan_mean(mean_vals),
        mean_std: nan_std(mean_vals),
        sigma_avg: nan_mean(sigma_vals),
        sigma_std: nan_std(sigma_vals),
        ..StabilityReport::default()
    };

    let Some(first_valid) = mean_vals.iter().position(|m| !m.is_nan()) else {
        log::debug!("{det_name}: no valid means up to {current_run}; stability indeterminate");
        return report;
    };
    let label = |i: usize| {
        run_labels
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("#{i}"))
    };

    report.slow_shifts = slow_shifts(mean_vals, first_valid, report.sigma_avg);
    report.slow_shift_fail_runs = report
        .slow_shifts
        .iter()
        .enumerate()
        .filter(|(_, s)| s.abs() > SLOW_SHIFT_LIMIT)
        .map(|(i, _)| label(i))
        .collect();

    report.sudden_shifts = sudden_shifts(mean_vals, sigma_vals, first_valid);
    // Entry k (k >= 1) is the jump from run first_valid + k - 1 to first_valid + k
    report.sudden_shift_fail_runs = report
        .sudden_shifts
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, s)| s.abs() >= SUDDEN_SHIFT_LIMIT)
        .map(|(k, _)| {
            let curr = first_valid + k;
            format!("{}TO{}", label(curr - 1), label(curr))
        })
        .collect();

    report.status = if report.slow_shift_fail_runs.is_empty()
        && report.sudden_shift_fail_runs.is_empty()
    {
        StabilityStatus::Stable
    } else {
        log::warn!(
            "{det_name} unstable at {current_run}: slow shifts in {:?}, sudden shifts in {:?}",
            report.slow_shift_fail_runs,
            report.sudden_shift_fail_runs
        );
        StabilityStatus::Unstable
    };
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("r{i:03}")).collect()
    }

    #[test]
    fn test_slow_shift_failure() {
        let report =
            evaluate_psd_performance(&[1.0, 2.0, 1.0], &[0.5, 0.5, 0.5], &labels(3), "r003", "V01");
        assert_eq!(report.status, StabilityStatus::Unstable);
        assert_eq!(report.slow_shifts, vec![0.0, 2.0, 0.0]);
        assert_eq!(report.slow_shift_fail_runs, vec!["r002".to_string()]);
        assert_eq!(report.sudden_shifts, vec![0.0, 2.0, 2.0]);
        assert_eq!(
            report.sudden_shift_fail_runs,
            vec!["r001TOr002".to_string(), "r002TOr003".to_string()]
        );
        assert_eq!(report.sigma_avg, 0.5);
    }

    #[test]
    fn test_all_nan_is_indeterminate() {
        let nan = f64::NAN;
        let report = evaluate_psd_performance(&[nan, nan], &[1.0, 1.0], &labels(2), "r002", "V01");
        assert_eq!(report.status, StabilityStatus::Indeterminate);
        assert!(report.slow_shift_fail_runs.is_empty());
        assert!(report.sudden_shift_fail_runs.is_empty());
        assert!(!report.is_stable());
    }

    #[test]
    fn test_threshold_boundaries() {
        // Slow shift of exactly 0.5 passes, sudden shift of 0.25 fails
        let report = evaluate_psd_performance(&[0.0, 0.5], &[1.0, 1.0], &labels(2), "r002", "V01");
        assert!(report.slow_shift_fail_runs.is_empty());
        assert_eq!(report.sudden_shifts, vec![0.0, 0.5]);
        assert_eq!(report.sudden_shift_fail_runs, vec!["r001TOr002".to_string()]);

        let report = evaluate_psd_performance(&[0.0, 0.25], &[1.0, 1.0], &labels(2), "r002", "V01");
        assert!(report.slow_shift_fail_runs.is_empty());
        assert_eq!(report.sudden_shift_fail_runs, vec!["r001TOr002".to_string()]);
        assert_eq!(report.status, StabilityStatus::Unstable);

        let report = evaluate_psd_performance(&[0.0, 0.2], &[1.0, 1.0], &labels(2), "r002", "V01");
        assert_eq!(report.status, StabilityStatus::Stable);
    }

    #[test]
    fn test_leading_nan_and_undefined_jumps() {
        let nan = f64::NAN;
        let report = evaluate_psd_performance(
            &[nan, 1.0, 1.05, 1.3, nan],
            &[1.0, 1.0, 0.0, 1.0, 1.0],
            &labels(5),
            "r005",
            "V01",
        );
        assert!(report.slow_shifts[0].is_nan());
        assert_eq!(report.slow_shifts[1], 0.0);
        // Aligned to the first valid run: [0, r2->r3, r3->r4, r4->r5]
        assert_eq!(report.sudden_shifts.len(), 4);
        assert_eq!(report.sudden_shifts[0], 0.0);
        assert!((report.sudden_shifts[1] - 0.05).abs() < 1e-12);
        assert!(report.sudden_shifts[2].is_nan()); // zero sigma
        assert!(report.sudden_shifts[3].is_nan()); // NaN mean
        assert!(report.sudden_shift_fail_runs.is_empty());
        assert_eq!(report.status, StabilityStatus::Stable);
    }

    #[test]
    fn test_late_first_valid_labels() {
        let nan = f64::NAN;
        let report =
            evaluate_psd_performance(&[nan, 1.0, 3.0], &[1.0, 1.0, 1.0], &labels(3), "r003", "V01");
        assert_eq!(report.sudden_shift_fail_runs, vec!["r002TOr003".to_string()]);
        assert_eq!(report.slow_shift_fail_runs, vec!["r003".to_string()]);
    }
}
