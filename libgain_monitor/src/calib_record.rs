use serde::Serialize;
use serde_yaml::Value;
use std::collections::HashMap;

use super::config::FitMode;
use super::constants::{FEP_ENERGY, FEP_WINDOW_HIGH, FEP_WINDOW_LOW, QBB_FWHM_TOKEN};
use super::error::ExpressionError;
use super::expression::Expression;
use super::source::SchemaVariant;

/// One run's calibration fit result for one channel. Missing values are NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationRecord {
    pub fep_peak_pos: f64,
    pub fep_peak_pos_err: f64,
    pub fep_gain: f64,
    pub fep_gain_err: f64,
    pub fep_cal: f64,
    pub fep_cal_err: f64,
    pub fwhm_linear: f64,
    pub fwhm_quadratic: f64,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self::null()
    }
}

impl CalibrationRecord {
    /// A record with every field missing
    pub fn null() -> Self {
        Self {
            fep_peak_pos: f64::NAN,
            fep_peak_pos_err: f64::NAN,
            fep_gain: f64::NAN,
            fep_gain_err: f64::NAN,
            fep_cal: f64::NAN,
            fep_cal_err: f64::NAN,
            fwhm_linear: f64::NAN,
            fwhm_quadratic: f64::NAN,
        }
    }

    pub fn is_null(&self) -> bool {
        [
            self.fep_peak_pos,
            self.fep_peak_pos_err,
            self.fep_gain,
            self.fep_gain_err,
            self.fep_cal,
            self.fep_cal_err,
            self.fwhm_linear,
            self.fwhm_quadratic,
        ]
        .iter()
        .all(|v| v.is_nan())
    }
}

/// The key names a lookup depends on
#[derive(Debug, Clone, Copy)]
pub struct ExtractionKeys<'a> {
    /// Alternative calibration keys, first found wins
    pub calibration_keys: [&'a str; 2],
    pub variant: SchemaVariant,
    pub fit: FitMode,
}

/// Location and parameters of the FEP fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FepPeak {
    pub position: f64,
    pub position_err: f64,
}

fn key_as_f64(key: &Value) -> Option<f64> {
    match key {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn number(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(f64::NAN)
}

/// The energy-calibration result sets searched for a variant, in order
fn results_keys(variant: SchemaVariant) -> Vec<&'static str> {
    match variant {
        SchemaVariant::Hit => vec![SchemaVariant::Hit.results_key()],
        SchemaVariant::PartitionAggregate => vec![
            SchemaVariant::PartitionAggregate.results_key(),
            SchemaVariant::Hit.results_key(),
        ],
    }
}

/// Find the calibration substructure and the key it was found under
fn find_calibration<'v, 'k>(
    channel: &'v Value,
    keys: &ExtractionKeys<'k>,
) -> Option<(&'v Value, &'k str)> {
    let results = channel.get("results")?;
    for results_key in results_keys(keys.variant) {
        let Some(set) = results.get(results_key) else {
            continue;
        };
        for cal_key in keys.calibration_keys {
            if let Some(cal) = set.get(cal_key) {
                return Some((cal, cal_key));
            }
        }
    }
    None
}

/// Locate the FEP fit in a calibration substructure. Raw-ADC parameters take
/// precedence over already-scaled ones.
pub fn extract_fep_peak(calibration: &Value) -> Option<FepPeak> {
    let pk_fits = calibration.get("pk_fits")?.as_mapping()?;
    let fit = pk_fits.iter().find_map(|(energy, fit)| {
        let energy = key_as_f64(energy)?;
        (energy > FEP_WINDOW_LOW && energy < FEP_WINDOW_HIGH).then_some(fit)
    })?;

    let (params, errors) = if fit.get("parameters_in_ADC").is_some() {
        (
            fit.get("parameters_in_ADC"),
            fit.get("uncertainties_in_ADC"),
        )
    } else {
        (fit.get("parameters"), fit.get("uncertainties"))
    };
    Some(FepPeak {
        position: number(params.and_then(|p| p.get("mu"))),
        position_err: number(errors.and_then(|e| e.get("mu"))),
    })
}

/// FWHM at Qbb from a resolution block. The field is found by substring match since
/// the unit suffix changes between processing versions.
pub fn extract_qbb_fwhm(eres: Option<&Value>, channel: &str) -> f64 {
    let Some(mapping) = eres.and_then(Value::as_mapping) else {
        return f64::NAN;
    };
    let matches: Vec<&Value> = mapping
        .iter()
        .filter(|(k, _)| k.as_str().is_some_and(|k| k.contains(QBB_FWHM_TOKEN)))
        .map(|(_, v)| v)
        .collect();
    if matches.len() > 1 {
        log::warn!(
            "Channel {channel} has {} fields matching {QBB_FWHM_TOKEN}; using the first",
            matches.len()
        );
    }
    number(matches.first().copied())
}

/// Evaluate the stored calibration formula at `x`. Identifiers that are not named
/// coefficients stand for the uncalibrated energy variable; at most one is allowed.
fn evaluate_calibration(operation: &Value, x: f64) -> Result<f64, ExpressionError> {
    let source = operation
        .get("expression")
        .and_then(Value::as_str)
        .ok_or(ExpressionError::UnexpectedEnd)?;
    let expression = Expression::parse(source)?;

    let mut bindings: HashMap<String, f64> = HashMap::new();
    if let Some(params) = operation.get("parameters").and_then(Value::as_mapping) {
        for (name, value) in params {
            if let (Some(name), Some(value)) = (name.as_str(), value.as_f64()) {
                bindings.insert(name.to_string(), value);
            }
        }
    }
    let free: Vec<String> = expression
        .identifiers()
        .into_iter()
        .filter(|name| !bindings.contains_key(name))
        .collect();
    match free.as_slice() {
        [] => (),
        [variable] => {
            bindings.insert(variable.clone(), x);
        }
        [_, second, ..] => return Err(ExpressionError::UnknownIdentifier(second.clone())),
    }
    expression.eval(&bindings)
}

fn calibrated(channel_blob: &Value, cal_key: &str, x: f64, channel: &str) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let Some(operation) = channel_blob
        .get("pars")
        .and_then(|p| p.get("operations"))
        .and_then(|o| o.get(cal_key))
    else {
        return f64::NAN;
    };
    match evaluate_calibration(operation, x) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Channel {channel}: could not evaluate {cal_key}: {e}");
            f64::NAN
        }
    }
}

/// Normalise one channel's calibration result from a calibration document.
///
/// A channel absent from the document, or without a FEP fit, yields an all-NaN
/// record. Any other missing key only blanks the field that depends on it.
pub fn extract(blob: &Value, channel: &str, keys: &ExtractionKeys) -> CalibrationRecord {
    let Some(channel_blob) = blob.get(channel) else {
        return CalibrationRecord::null();
    };
    let Some((calibration, cal_key)) = find_calibration(channel_blob, keys) else {
        return CalibrationRecord::null();
    };
    let Some(peak) = extract_fep_peak(calibration) else {
        return CalibrationRecord::null();
    };

    let fwhm_quadratic = match keys.fit {
        FitMode::Quadratic => extract_qbb_fwhm(calibration.get("eres_quadratic"), channel),
        FitMode::Linear => f64::NAN,
    };

    CalibrationRecord {
        fep_peak_pos: peak.position,
        fep_peak_pos_err: peak.position_err,
        fep_gain: peak.position / FEP_ENERGY,
        fep_gain_err: peak.position_err / FEP_ENERGY,
        fep_cal: calibrated(channel_blob, cal_key, peak.position, channel),
        fep_cal_err: calibrated(channel_blob, cal_key, peak.position_err, channel),
        fwhm_linear: extract_qbb_fwhm(calibration.get("eres_linear"), channel),
        fwhm_quadratic,
    }
}
