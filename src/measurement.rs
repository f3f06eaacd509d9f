//! Measurement engine: pure functions over a trace and its frequency axis.
//!
//! Traces are amplitudes in dBm. [`occupied_bandwidth`] converts them to a
//! linear power density normalised by span and RBW, integrates it with the
//! trapezoidal rule and walks two cursors inward until the excluded power
//! exceeds `1 - target_fraction` of the total.
//!
//! The cursor walk assumes a single, roughly symmetric peak. Multi-peak
//! spectra produce a well-defined result that need not be meaningful.

use serde::Serialize;

use crate::error::{Result, RsaError};
use crate::spectrum::ResolvedSpectrum;

/// Fraction of total power used when none is configured.
pub const DEFAULT_OBW_FRACTION: f64 = 0.99;

/// Largest amplitude in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakPower {
    /// Amplitude in trace units (dBm)
    pub power_dbm: f64,
    /// Frequency of the peak in Hz
    pub frequency_hz: f64,
    /// Index of the peak sample
    pub index: usize,
}

/// Bandwidth containing a given fraction of the total power.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OccupiedBandwidth {
    /// `upper_freq_hz - lower_freq_hz`
    pub bandwidth_hz: f64,
    /// Lower edge
    pub lower_freq_hz: f64,
    /// Upper edge
    pub upper_freq_hz: f64,
    /// Index of the lower edge
    pub lower_index: usize,
    /// Index of the upper edge
    pub upper_index: usize,
    /// Integrated power in mW
    pub total_power_mw: f64,
    /// Integrated power in dBm
    pub total_power_dbm: f64,
    /// Fraction the bandwidth was computed for
    pub target_fraction: f64,
}

fn check_trace(trace: &[f32], axis: &[f64]) -> Result<()> {
    if trace.is_empty() {
        return Err(RsaError::measurement("trace is empty"));
    }
    if axis.len() != trace.len() {
        return Err(RsaError::measurement(format!(
            "trace has {} points but frequency axis has {}",
            trace.len(),
            axis.len()
        )));
    }
    if let Some(i) = trace.iter().position(|v| !v.is_finite()) {
        return Err(RsaError::measurement(format!(
            "trace sample {i} is not finite"
        )));
    }
    Ok(())
}

/// Maximum amplitude and its frequency. On exact ties the lowest index wins.
pub fn peak_power(trace: &[f32], axis: &[f64]) -> Result<PeakPower> {
    check_trace(trace, axis)?;
    let mut index = 0;
    for (i, &value) in trace.iter().enumerate().skip(1) {
        if value > trace[index] {
            index = i;
        }
    }
    Ok(PeakPower {
        power_dbm: f64::from(trace[index]),
        frequency_hz: axis[index],
        index,
    })
}

/// Convert dBm samples to linear power density in mW.
///
/// Each sample is scaled by `span / rbw / trace_length`, the resolved
/// number of points per trace, so that integrating across a full trace
/// yields total power.
pub fn dbm_to_normalized_mw(
    trace: &[f32],
    span_hz: f64,
    rbw_hz: f64,
    trace_length: usize,
) -> Vec<f64> {
    let scale = span_hz / rbw_hz / trace_length.max(1) as f64;
    trace
        .iter()
        .map(|&dbm| 10f64.powf(f64::from(dbm) / 10.0) * scale)
        .collect()
}

/// Trapezoidal integral with unit spacing.
pub fn trapezoid(values: &[f64]) -> f64 {
    match values {
        [] | [_] => 0.0,
        [first, .., last] => values.iter().sum::<f64>() - (first + last) / 2.0,
    }
}

/// Occupied bandwidth of a trace.
///
/// `target_fraction` must lie in `(0, 1]`. Two cursors walk inward from
/// the trace ends, each step adding the pair they point at to the excluded
/// power and then moving one bin in. The walk stops once the excluded power
/// exceeds `(1 - target_fraction)` of the total; the edges are the cursor
/// positions after that last step. On a flat trace the result is at most
/// two bins narrower than `target_fraction * span`.
///
/// # Errors
///
/// [`RsaError::MeasurementError`] for an empty or non-finite trace, a
/// trace/axis length mismatch, a fraction out of range, non-positive total
/// power, or cursors that cross before the threshold is met.
pub fn occupied_bandwidth(
    trace: &[f32],
    axis: &[f64],
    spectrum: &ResolvedSpectrum,
    target_fraction: f64,
) -> Result<OccupiedBandwidth> {
    check_trace(trace, axis)?;
    if !(target_fraction > 0.0 && target_fraction <= 1.0) {
        return Err(RsaError::measurement(format!(
            "target fraction {target_fraction} is outside (0, 1]"
        )));
    }

    let mw = dbm_to_normalized_mw(
        trace,
        spectrum.span_hz(),
        spectrum.actual_rbw_hz(),
        spectrum.trace_length(),
    );
    let total_power_mw = trapezoid(&mw);
    if !(total_power_mw.is_finite() && total_power_mw > 0.0) {
        return Err(RsaError::measurement(format!(
            "total power {total_power_mw} mW is not positive"
        )));
    }
    let threshold = (1.0 - target_fraction) * total_power_mw;

    let last = mw.len() - 1;
    let mut left = 0;
    let mut right = last;
    let mut excluded = 0.0;
    while excluded <= threshold {
        if left > right {
            return Err(RsaError::measurement(
                "bandwidth cursors crossed before reaching the power threshold",
            ));
        }
        excluded += mw[left] + mw[right];
        left = (left + 1).min(last);
        right = right.saturating_sub(1);
    }
    if left > right {
        return Err(RsaError::measurement(format!(
            "bandwidth cursors crossed at fraction {target_fraction}; trace too narrow"
        )));
    }

    Ok(OccupiedBandwidth {
        bandwidth_hz: axis[right] - axis[left],
        lower_freq_hz: axis[left],
        upper_freq_hz: axis[right],
        lower_index: left,
        upper_index: right,
        total_power_mw,
        total_power_dbm: 10.0 * total_power_mw.log10(),
        target_fraction,
    })
}

/// Peak and occupied bandwidth of one trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TraceMeasurement {
    /// Peak amplitude
    pub peak: PeakPower,
    /// Occupied bandwidth
    pub obw: OccupiedBandwidth,
}

impl TraceMeasurement {
    /// Measure a trace.
    pub fn compute(
        trace: &[f32],
        axis: &[f64],
        spectrum: &ResolvedSpectrum,
        target_fraction: f64,
    ) -> Result<Self> {
        Ok(Self {
            peak: peak_power(trace, axis)?,
            obw: occupied_bandwidth(trace, axis, spectrum, target_fraction)?,
        })
    }
}
