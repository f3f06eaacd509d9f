//! Spectrum settings, resolved snapshots and per-trace metadata.
//!
//! The analyzer accepts a requested [`SpectrumSettings`] and rounds or clamps
//! it to what the hardware can do. Only the values read back after the
//! commit are authoritative; they are wrapped in a [`ResolvedSpectrum`],
//! which is the only settings type the acquisition loop and measurement
//! engine accept.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, RsaError};

/// FFT window applied by the spectrum engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumWindow {
    /// Kaiser (device default)
    #[default]
    Kaiser,
    /// Mil-spec 6 dB
    Mil6Db,
    /// Blackman-Harris
    BlackmanHarris,
    /// Rectangular (no window)
    Rectangle,
    /// Flat-top, for amplitude accuracy
    FlatTop,
    /// Hann
    Hann,
}

/// Unit of the trace amplitude samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalUnit {
    /// Decibel-milliwatts (required by the measurement engine)
    #[default]
    Dbm,
    /// Watts
    Watt,
    /// Volts
    Volt,
    /// Amperes
    Amp,
    /// Decibel-millivolts
    DbmV,
}

/// Which of the device's three spectrum traces to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceSelector {
    /// Trace 1
    #[default]
    Trace1,
    /// Trace 2
    Trace2,
    /// Trace 3
    Trace3,
}

impl TraceSelector {
    /// Zero-based trace index used by the driver.
    pub fn index(self) -> usize {
        match self {
            Self::Trace1 => 0,
            Self::Trace2 => 1,
            Self::Trace3 => 2,
        }
    }
}

/// Spectrum settings as exchanged with the driver.
///
/// The first group of fields is requested by the caller. The `actual_*`
/// fields are only meaningful after the settings were committed and read
/// back; see [`ResolvedSpectrum`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSettings {
    /// Requested span in Hz
    pub span_hz: f64,
    /// Requested resolution bandwidth in Hz
    pub rbw_hz: f64,
    /// Whether the video bandwidth filter is enabled
    pub enable_vbw: bool,
    /// Requested video bandwidth in Hz
    pub vbw_hz: f64,
    /// Number of points per trace
    pub trace_length: usize,
    /// FFT window
    pub window: SpectrumWindow,
    /// Amplitude unit
    pub vertical_unit: VerticalUnit,
    /// Frequency of the first trace point
    pub actual_start_freq_hz: f64,
    /// Frequency of the last trace point
    pub actual_stop_freq_hz: f64,
    /// Spacing between trace points
    pub actual_freq_step_hz: f64,
    /// Resolution bandwidth the device actually uses
    pub actual_rbw_hz: f64,
    /// Video bandwidth the device actually uses
    pub actual_vbw_hz: f64,
    /// IQ samples processed per trace
    pub actual_num_iq_samples: u32,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            span_hz: 40e6,
            rbw_hz: 300e3,
            enable_vbw: false,
            vbw_hz: 300e3,
            trace_length: 801,
            window: SpectrumWindow::default(),
            vertical_unit: VerticalUnit::default(),
            actual_start_freq_hz: 0.0,
            actual_stop_freq_hz: 0.0,
            actual_freq_step_hz: 0.0,
            actual_rbw_hz: 0.0,
            actual_vbw_hz: 0.0,
            actual_num_iq_samples: 0,
        }
    }
}

/// Caller overrides merged over the device defaults.
///
/// Fields left as `None` keep whatever `SPECTRUM_SetDefault` produced.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectrumOverrides {
    /// Span in Hz
    pub span_hz: Option<f64>,
    /// Resolution bandwidth in Hz
    pub rbw_hz: Option<f64>,
    /// Video bandwidth in Hz; setting it also enables the VBW filter
    pub vbw_hz: Option<f64>,
    /// Points per trace
    pub trace_length: Option<usize>,
    /// FFT window
    pub window: Option<SpectrumWindow>,
    /// Amplitude unit
    pub vertical_unit: Option<VerticalUnit>,
}

impl SpectrumOverrides {
    /// Merge these overrides over `defaults`.
    pub fn apply_to(&self, defaults: SpectrumSettings) -> SpectrumSettings {
        let mut merged = defaults;
        if let Some(span) = self.span_hz {
            merged.span_hz = span;
        }
        if let Some(rbw) = self.rbw_hz {
            merged.rbw_hz = rbw;
        }
        if let Some(vbw) = self.vbw_hz {
            merged.enable_vbw = true;
            merged.vbw_hz = vbw;
        }
        if let Some(length) = self.trace_length {
            merged.trace_length = length;
        }
        if let Some(window) = self.window {
            merged.window = window;
        }
        if let Some(unit) = self.vertical_unit {
            merged.vertical_unit = unit;
        }
        merged
    }
}

/// Immutable snapshot of settings read back from the device after a commit.
///
/// Frequency-axis computation and the power normalisation of the occupied
/// bandwidth measurement use these values only, never the request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedSpectrum {
    settings: SpectrumSettings,
}

impl ResolvedSpectrum {
    /// Validate settings read back from the device.
    ///
    /// # Errors
    ///
    /// Returns [`RsaError::ConfigurationFailure`] when the trace length is
    /// zero, the step or RBW is not a positive finite number, or the start
    /// frequency is not below the stop frequency.
    pub fn from_settings(settings: SpectrumSettings) -> Result<Self> {
        if settings.trace_length == 0 {
            return Err(RsaError::configuration("resolved trace length is zero"));
        }
        if !(settings.actual_freq_step_hz.is_finite() && settings.actual_freq_step_hz > 0.0) {
            return Err(RsaError::configuration(format!(
                "invalid resolved frequency step: {}",
                settings.actual_freq_step_hz
            )));
        }
        if !(settings.actual_rbw_hz.is_finite() && settings.actual_rbw_hz > 0.0) {
            return Err(RsaError::configuration(format!(
                "invalid resolved RBW: {}",
                settings.actual_rbw_hz
            )));
        }
        if settings.trace_length > 1 && settings.actual_start_freq_hz >= settings.actual_stop_freq_hz
        {
            return Err(RsaError::configuration(format!(
                "resolved start frequency {} Hz is not below stop frequency {} Hz",
                settings.actual_start_freq_hz, settings.actual_stop_freq_hz
            )));
        }

        let resolved = Self { settings };
        let mismatch = resolved.axis_mismatch_hz();
        if mismatch > settings.actual_freq_step_hz {
            warn!(
                mismatch_hz = mismatch,
                step_hz = settings.actual_freq_step_hz,
                "Resolved stop frequency disagrees with start + step * (length - 1)"
            );
        }
        Ok(resolved)
    }

    /// The full settings record.
    pub fn settings(&self) -> &SpectrumSettings {
        &self.settings
    }

    /// Points per trace; the size of every trace buffer and axis.
    pub fn trace_length(&self) -> usize {
        self.settings.trace_length
    }

    /// Span in Hz as read back from the device.
    pub fn span_hz(&self) -> f64 {
        self.settings.span_hz
    }

    /// Resolution bandwidth the device actually uses.
    pub fn actual_rbw_hz(&self) -> f64 {
        self.settings.actual_rbw_hz
    }

    /// Frequency of the first trace point.
    pub fn start_freq_hz(&self) -> f64 {
        self.settings.actual_start_freq_hz
    }

    /// Frequency of the last trace point.
    pub fn stop_freq_hz(&self) -> f64 {
        self.settings.actual_stop_freq_hz
    }

    /// Spacing between trace points.
    pub fn freq_step_hz(&self) -> f64 {
        self.settings.actual_freq_step_hz
    }

    /// Frequency of trace point `index`.
    pub fn frequency_at(&self, index: usize) -> f64 {
        self.settings.actual_start_freq_hz + index as f64 * self.settings.actual_freq_step_hz
    }

    /// Frequency axis for a full-length trace.
    pub fn frequency_axis(&self) -> Vec<f64> {
        (0..self.trace_length()).map(|i| self.frequency_at(i)).collect()
    }

    /// Distance between the reported stop frequency and the one implied by
    /// start, step and trace length.
    pub fn axis_mismatch_hz(&self) -> f64 {
        let implied = self.frequency_at(self.trace_length().saturating_sub(1));
        (implied - self.settings.actual_stop_freq_hz).abs()
    }
}

bitflags! {
    /// Acquisition status flags attached to each spectrum trace.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TraceStatus: u16 {
        /// ADC input overrange during the acquisition
        const ADC_OVERRANGE = 0x0001;
        /// Reference oscillator lost lock
        const REF_FREQ_UNLOCK = 0x0002;
        /// ADC samples were dropped
        const ADC_DATA_LOST = 0x0020;
    }
}

/// Timestamp and status for one trace snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceInfo {
    /// Device timestamp in device ticks
    pub timestamp: i64,
    /// Decoded status flags
    pub status: TraceStatus,
    /// Raw status word, including bits without a name
    pub raw_status: u16,
}

impl TraceInfo {
    /// Build from the raw driver record.
    pub fn from_raw(timestamp: i64, raw_status: u16) -> Self {
        Self {
            timestamp,
            status: TraceStatus::from_bits_truncate(raw_status),
            raw_status,
        }
    }
}
