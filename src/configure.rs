//! Applies requested spectrum parameters and resolves the device's values.
//!
//! The device rounds and clamps what it is asked for, so the configurator
//! always commits and then reads the settings back. The read-back snapshot
//! becomes the session's [`ResolvedSpectrum`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::driver::{AnalyzerDriver, DriverStatus};
use crate::error::{Result, RsaError};
use crate::session::{DeviceSession, SessionState};
use crate::spectrum::{ResolvedSpectrum, SpectrumOverrides};

/// Centre frequency, reference level and spectrum overrides for one
/// configuration pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfigurator {
    /// Issue a device preset first
    pub preset: bool,
    /// Centre frequency in Hz
    pub center_frequency_hz: f64,
    /// Reference level in dBm
    pub reference_level_dbm: f64,
    /// Values merged over the device's default spectrum settings
    pub overrides: SpectrumOverrides,
}

impl Default for AcquisitionConfigurator {
    fn default() -> Self {
        Self {
            preset: true,
            center_frequency_hz: 1e9,
            reference_level_dbm: 0.0,
            overrides: SpectrumOverrides::default(),
        }
    }
}

fn rejected(call: &str, status: DriverStatus) -> RsaError {
    RsaError::configuration(format!("{call} failed: {status}"))
}

impl AcquisitionConfigurator {
    /// Configurator for a centre frequency and reference level.
    pub fn new(center_frequency_hz: f64, reference_level_dbm: f64) -> Self {
        Self {
            center_frequency_hz,
            reference_level_dbm,
            ..Default::default()
        }
    }

    /// Replace the spectrum overrides.
    pub fn with_overrides(mut self, overrides: SpectrumOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Enable or skip the initial preset.
    pub fn with_preset(mut self, preset: bool) -> Self {
        self.preset = preset;
        self
    }

    /// Configure the device and resolve its spectrum settings.
    ///
    /// The session must be Connected or Configured and ends Configured. Any
    /// earlier snapshot is dropped first, so a failure leaves it Connected.
    ///
    /// # Errors
    ///
    /// [`RsaError::ConfigurationFailure`] when any setting is rejected or
    /// the read-back snapshot is unusable.
    pub fn apply_settings<D: AnalyzerDriver>(
        &self,
        session: &mut DeviceSession<D>,
    ) -> Result<ResolvedSpectrum> {
        session.require(
            "apply settings",
            &[SessionState::Connected, SessionState::Configured],
        )?;
        if !(self.center_frequency_hz.is_finite() && self.center_frequency_hz > 0.0) {
            return Err(RsaError::configuration(format!(
                "centre frequency must be positive, got {}",
                self.center_frequency_hz
            )));
        }

        session.clear_resolved();
        let driver = session.driver_mut();
        if self.preset {
            driver.preset().map_err(|s| rejected("CONFIG_Preset", s))?;
        }
        driver
            .set_center_frequency(self.center_frequency_hz)
            .map_err(|s| rejected("CONFIG_SetCenterFreq", s))?;
        driver
            .set_reference_level(self.reference_level_dbm)
            .map_err(|s| rejected("CONFIG_SetReferenceLevel", s))?;
        driver
            .spectrum_set_enable(true)
            .map_err(|s| rejected("SPECTRUM_SetEnable", s))?;
        driver
            .spectrum_set_default()
            .map_err(|s| rejected("SPECTRUM_SetDefault", s))?;

        let defaults = driver
            .spectrum_settings()
            .map_err(|s| rejected("SPECTRUM_GetSettings", s))?;
        let requested = self.overrides.apply_to(defaults);
        debug!(
            span_hz = requested.span_hz,
            rbw_hz = requested.rbw_hz,
            trace_length = requested.trace_length,
            "Committing spectrum settings"
        );
        driver
            .set_spectrum_settings(&requested)
            .map_err(|s| rejected("SPECTRUM_SetSettings", s))?;
        let actual = driver
            .spectrum_settings()
            .map_err(|s| rejected("SPECTRUM_GetSettings", s))?;

        let resolved = ResolvedSpectrum::from_settings(actual)?;
        info!(
            center_hz = self.center_frequency_hz,
            ref_level_dbm = self.reference_level_dbm,
            start_hz = resolved.start_freq_hz(),
            stop_hz = resolved.stop_freq_hz(),
            step_hz = resolved.freq_step_hz(),
            rbw_hz = resolved.actual_rbw_hz(),
            trace_length = resolved.trace_length(),
            "Spectrum settings resolved"
        );
        session.set_resolved(resolved);
        Ok(resolved)
    }
}
