//! Layered application configuration.
//!
//! Values are resolved in order of increasing precedence:
//!
//! 1. Built-in defaults ([`AppConfig::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed `RSA_SPECTRUM_`, with `__` between
//!    nesting levels
//!
//! # Example
//!
//! ```toml
//! [instrument]
//! center_frequency_hz = 2.4e9
//! reference_level_dbm = -10.0
//!
//! [spectrum]
//! span_hz = 20e6
//! rbw_hz = 100e3
//!
//! [acquisition]
//! wait_timeout = "100ms"
//! continuous_budget = "10s"
//! ```
//!
//! ```bash
//! RSA_SPECTRUM_INSTRUMENT__CENTER_FREQUENCY_HZ=915000000.0 rsa-spectrum spectrum
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acquisition::PollPolicy;
use crate::configure::AcquisitionConfigurator;
use crate::iq::IqBlockParameters;
use crate::logging::{parse_log_level, OutputFormat};
use crate::measurement::DEFAULT_OBW_FRACTION;
use crate::spectrum::{SpectrumOverrides, SpectrumWindow, VerticalUnit};
use crate::streaming::StreamConfig;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "RSA_SPECTRUM_";

/// Configuration file read when no path is given, if it exists.
pub const DEFAULT_CONFIG_FILE: &str = "rsa-spectrum.toml";

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A provider failed or a value had the wrong type
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    /// An explicitly requested file does not exist
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// Values loaded but are unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration of the command-line tool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Subscriber settings
    pub logging: LoggingConfig,
    /// Device selection and front-end settings
    pub instrument: InstrumentConfig,
    /// Requested spectrum settings
    pub spectrum: SpectrumConfig,
    /// Ready polling and continuous-mode timing
    pub acquisition: AcquisitionConfig,
    /// Measurement parameters
    pub measurement: MeasurementConfig,
    /// IQ streaming run
    pub streaming: StreamConfig,
    /// Block IQ capture
    pub iq: IqBlockParameters,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name (trace, debug, info, warn, error)
    pub level: String,
    /// Line format
    pub format: OutputFormat,
    /// Emit span open/close events
    pub span_events: bool,
    /// Include source file and line
    pub file_and_line: bool,
    /// Colour output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Pretty,
            span_events: false,
            file_and_line: false,
            ansi: true,
        }
    }
}

/// `[instrument]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Position in the discovery list; required when several devices are attached
    pub device_index: Option<usize>,
    /// Preset the device before configuring it
    pub preset: bool,
    /// Centre frequency in Hz
    pub center_frequency_hz: f64,
    /// Reference level in dBm
    pub reference_level_dbm: f64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            preset: true,
            center_frequency_hz: 1e9,
            reference_level_dbm: 0.0,
        }
    }
}

/// `[spectrum]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Span in Hz
    pub span_hz: f64,
    /// Resolution bandwidth in Hz
    pub rbw_hz: f64,
    /// Video bandwidth in Hz; the VBW filter stays off when unset
    pub vbw_hz: Option<f64>,
    /// Points per trace
    pub trace_length: usize,
    /// FFT window
    pub window: SpectrumWindow,
    /// Amplitude unit
    pub vertical_unit: VerticalUnit,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            span_hz: 40e6,
            rbw_hz: 300e3,
            vbw_hz: None,
            trace_length: 801,
            window: SpectrumWindow::default(),
            vertical_unit: VerticalUnit::default(),
        }
    }
}

impl SpectrumConfig {
    /// Overrides merged over the device defaults during configuration.
    pub fn overrides(&self) -> SpectrumOverrides {
        SpectrumOverrides {
            span_hz: Some(self.span_hz),
            rbw_hz: Some(self.rbw_hz),
            vbw_hz: self.vbw_hz,
            trace_length: Some(self.trace_length),
            window: Some(self.window),
            vertical_unit: Some(self.vertical_unit),
        }
    }
}

/// `[acquisition]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Timeout of each data-ready wait call
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
    /// Wait calls allowed per trace
    pub max_wait_attempts: u32,
    /// Wall-clock budget of continuous mode
    #[serde(with = "humantime_serde")]
    pub continuous_budget: Duration,
    /// Pause between continuous-mode iterations
    #[serde(with = "humantime_serde")]
    pub pause: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            wait_timeout: policy.wait_timeout,
            max_wait_attempts: policy.max_attempts,
            continuous_budget: Duration::from_secs(10),
            pause: Duration::ZERO,
        }
    }
}

impl AcquisitionConfig {
    /// Poll bounds for data-ready waits.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.wait_timeout, self.max_wait_attempts)
    }
}

/// `[measurement]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Power fraction for occupied bandwidth
    pub obw_fraction: f64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            obw_fraction: DEFAULT_OBW_FRACTION,
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` (or [`DEFAULT_CONFIG_FILE`] if present),
    /// then environment overrides, and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let figment = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.display().to_string()));
                }
                Self::figment(Some(path))
            }
            None => Self::figment(Some(Path::new(DEFAULT_CONFIG_FILE))),
        };
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Provider stack without extraction; a missing file contributes nothing.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values no session could use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_log_level(&self.logging.level).map_err(ConfigError::Invalid)?;

        positive("instrument.center_frequency_hz", self.instrument.center_frequency_hz)?;
        if !self.instrument.reference_level_dbm.is_finite() {
            return Err(ConfigError::Invalid(
                "instrument.reference_level_dbm must be finite".to_string(),
            ));
        }

        positive("spectrum.span_hz", self.spectrum.span_hz)?;
        positive("spectrum.rbw_hz", self.spectrum.rbw_hz)?;
        if let Some(vbw) = self.spectrum.vbw_hz {
            positive("spectrum.vbw_hz", vbw)?;
        }
        if self.spectrum.trace_length == 0 {
            return Err(ConfigError::Invalid(
                "spectrum.trace_length must be at least 1".to_string(),
            ));
        }

        if self.acquisition.max_wait_attempts == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.max_wait_attempts must be at least 1".to_string(),
            ));
        }
        if self.acquisition.continuous_budget.is_zero() {
            return Err(ConfigError::Invalid(
                "acquisition.continuous_budget must be non-zero".to_string(),
            ));
        }

        let fraction = self.measurement.obw_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "measurement.obw_fraction must be in (0, 1], got {fraction}"
            )));
        }

        self.streaming
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.iq
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Configurator built from the `[instrument]` and `[spectrum]` sections.
    pub fn configurator(&self) -> AcquisitionConfigurator {
        AcquisitionConfigurator::new(
            self.instrument.center_frequency_hz,
            self.instrument.reference_level_dbm,
        )
        .with_preset(self.instrument.preset)
        .with_overrides(self.spectrum.overrides())
    }
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")))
    }
}
