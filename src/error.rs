//! Error types for acquisition sessions and measurements.
//!
//! This module defines [`RsaError`], the error type returned by every
//! session, acquisition, measurement and streaming operation. Using the
//! `thiserror` crate it mirrors the failure taxonomy of the instrument
//! workflow:
//!
//! - **`NoDeviceFound`** / **`AmbiguousSelection`**: discovery outcomes. An
//!   ambiguous selection is recoverable once the caller supplies an index.
//! - **`ConnectFailure`**: fatal, the session cannot proceed.
//! - **`ConfigurationFailure`**: settings were rejected or could not be read
//!   back in a usable form.
//! - **`AcquisitionTimeout`**: the ready-poll budget was exhausted. Callers
//!   may retry before escalating.
//! - **`MeasurementError`**: the trace handed to the measurement engine is
//!   degenerate (empty, zero power, cursors crossed).
//! - **`StreamingDataLoss`**: decoded from the streaming status; reported
//!   but not fatal.
//! - **`InvalidState`**: an operation was attempted from a lifecycle state
//!   that does not allow it.
//! - **`Driver`**: any other non-zero driver status code.

use std::fmt;

use thiserror::Error;

use crate::session::SessionState;
use crate::streaming::StreamCondition;

/// Result type alias for acquisition and measurement operations.
pub type Result<T> = std::result::Result<T, RsaError>;

/// Non-zero status code returned by a driver call.
///
/// The vendor API reports every failure as an integer; the hardware backend
/// attaches the library's own description when it can obtain one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverStatus {
    /// Raw return code (never zero)
    pub code: i32,
    /// Vendor description of the code, when available
    pub message: Option<String>,
}

impl DriverStatus {
    /// Create a status from a bare return code.
    pub fn new(code: i32) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Attach a vendor description.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "status {} ({})", self.code, message),
            None => write!(f, "status {}", self.code),
        }
    }
}

/// Result type of a single driver call.
pub type DriverResult<T> = std::result::Result<T, DriverStatus>;

/// Errors that can occur while driving the analyzer.
#[derive(Error, Debug)]
pub enum RsaError {
    /// Discovery returned no instruments
    #[error("No instruments found")]
    NoDeviceFound,

    /// More than one instrument is attached and no valid index was supplied
    #[error("{count} instruments found; select one with an index between 0 and {}", .count - 1)]
    AmbiguousSelection { count: usize },

    /// Connecting to the selected instrument failed
    #[error("Failed to connect to device {device_id}: {status}")]
    ConnectFailure { device_id: i32, status: DriverStatus },

    /// Settings were rejected by the device or read back unusable
    #[error("Configuration failure: {message}")]
    ConfigurationFailure { message: String },

    /// The data-ready poll budget was exhausted
    #[error("{operation} not ready after {attempts} polls of {timeout_ms} ms")]
    AcquisitionTimeout {
        operation: &'static str,
        attempts: u32,
        timeout_ms: u32,
    },

    /// Degenerate input to a measurement
    #[error("Measurement error: {message}")]
    MeasurementError { message: String },

    /// The streaming writer reported lost samples
    #[error("Streaming data loss: {}", format_conditions(.conditions))]
    StreamingDataLoss { conditions: Vec<StreamCondition> },

    /// Operation not permitted in the current lifecycle state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Any other non-zero driver status
    #[error("Driver call {call} failed: {status}")]
    Driver {
        call: &'static str,
        status: DriverStatus,
    },
}

fn format_conditions(conditions: &[StreamCondition]) -> String {
    conditions
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RsaError {
    /// Shorthand for a configuration failure.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationFailure {
            message: message.into(),
        }
    }

    /// Shorthand for a measurement error.
    pub fn measurement(message: impl Into<String>) -> Self {
        Self::MeasurementError {
            message: message.into(),
        }
    }

    /// Whether the caller can recover without tearing down the session.
    ///
    /// Ambiguous selections need an index, timeouts may be retried and data
    /// loss is reported but acquisition continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousSelection { .. }
                | Self::AcquisitionTimeout { .. }
                | Self::StreamingDataLoss { .. }
                | Self::MeasurementError { .. }
        )
    }

    /// Whether the error must terminate the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectFailure { .. } | Self::NoDeviceFound)
    }
}

/// Extension for turning a [`DriverResult`] into an [`RsaError`] tagged
/// with the name of the failed call.
pub(crate) trait DriverResultExt<T> {
    fn call(self, name: &'static str) -> Result<T>;
}

impl<T> DriverResultExt<T> for DriverResult<T> {
    fn call(self, name: &'static str) -> Result<T> {
        self.map_err(|status| RsaError::Driver { call: name, status })
    }
}
