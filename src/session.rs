//! Device session: discovery, connection and the lifecycle state machine.
//!
//! A [`DeviceSession`] owns the driver and is the only place connection
//! state changes. Operations check the current [`SessionState`] before any
//! driver call, so an out-of-order request (streaming before the device
//! runs, reading a trace from a stopped device) fails with
//! [`RsaError::InvalidState`] and never reaches the driver.
//!
//! ```text
//! Disconnected ─connect─▶ Connected ─configure─▶ Configured
//!                             │  ▲                  │  ▲
//!                            run stop              run stop
//!                             ▼  │                  ▼  │
//!                             Running ◀─────────────┘
//!                             │  ▲
//!                     stream_start stream_stop
//!                             ▼  │
//!                           Streaming
//! ```
//!
//! `disconnect` is accepted in every state and always ends Disconnected.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::driver::{AnalyzerDriver, DeviceRecord};
use crate::error::{DriverResultExt, Result, RsaError};
use crate::spectrum::ResolvedSpectrum;

/// Lifecycle state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No instrument connection
    Disconnected,
    /// Connected, settings not yet resolved
    Connected,
    /// Connected with a resolved settings snapshot
    Configured,
    /// Acquisition engine running
    Running,
    /// Running and streaming IQ to the writer
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Exclusive owner of an analyzer connection.
pub struct DeviceSession<D: AnalyzerDriver> {
    driver: D,
    state: SessionState,
    device: Option<DeviceRecord>,
    resolved: Option<ResolvedSpectrum>,
}

impl<D: AnalyzerDriver> DeviceSession<D> {
    /// Wrap a driver. The session starts Disconnected.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: SessionState::Disconnected,
            device: None,
            resolved: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Instrument this session is connected to, when known.
    pub fn device(&self) -> Option<&DeviceRecord> {
        self.device.as_ref()
    }

    /// Settings snapshot of the last successful configuration.
    pub fn resolved(&self) -> Option<&ResolvedSpectrum> {
        self.resolved.as_ref()
    }

    /// Read-only access to the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub(crate) fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Fail with [`RsaError::InvalidState`] unless the session is in one of
    /// `allowed`.
    pub(crate) fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RsaError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Session state change");
            self.state = next;
        }
    }

    pub(crate) fn set_resolved(&mut self, resolved: ResolvedSpectrum) {
        self.resolved = Some(resolved);
        self.transition(SessionState::Configured);
    }

    /// Drop the resolved snapshot before the device settings change.
    pub(crate) fn clear_resolved(&mut self) {
        self.resolved = None;
        if self.state == SessionState::Configured {
            self.transition(SessionState::Connected);
        }
    }

    /// Driver library version. Failures are logged and yield `None`.
    pub fn api_version(&mut self) -> Option<String> {
        match self.driver.api_version() {
            Ok(version) => Some(version),
            Err(status) => {
                warn!(%status, "DEVICE_GetAPIVersion failed");
                None
            }
        }
    }

    /// Enumerate attached instruments.
    ///
    /// # Errors
    ///
    /// [`RsaError::NoDeviceFound`] when the list is empty.
    pub fn discover(&mut self) -> Result<Vec<DeviceRecord>> {
        self.require("search for devices", &[SessionState::Disconnected])?;
        let devices = self.driver.search().call("DEVICE_Search")?;
        if devices.is_empty() {
            return Err(RsaError::NoDeviceFound);
        }
        for device in &devices {
            debug!(
                id = device.id,
                serial = %device.serial,
                nomenclature = %device.nomenclature,
                "Found instrument"
            );
        }
        Ok(devices)
    }

    /// Pick one device from a discovery result.
    ///
    /// A single device is selected without an index. With several devices
    /// the caller must supply an index in `0..count`; a missing or
    /// out-of-range index yields [`RsaError::AmbiguousSelection`].
    pub fn select(devices: &[DeviceRecord], index: Option<usize>) -> Result<&DeviceRecord> {
        match (devices, index) {
            ([], _) => Err(RsaError::NoDeviceFound),
            ([only], None) => Ok(only),
            (_, Some(i)) if i < devices.len() => Ok(&devices[i]),
            _ => Err(RsaError::AmbiguousSelection {
                count: devices.len(),
            }),
        }
    }

    /// Connect to a device by driver id.
    pub fn connect(&mut self, device_id: i32) -> Result<()> {
        self.require("connect", &[SessionState::Disconnected])?;
        self.driver
            .connect(device_id)
            .map_err(|status| RsaError::ConnectFailure { device_id, status })?;
        self.transition(SessionState::Connected);
        info!(device_id, "Connected to instrument");
        Ok(())
    }

    /// Discover, select and connect in one step.
    pub fn connect_selected(&mut self, index: Option<usize>) -> Result<DeviceRecord> {
        let devices = self.discover()?;
        let device = Self::select(&devices, index)?.clone();
        self.connect(device.id)?;
        info!(
            serial = %device.serial,
            nomenclature = %device.nomenclature,
            "Instrument selected"
        );
        self.device = Some(device.clone());
        Ok(device)
    }

    /// Start the acquisition engine.
    pub fn run(&mut self) -> Result<()> {
        self.require("run", &[SessionState::Connected, SessionState::Configured])?;
        self.driver.run().call("DEVICE_Run")?;
        self.transition(SessionState::Running);
        Ok(())
    }

    /// Stop the acquisition engine.
    ///
    /// Returns to Configured when settings were resolved, else Connected.
    pub fn stop(&mut self) -> Result<()> {
        self.require("stop", &[SessionState::Running])?;
        self.driver.stop().call("DEVICE_Stop")?;
        self.transition(self.idle_state());
        Ok(())
    }

    /// Start IQ streaming. The device must be running.
    pub fn stream_start(&mut self) -> Result<()> {
        self.require("start streaming", &[SessionState::Running])?;
        self.driver.stream_start().call("IQSTREAM_Start")?;
        self.transition(SessionState::Streaming);
        Ok(())
    }

    /// Stop IQ streaming. The device keeps running.
    pub fn stream_stop(&mut self) -> Result<()> {
        self.require("stop streaming", &[SessionState::Streaming])?;
        self.driver.stream_stop().call("IQSTREAM_Stop")?;
        self.transition(SessionState::Running);
        Ok(())
    }

    /// Stop the acquisition engine from Running or Streaming, leaving the
    /// stream to be torn down with it.
    pub(crate) fn halt(&mut self) -> Result<()> {
        self.require("stop", &[SessionState::Running, SessionState::Streaming])?;
        self.driver.stop().call("DEVICE_Stop")?;
        self.transition(self.idle_state());
        Ok(())
    }

    fn idle_state(&self) -> SessionState {
        if self.resolved.is_some() {
            SessionState::Configured
        } else {
            SessionState::Connected
        }
    }

    /// Tear the connection down from any state.
    ///
    /// Streaming and the acquisition engine are stopped first. Driver
    /// failures along the way are logged; the session always ends
    /// Disconnected.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if self.state == SessionState::Streaming {
            if let Err(status) = self.driver.stream_stop() {
                warn!(%status, "IQSTREAM_Stop failed during disconnect");
            }
        }
        if matches!(self.state, SessionState::Streaming | SessionState::Running) {
            if let Err(status) = self.driver.stop() {
                warn!(%status, "DEVICE_Stop failed during disconnect");
            }
        }
        if let Err(status) = self.driver.disconnect() {
            warn!(%status, "DEVICE_Disconnect failed");
        }
        self.resolved = None;
        self.device = None;
        self.transition(SessionState::Disconnected);
        info!("Disconnected from instrument");
    }
}

impl<D: AnalyzerDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if self.state != SessionState::Disconnected {
            debug!(state = %self.state, "Session dropped while connected");
            self.disconnect();
        }
    }
}

impl<D: AnalyzerDriver + fmt::Debug> fmt::Debug for DeviceSession<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.state)
            .field("device", &self.device)
            .field("resolved", &self.resolved)
            .field("driver", &self.driver)
            .finish()
    }
}
