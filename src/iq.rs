//! Block IQ capture.
//!
//! Captures one record of baseband IQ samples: configure bandwidth, record
//! length and trigger, run the device, poll for the record, read it out
//! deinterleaved and stop again.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::acquisition::{poll_until_ready, PollOutcome, PollPolicy};
use crate::driver::AnalyzerDriver;
use crate::error::{DriverResultExt, Result, RsaError};
use crate::session::{DeviceSession, SessionState};

/// Trigger source for block IQ acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Acquire immediately
    #[default]
    FreeRun,
    /// Wait for the IF power trigger
    Triggered,
}

fn default_bandwidth_hz() -> f64 {
    40e6
}

fn default_record_length() -> usize {
    1024
}

fn default_trigger_level_dbm() -> f64 {
    -10.0
}

/// Parameters of a block IQ acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IqBlockParameters {
    /// IQ bandwidth in Hz
    #[serde(default = "default_bandwidth_hz")]
    pub bandwidth_hz: f64,
    /// Samples per record
    #[serde(default = "default_record_length")]
    pub record_length: usize,
    /// Trigger source
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    /// IF power trigger level in dBm
    #[serde(default = "default_trigger_level_dbm")]
    pub trigger_level_dbm: f64,
}

impl Default for IqBlockParameters {
    fn default() -> Self {
        Self {
            bandwidth_hz: default_bandwidth_hz(),
            record_length: default_record_length(),
            trigger_mode: TriggerMode::default(),
            trigger_level_dbm: default_trigger_level_dbm(),
        }
    }
}

impl IqBlockParameters {
    /// Reject parameters the driver cannot accept.
    pub fn validate(&self) -> Result<()> {
        if !(self.bandwidth_hz.is_finite() && self.bandwidth_hz > 0.0) {
            return Err(RsaError::configuration(format!(
                "IQ bandwidth must be positive, got {}",
                self.bandwidth_hz
            )));
        }
        if self.record_length == 0 || i32::try_from(self.record_length).is_err() {
            return Err(RsaError::configuration(format!(
                "invalid IQ record length {}",
                self.record_length
            )));
        }
        if !self.trigger_level_dbm.is_finite() {
            return Err(RsaError::configuration("IQ trigger level is not finite"));
        }
        Ok(())
    }
}

/// Acquisition header of a block IQ record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IqAcqInfo {
    /// Device timestamp of the first sample
    pub sample0_timestamp: u64,
    /// Index of the trigger sample
    pub trigger_sample_index: u64,
    /// Device timestamp of the trigger
    pub trigger_timestamp: u64,
    /// Acquisition status bits
    pub acq_status: u32,
}

/// One captured IQ record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IqRecord {
    /// In-phase samples
    pub i: Vec<f32>,
    /// Quadrature samples
    pub q: Vec<f32>,
    /// Sample rate in samples per second
    pub sample_rate: f64,
    /// Header, when the driver provided one
    pub acq_info: Option<IqAcqInfo>,
    /// Samples requested
    pub requested_length: usize,
}

impl IqRecord {
    /// Number of samples actually returned.
    pub fn len(&self) -> usize {
        self.i.len()
    }

    /// Whether the record is empty.
    pub fn is_empty(&self) -> bool {
        self.i.is_empty()
    }

    /// Time of each sample relative to the first, in seconds.
    pub fn time_axis(&self) -> Vec<f64> {
        (0..self.len()).map(|n| n as f64 / self.sample_rate).collect()
    }

    /// Mean power over the record in dBm, assuming a 50 Ω system and
    /// samples in volts.
    pub fn mean_power_dbm(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let sum: f64 = self
            .i
            .iter()
            .zip(&self.q)
            .map(|(&i, &q)| f64::from(i).powi(2) + f64::from(q).powi(2))
            .sum();
        let watts = sum / self.len() as f64 / 50.0;
        Some(10.0 * (watts * 1e3).log10())
    }
}

/// Capture one IQ record. Leaves the device stopped.
pub fn acquire_iq_block<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    params: &IqBlockParameters,
    policy: PollPolicy,
) -> Result<IqRecord> {
    params.validate()?;
    session.require(
        "capture IQ",
        &[SessionState::Connected, SessionState::Configured],
    )?;
    session
        .driver_mut()
        .set_iq_acquisition_parameters(params)
        .map_err(|status| {
            RsaError::configuration(format!("IQ acquisition parameters rejected: {status}"))
        })?;

    session.run()?;
    let captured = capture(session, params, policy);
    let stopped = session.stop();
    let record = captured?;
    stopped?;

    info!(
        samples = record.len(),
        requested = record.requested_length,
        sample_rate = record.sample_rate,
        "IQ block captured"
    );
    Ok(record)
}

fn capture<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    params: &IqBlockParameters,
    policy: PollPolicy,
) -> Result<IqRecord> {
    let driver = session.driver_mut();
    let sample_rate = driver.iq_sample_rate().call("IQBLK_GetIQSampleRate")?;
    driver.acquire_iq().call("IQBLK_AcquireIQData")?;

    match poll_until_ready(&policy, "IQ record", None, |timeout_ms| {
        driver
            .wait_for_iq_ready(timeout_ms)
            .call("IQBLK_WaitForIQDataReady")
    })? {
        PollOutcome::Ready { .. } => {}
        PollOutcome::DeadlineReached { attempts } => {
            return Err(RsaError::AcquisitionTimeout {
                operation: "IQ record",
                attempts,
                timeout_ms: policy.timeout_ms(),
            })
        }
    }

    let acq_info = match driver.iq_acq_info() {
        Ok(info) => Some(info),
        Err(status) => {
            warn!(%status, "IQBLK_GetIQAcqInfo failed; continuing without header");
            None
        }
    };

    let mut i = vec![0.0f32; params.record_length];
    let mut q = vec![0.0f32; params.record_length];
    let actual = driver
        .get_iq_data_deinterleaved(0, &mut i, &mut q)
        .call("IQBLK_GetIQDataDeinterleaved")?;
    if actual > params.record_length {
        return Err(RsaError::configuration(format!(
            "driver returned {actual} IQ samples for a {}-sample request",
            params.record_length
        )));
    }
    i.truncate(actual);
    q.truncate(actual);

    Ok(IqRecord {
        i,
        q,
        sample_rate,
        acq_info,
        requested_length: params.record_length,
    })
}
