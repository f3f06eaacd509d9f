//! IQ streaming to disk.
//!
//! A streaming run configures the streaming engine, starts the device and
//! the writer, polls the writer until the configured file duration has been
//! written and finally reads the file summary once. The summary's
//! acquisition status is decoded into a set of [`StreamCondition`]s;
//! overflow conditions mean samples were lost.
//!
//! ```text
//! configure ─▶ Run ─▶ IQSTREAM_Start ─▶ poll write status ─▶ GetDiskFileInfo
//!                                         (every duration/10)   (exactly once)
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::driver::{AnalyzerDriver, StreamAcqParameters, StreamFileInfo, StreamWriteStatus};
use crate::error::{DriverResultExt, Result, RsaError};
use crate::session::{DeviceSession, SessionState};

/// Where streamed samples go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamDestination {
    /// Client memory
    Client,
    /// Single `.tiq` file
    Tiq,
    /// Single `.siq` file with embedded header
    Siq,
    /// Split `.siqd` data and `.siqh` header files
    #[default]
    SiqSplit,
}

impl StreamDestination {
    /// Whether the destination writes files.
    pub fn is_file(self) -> bool {
        !matches!(self, Self::Client)
    }
}

/// Sample encoding of streamed IQ data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    /// 32-bit float
    Float32,
    /// 32-bit integer
    Int32,
    /// 16-bit integer
    #[default]
    Int16,
}

/// Suffix appended to the streaming filename base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilenameSuffix {
    /// Base name only; each run overwrites the previous file
    None,
    /// Date and time of the run
    Timestamp,
    /// Incrementing index, starting at 0
    #[default]
    AutoIncrement,
}

bitflags! {
    /// Sticky bits of the streaming acquisition status word.
    ///
    /// Bit 17 (sticky transfer discontinuity) has no named condition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IqStreamStatus: u32 {
        /// Input overrange during the run
        const INPUT_OVERRANGE = 1 << 16;
        /// Input buffer exceeded 75% at some point
        const INPUT_BUFFER_NEAR_FULL = 1 << 18;
        /// Input buffer overflowed and samples were dropped
        const INPUT_BUFFER_OVERFLOW = 1 << 19;
        /// Output buffer exceeded 75% at some point
        const OUTPUT_BUFFER_NEAR_FULL = 1 << 20;
        /// Output buffer overflowed and samples were dropped
        const OUTPUT_BUFFER_OVERFLOW = 1 << 21;
    }
}

/// Condition reported by a streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCondition {
    /// No condition was flagged
    NoError,
    /// Input overrange
    InputOverrange,
    /// Input buffer above 75%
    InputBufferNearFull,
    /// Input buffer overflow; IQ processing could not keep up
    InputBufferOverflowDataLoss,
    /// Output buffer above 75%
    OutputBufferNearFull,
    /// Output buffer overflow; file writing could not keep up
    OutputBufferOverflowDataLoss,
}

impl StreamCondition {
    const NAMED: [(IqStreamStatus, StreamCondition); 5] = [
        (IqStreamStatus::INPUT_OVERRANGE, Self::InputOverrange),
        (IqStreamStatus::INPUT_BUFFER_NEAR_FULL, Self::InputBufferNearFull),
        (IqStreamStatus::INPUT_BUFFER_OVERFLOW, Self::InputBufferOverflowDataLoss),
        (IqStreamStatus::OUTPUT_BUFFER_NEAR_FULL, Self::OutputBufferNearFull),
        (IqStreamStatus::OUTPUT_BUFFER_OVERFLOW, Self::OutputBufferOverflowDataLoss),
    ];

    /// Whether samples were lost.
    pub fn is_data_loss(self) -> bool {
        matches!(
            self,
            Self::InputBufferOverflowDataLoss | Self::OutputBufferOverflowDataLoss
        )
    }
}

impl fmt::Display for StreamCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoError => "no error",
            Self::InputOverrange => "input overrange",
            Self::InputBufferNearFull => "input buffer > 75% full",
            Self::InputBufferOverflowDataLoss => {
                "input buffer overflow, IQ processing too slow, data loss has occurred"
            }
            Self::OutputBufferNearFull => "output buffer > 75% full",
            Self::OutputBufferOverflowDataLoss => {
                "output buffer overflow, file writing too slow, data loss has occurred"
            }
        };
        f.write_str(text)
    }
}

/// Decode a streaming acquisition status word.
///
/// Zero decodes to `{NoError}`. Named sticky bits map to their conditions;
/// every other bit is kept out of the set and logged at debug level.
pub fn decode_acquisition_status(bits: u32) -> BTreeSet<StreamCondition> {
    let mut conditions = BTreeSet::new();
    if bits == 0 {
        conditions.insert(StreamCondition::NoError);
        return conditions;
    }

    let status = IqStreamStatus::from_bits_truncate(bits);
    for (flag, condition) in StreamCondition::NAMED {
        if status.contains(flag) {
            conditions.insert(condition);
        }
    }

    let unnamed = bits & !IqStreamStatus::all().bits();
    if unnamed != 0 {
        debug!(
            raw = %format!("{bits:#010x}"),
            unnamed = %format!("{unnamed:#010x}"),
            "Streaming status carries bits without a named condition"
        );
    }
    conditions
}

fn default_bandwidth_hz() -> f64 {
    20e6
}

fn default_filename_base() -> PathBuf {
    PathBuf::from("iqstream")
}

fn default_file_duration() -> Duration {
    Duration::from_millis(100)
}

fn default_completion_grace() -> Duration {
    Duration::from_secs(1)
}

/// Parameters of one streaming run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Requested acquisition bandwidth in Hz
    #[serde(default = "default_bandwidth_hz")]
    pub bandwidth_hz: f64,
    /// Output destination
    #[serde(default)]
    pub destination: StreamDestination,
    /// Sample encoding
    #[serde(default)]
    pub encoding: SampleEncoding,
    /// Directory and stem of the output files
    #[serde(default = "default_filename_base")]
    pub filename_base: PathBuf,
    /// Suffix policy
    #[serde(default)]
    pub suffix: FilenameSuffix,
    /// Length of each file
    #[serde(default = "default_file_duration", with = "humantime_serde")]
    pub file_duration: Duration,
    /// Extra time allowed beyond `file_duration` before giving up
    #[serde(default = "default_completion_grace", with = "humantime_serde")]
    pub completion_grace: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bandwidth_hz: default_bandwidth_hz(),
            destination: StreamDestination::default(),
            encoding: SampleEncoding::default(),
            filename_base: default_filename_base(),
            suffix: FilenameSuffix::default(),
            file_duration: default_file_duration(),
            completion_grace: default_completion_grace(),
        }
    }
}

impl StreamConfig {
    /// Check the parameters before any driver call is made.
    pub fn validate(&self) -> Result<()> {
        if !(self.bandwidth_hz.is_finite() && self.bandwidth_hz > 0.0) {
            return Err(RsaError::configuration(format!(
                "streaming bandwidth must be positive, got {}",
                self.bandwidth_hz
            )));
        }
        if self.file_duration.is_zero() {
            return Err(RsaError::configuration("streaming file duration must be non-zero"));
        }
        if self.file_length_ms().is_none() {
            return Err(RsaError::configuration(format!(
                "streaming file duration {:?} does not fit the driver's millisecond field",
                self.file_duration
            )));
        }
        if self.destination.is_file() && self.filename_base.as_os_str().is_empty() {
            return Err(RsaError::configuration("streaming filename base is empty"));
        }
        Ok(())
    }

    /// File duration in whole milliseconds, as the driver expects it.
    pub fn file_length_ms(&self) -> Option<u32> {
        u32::try_from(self.file_duration.as_millis())
            .ok()
            .filter(|&ms| ms > 0)
    }

    /// Interval between write-status polls: a tenth of the file duration,
    /// never below one millisecond.
    pub fn poll_interval(&self) -> Duration {
        (self.file_duration / 10).max(Duration::from_millis(1))
    }

    /// Total time allowed for the writer to report completion.
    pub fn completion_budget(&self) -> Duration {
        self.file_duration + self.completion_grace
    }
}

/// Polls the streaming writer until it reports completion.
#[derive(Debug, Clone, Copy)]
pub struct StreamMonitor {
    interval: Duration,
    budget: Duration,
}

/// Outcome of a completed monitoring loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOutcome {
    /// Write-status polls issued
    pub polls: u32,
    /// Wall-clock time from the first poll to completion
    pub elapsed: Duration,
}

impl StreamMonitor {
    /// Monitor with an explicit poll interval and overall budget.
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            budget,
        }
    }

    /// Monitor derived from a stream configuration.
    pub fn for_config(config: &StreamConfig) -> Self {
        Self::new(config.poll_interval(), config.completion_budget())
    }

    /// Sleep and poll until the writer reports completion.
    ///
    /// # Errors
    ///
    /// [`RsaError::AcquisitionTimeout`] once the budget is exhausted without
    /// completion; driver failures propagate.
    pub fn wait_for_completion<D: AnalyzerDriver>(
        &self,
        session: &mut DeviceSession<D>,
    ) -> Result<MonitorOutcome> {
        let started = Instant::now();
        let deadline = started + self.budget;
        let mut polls = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(RsaError::AcquisitionTimeout {
                    operation: "IQ stream completion",
                    attempts: polls,
                    timeout_ms: u32::try_from(self.interval.as_millis()).unwrap_or(u32::MAX),
                });
            }
            thread::sleep(self.interval.min(deadline - now));

            let status = poll_stream_status(session)?;
            polls += 1;
            if status.complete {
                let elapsed = started.elapsed();
                debug!(polls, ?elapsed, "Stream writer reported completion");
                return Ok(MonitorOutcome { polls, elapsed });
            }
        }
    }
}

/// Query the streaming writer once.
pub fn poll_stream_status<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
) -> Result<StreamWriteStatus> {
    session.require("poll stream status", &[SessionState::Streaming])?;
    session
        .driver_mut()
        .stream_write_status()
        .call("IQSTREAM_GetDiskFileWriteStatus")
}

/// Apply a stream configuration to a connected, idle device.
///
/// Returns the bandwidth and sample rate the engine settled on.
pub fn configure_stream<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    config: &StreamConfig,
) -> Result<StreamAcqParameters> {
    config.validate()?;
    session.require(
        "configure streaming",
        &[SessionState::Connected, SessionState::Configured],
    )?;
    let file_length_ms = config
        .file_length_ms()
        .ok_or_else(|| RsaError::configuration("invalid streaming file duration"))?;

    let driver = session.driver_mut();
    driver
        .stream_set_acq_bandwidth(config.bandwidth_hz)
        .map_err(|status| {
            RsaError::configuration(format!("IQSTREAM_SetAcqBandwidth rejected: {status}"))
        })?;
    driver
        .stream_set_output(config.destination, config.encoding)
        .map_err(|status| {
            RsaError::configuration(format!("IQSTREAM_SetOutputConfiguration rejected: {status}"))
        })?;
    if config.destination.is_file() {
        driver
            .stream_set_filename_base(&config.filename_base)
            .map_err(|status| {
                RsaError::configuration(format!("IQSTREAM_SetDiskFilenameBase rejected: {status}"))
            })?;
        driver
            .stream_set_filename_suffix(config.suffix)
            .map_err(|status| {
                RsaError::configuration(format!(
                    "IQSTREAM_SetDiskFilenameSuffix rejected: {status}"
                ))
            })?;
    }
    driver.stream_set_file_length(file_length_ms).map_err(|status| {
        RsaError::configuration(format!("IQSTREAM_SetDiskFileLength rejected: {status}"))
    })?;

    let params = driver
        .stream_acq_parameters()
        .call("IQSTREAM_GetAcqParameters")?;
    info!(
        requested_bw_hz = config.bandwidth_hz,
        actual_bw_hz = params.bandwidth_hz,
        sample_rate = params.sample_rate,
        destination = ?config.destination,
        "IQ streaming configured"
    );
    Ok(params)
}

/// Result of a completed streaming run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamReport {
    /// Resolved bandwidth and sample rate
    pub parameters: StreamAcqParameters,
    /// File summary read after completion
    pub file_info: StreamFileInfo,
    /// Decoded acquisition status
    pub conditions: BTreeSet<StreamCondition>,
    /// Write-status polls issued
    pub polls: u32,
    /// Time from start to completion
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl StreamReport {
    /// Conditions that indicate lost samples.
    pub fn data_loss(&self) -> Vec<StreamCondition> {
        self.conditions
            .iter()
            .copied()
            .filter(|c| c.is_data_loss())
            .collect()
    }

    /// Convert any data loss into [`RsaError::StreamingDataLoss`].
    pub fn ensure_no_data_loss(&self) -> Result<()> {
        let conditions = self.data_loss();
        if conditions.is_empty() {
            Ok(())
        } else {
            Err(RsaError::StreamingDataLoss { conditions })
        }
    }
}

/// Run one complete streaming acquisition.
///
/// The device is stopped again before returning, also when monitoring
/// fails. Data loss is reported in the returned [`StreamReport`], not as an
/// error.
pub fn run_stream<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    config: &StreamConfig,
) -> Result<StreamReport> {
    let parameters = configure_stream(session, config)?;
    session.run()?;
    if let Err(e) = session.stream_start() {
        if let Err(stop_err) = session.stop() {
            warn!(error = %stop_err, "Failed to stop device after stream start failure");
        }
        return Err(e);
    }

    let monitored = StreamMonitor::for_config(config)
        .wait_for_completion(session)
        .and_then(|outcome| {
            let info = session
                .driver_mut()
                .stream_file_info()
                .call("IQSTREAM_GetDiskFileInfo")?;
            Ok((outcome, info))
        });

    let stopped = match session.stream_stop() {
        Ok(()) => session.stop(),
        Err(e) => {
            if let Err(halt_err) = session.halt() {
                warn!(error = %halt_err, "Failed to stop device after stream stop failure");
            }
            Err(e)
        }
    };
    let (outcome, file_info) = match (monitored, stopped) {
        (Ok(done), Ok(())) => done,
        (Err(e), stopped) => {
            if let Err(stop_err) = stopped {
                warn!(error = %stop_err, "Failed to stop streaming after monitor failure");
            }
            return Err(e);
        }
        (Ok(_), Err(e)) => return Err(e),
    };

    let conditions = decode_acquisition_status(file_info.acq_status);
    let report = StreamReport {
        parameters,
        file_info,
        conditions,
        polls: outcome.polls,
        elapsed: outcome.elapsed,
    };
    for condition in &report.conditions {
        if condition.is_data_loss() {
            warn!(%condition, "Streaming data loss");
        } else if *condition != StreamCondition::NoError {
            info!(%condition, "Streaming condition");
        }
    }
    info!(
        samples = report.file_info.number_samples,
        files = report.file_info.filenames.len(),
        polls = report.polls,
        "IQ stream complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_status_is_no_error() {
        let decoded = decode_acquisition_status(0);
        assert_eq!(decoded.len(), 1);
        assert!(decoded.contains(&StreamCondition::NoError));
    }

    #[test]
    fn test_sticky_overflow_bits() {
        let decoded = decode_acquisition_status((1 << 19) | (1 << 21));
        assert_eq!(
            decoded.into_iter().collect::<Vec<_>>(),
            vec![
                StreamCondition::InputBufferOverflowDataLoss,
                StreamCondition::OutputBufferOverflowDataLoss,
            ]
        );
    }

    #[test]
    fn test_input_overflow_alone() {
        assert_eq!(
            decode_acquisition_status(0x80000),
            BTreeSet::from([StreamCondition::InputBufferOverflowDataLoss])
        );
    }

    #[test]
    fn test_overrange_with_output_overflow() {
        assert_eq!(
            decode_acquisition_status(0x10000 | 0x200000),
            BTreeSet::from([
                StreamCondition::InputOverrange,
                StreamCondition::OutputBufferOverflowDataLoss,
            ])
        );
    }

    #[test]
    fn test_unnamed_bits_are_not_conditions() {
        // bit 17 is the sticky transfer discontinuity, bit 3 non-sticky overflow
        let decoded = decode_acquisition_status((1 << 17) | (1 << 3));
        assert!(decoded.is_empty());

        let decoded = decode_acquisition_status((1 << 16) | (1 << 17));
        assert_eq!(decoded.len(), 1);
        assert!(decoded.contains(&StreamCondition::InputOverrange));
    }

    #[test]
    fn test_poll_interval_floor() {
        let config = StreamConfig {
            file_duration: Duration::from_millis(5),
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));

        let config = StreamConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.file_length_ms(), Some(100));
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let config = StreamConfig {
            bandwidth_hz: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            file_duration: Duration::from_micros(500),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            filename_base: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            destination: StreamDestination::Client,
            filename_base: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_report_data_loss() {
        let report = StreamReport {
            parameters: StreamAcqParameters::default(),
            file_info: StreamFileInfo::default(),
            conditions: decode_acquisition_status((1 << 18) | (1 << 21)),
            polls: 3,
            elapsed: Duration::from_millis(120),
        };
        assert_eq!(
            report.data_loss(),
            vec![StreamCondition::OutputBufferOverflowDataLoss]
        );
        assert!(matches!(
            report.ensure_no_data_loss(),
            Err(RsaError::StreamingDataLoss { .. })
        ));
    }
}
