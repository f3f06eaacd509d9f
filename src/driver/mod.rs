//! The vendor driver contract.
//!
//! [`AnalyzerDriver`] mirrors the call surface of the RSA API in domain
//! types. Every method corresponds to one vendor call and returns a
//! [`DriverResult`]: a non-zero return code surfaces as a [`DriverStatus`]
//! and is never discarded. Nothing above this trait sees fixed-layout
//! driver records; those stay behind the [`wire`] boundary.
//!
//! Two implementations exist:
//! - [`mock::SimulatedAnalyzer`] - in-process RSA306 model used by tests and
//!   by the CLI when no hardware backend is compiled in
//! - `rsa_api::RsaApiDriver` - the vendor library (feature `hardware`)

use std::path::{Path, PathBuf};

use serde::Serialize;

pub use crate::error::{DriverResult, DriverStatus};
use crate::iq::{IqAcqInfo, IqBlockParameters};
use crate::spectrum::{SpectrumSettings, TraceInfo, TraceSelector};
use crate::streaming::{FilenameSuffix, SampleEncoding, StreamDestination};

pub mod mock;
#[cfg(feature = "hardware")]
pub mod rsa_api;
pub mod wire;

pub use mock::SimulatedAnalyzer;
#[cfg(feature = "hardware")]
pub use rsa_api::RsaApiDriver;

/// Status codes produced on this side of the driver boundary.
///
/// Vendor codes are positive; these are negative so they never collide.
pub mod local_status {
    /// A driver record could not be decoded into domain types
    pub const DECODE_FAILURE: i32 = -1;
    /// The vendor library is already owned by another driver instance
    pub const RESOURCE_BUSY: i32 = -2;
    /// A request could not be encoded for the driver
    pub const ENCODE_FAILURE: i32 = -3;
}

/// One instrument reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// Driver-assigned device id, passed to `connect`
    pub id: i32,
    /// Instrument serial number
    pub serial: String,
    /// Instrument type, e.g. "RSA306B"
    pub nomenclature: String,
}

/// Readiness and activity of the streaming file writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StreamWriteStatus {
    /// The configured file duration has been written
    pub complete: bool,
    /// Data is currently being written
    pub writing: bool,
}

/// Bandwidth and sample rate the streaming engine settled on.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StreamAcqParameters {
    /// Actual acquisition bandwidth in Hz
    pub bandwidth_hz: f64,
    /// Output sample rate in samples per second
    pub sample_rate: f64,
}

/// Summary of a completed streaming run, produced once at completion.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StreamFileInfo {
    /// Number of IQ samples written
    pub number_samples: u64,
    /// Device timestamp of the first sample
    pub sample0_timestamp: u64,
    /// Index of the trigger sample
    pub trigger_sample_index: u64,
    /// Device timestamp of the trigger
    pub trigger_timestamp: u64,
    /// Acquisition status bitmask, see [`crate::streaming::decode_acquisition_status`]
    pub acq_status: u32,
    /// Output files (data file first, then header file when split)
    pub filenames: Vec<PathBuf>,
}

/// Call contract of the spectrum analyzer driver.
///
/// Methods take `&mut self`: the driver is an exclusively owned resource and
/// calls are never issued concurrently.
pub trait AnalyzerDriver {
    /// Version string of the driver library.
    fn api_version(&mut self) -> DriverResult<String>;

    /// Enumerate attached instruments.
    fn search(&mut self) -> DriverResult<Vec<DeviceRecord>>;

    /// Open the connection to one instrument.
    fn connect(&mut self, device_id: i32) -> DriverResult<()>;

    /// Close the connection.
    fn disconnect(&mut self) -> DriverResult<()>;

    /// Restore the instrument's preset configuration.
    fn preset(&mut self) -> DriverResult<()>;

    /// Start the acquisition engine.
    fn run(&mut self) -> DriverResult<()>;

    /// Stop the acquisition engine.
    fn stop(&mut self) -> DriverResult<()>;

    /// Set the centre frequency in Hz.
    fn set_center_frequency(&mut self, hz: f64) -> DriverResult<()>;

    /// Set the reference level in dBm.
    fn set_reference_level(&mut self, dbm: f64) -> DriverResult<()>;

    /// Enable or disable the spectrum engine.
    fn spectrum_set_enable(&mut self, enable: bool) -> DriverResult<()>;

    /// Load default spectrum settings.
    fn spectrum_set_default(&mut self) -> DriverResult<()>;

    /// Commit requested spectrum settings.
    fn set_spectrum_settings(&mut self, settings: &SpectrumSettings) -> DriverResult<()>;

    /// Read back the current spectrum settings, including resolved values.
    fn spectrum_settings(&mut self) -> DriverResult<SpectrumSettings>;

    /// Arm the acquisition of the next trace.
    fn acquire_trace(&mut self) -> DriverResult<()>;

    /// Wait up to `timeout_ms` for trace data. `Ok(false)` means not ready yet.
    fn wait_for_trace_ready(&mut self, timeout_ms: u32) -> DriverResult<bool>;

    /// Copy a trace into `buffer`, returning the number of points written.
    ///
    /// `buffer.len()` is the requested length and must equal the current
    /// trace length. The returned length may be smaller.
    fn get_trace(&mut self, trace: TraceSelector, buffer: &mut [f32]) -> DriverResult<usize>;

    /// Timestamp and status of the last trace.
    fn trace_info(&mut self) -> DriverResult<TraceInfo>;

    /// Configure block IQ bandwidth, record length and trigger.
    fn set_iq_acquisition_parameters(&mut self, params: &IqBlockParameters) -> DriverResult<()>;

    /// IQ sample rate implied by the configured bandwidth.
    fn iq_sample_rate(&mut self) -> DriverResult<f64>;

    /// Arm a block IQ acquisition.
    fn acquire_iq(&mut self) -> DriverResult<()>;

    /// Wait up to `timeout_ms` for IQ data. `Ok(false)` means not ready yet.
    fn wait_for_iq_ready(&mut self, timeout_ms: u32) -> DriverResult<bool>;

    /// Acquisition header of the last IQ record.
    fn iq_acq_info(&mut self) -> DriverResult<IqAcqInfo>;

    /// Copy IQ data starting at `start_index` into the two buffers,
    /// returning the number of samples written to each.
    fn get_iq_data_deinterleaved(
        &mut self,
        start_index: usize,
        i_data: &mut [f32],
        q_data: &mut [f32],
    ) -> DriverResult<usize>;

    /// Request a streaming acquisition bandwidth.
    fn stream_set_acq_bandwidth(&mut self, hz: f64) -> DriverResult<()>;

    /// Resolved streaming bandwidth and sample rate.
    fn stream_acq_parameters(&mut self) -> DriverResult<StreamAcqParameters>;

    /// Select the streaming destination and sample encoding.
    fn stream_set_output(
        &mut self,
        destination: StreamDestination,
        encoding: SampleEncoding,
    ) -> DriverResult<()>;

    /// Base path of the files written by the streaming writer.
    fn stream_set_filename_base(&mut self, base: &Path) -> DriverResult<()>;

    /// Suffix policy for streaming file names.
    fn stream_set_filename_suffix(&mut self, suffix: FilenameSuffix) -> DriverResult<()>;

    /// Duration of each streamed file in milliseconds.
    fn stream_set_file_length(&mut self, msec: u32) -> DriverResult<()>;

    /// Start streaming. The engine must already be running.
    fn stream_start(&mut self) -> DriverResult<()>;

    /// Stop streaming.
    fn stream_stop(&mut self) -> DriverResult<()>;

    /// Poll the file writer.
    fn stream_write_status(&mut self) -> DriverResult<StreamWriteStatus>;

    /// Summary of the completed stream.
    fn stream_file_info(&mut self) -> DriverResult<StreamFileInfo>;
}
