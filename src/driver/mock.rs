//! Simulated RSA306-class analyzer.
//!
//! Provides an in-process model of the instrument with:
//! - Device discovery over a configurable device list
//! - Settings quantisation (odd trace lengths, RBW limits tied to span)
//! - A synthetic Gaussian-shaped signal over a noise floor
//! - Block IQ records of a complex tone
//! - A streaming writer that completes after a number of polls, or after
//!   the file duration in [`SimMode::Realistic`]
//! - Fault injection per call and a log of every call issued
//!
//! # Example
//!
//! ```rust
//! use rsa_spectrum::driver::mock::{Fault, SimulatedAnalyzer};
//!
//! let analyzer = SimulatedAnalyzer::builder()
//!     .ready_after_polls(2)
//!     .fault(Fault::StreamStatus { bits: 1 << 19 })
//!     .rng_seed(7)
//!     .build();
//! assert_eq!(analyzer.call_count("DEVICE_Connect"), 0);
//! ```

use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use super::{
    AnalyzerDriver, DeviceRecord, DriverResult, DriverStatus, StreamAcqParameters, StreamFileInfo,
    StreamWriteStatus,
};
use crate::iq::{IqAcqInfo, IqBlockParameters, TriggerMode};
use crate::spectrum::{SpectrumSettings, SpectrumWindow, TraceInfo, TraceSelector};
use crate::streaming::{FilenameSuffix, SampleEncoding, StreamDestination};

/// Status codes returned by the simulator.
pub mod sim_status {
    /// Call requires a connected instrument
    pub const NOT_CONNECTED: i32 = 101;
    /// Unknown device id
    pub const DEVICE_NOT_FOUND: i32 = 102;
    /// Argument out of range
    pub const PARAMETER: i32 = 301;
    /// Call requires a running acquisition engine
    pub const NOT_RUNNING: i32 = 302;
    /// Default code for injected failures
    pub const INJECTED: i32 = 999;
}

/// Maximum real-time bandwidth of the simulated instrument.
pub const MAX_BANDWIDTH_HZ: f64 = 40e6;

/// Ratio of IQ sample rate to IQ bandwidth.
const SAMPLE_RATE_PER_HZ: f64 = 1.4;

/// Device clock in ticks per second, used for timestamps.
const TICKS_PER_SECOND: f64 = 112e6;

/// Timing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimMode {
    /// No sleeping; readiness and stream completion are counted in polls
    #[default]
    Instant,
    /// Not-ready waits sleep their timeout; streams complete after the
    /// configured file duration
    Realistic,
}

/// Synthetic signal seen by the simulated front end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalModel {
    /// Tone offset from the centre frequency in Hz
    pub offset_hz: f64,
    /// Peak power of the tone in dBm
    pub peak_dbm: f64,
    /// Width containing 99% of the tone power in Hz
    pub occupied_bw_hz: f64,
    /// Noise floor in dBm per trace point
    pub noise_floor_dbm: f64,
    /// Peak-to-peak amplitude jitter in dB
    pub jitter_db: f64,
}

impl Default for SignalModel {
    fn default() -> Self {
        Self {
            offset_hz: 0.0,
            peak_dbm: -20.0,
            occupied_bw_hz: 1e6,
            noise_floor_dbm: -90.0,
            jitter_db: 0.5,
        }
    }
}

impl SignalModel {
    fn sigma_hz(&self) -> f64 {
        // 99% of a Gaussian lies within +-2.576 sigma
        (self.occupied_bw_hz / (2.0 * 2.576)).max(1.0)
    }

    fn power_mw_at(&self, offset_hz: f64) -> f64 {
        let x = (offset_hz - self.offset_hz) / self.sigma_hz();
        10f64.powf(self.peak_dbm / 10.0) * (-0.5 * x * x).exp()
            + 10f64.powf(self.noise_floor_dbm / 10.0)
    }
}

/// Injected misbehaviour.
///
/// Call names are the vendor function names, e.g. `"DEVICE_Connect"`.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Every call of `call` fails with `code`
    FailCall {
        /// Vendor function name
        call: &'static str,
        /// Status returned
        code: i32,
    },
    /// `call` succeeds `count` times, then fails with `code`
    FailAfterN {
        /// Vendor function name
        call: &'static str,
        /// Successful calls before failing
        count: u32,
        /// Status returned
        code: i32,
    },
    /// Trace and IQ waits never report ready
    NeverReady,
    /// Traces are returned with at most `points` samples
    ShortTrace {
        /// Maximum points returned
        points: usize,
    },
    /// Trace reads report one point more than requested
    OversizedTrace,
    /// Trace info carries this status word
    TraceStatus {
        /// Raw `acqDataStatus`
        bits: u16,
    },
    /// Stream file info carries this acquisition status word
    StreamStatus {
        /// Raw `acqStatus`
        bits: u32,
    },
}

#[derive(Debug, Clone, Default)]
struct StreamSetup {
    bandwidth_hz: f64,
    destination: StreamDestination,
    encoding: SampleEncoding,
    filename_base: PathBuf,
    suffix: FilenameSuffix,
    file_length_ms: u32,
    started: Option<Instant>,
    polls: u32,
    runs: u32,
}

#[derive(Debug, Clone)]
struct SimState {
    connected: Option<i32>,
    running: bool,
    center_hz: f64,
    ref_level_dbm: f64,
    spectrum_enabled: bool,
    settings: SpectrumSettings,
    trace_armed: bool,
    trace_polls: u32,
    trace_timestamp: i64,
    iq: IqBlockParameters,
    iq_armed: bool,
    iq_polls: u32,
    stream: StreamSetup,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            connected: None,
            running: false,
            center_hz: 1e9,
            ref_level_dbm: 0.0,
            spectrum_enabled: false,
            settings: resolve(&SpectrumSettings::default(), 1e9),
            trace_armed: false,
            trace_polls: 0,
            trace_timestamp: 0,
            iq: IqBlockParameters::default(),
            iq_armed: false,
            iq_polls: 0,
            stream: StreamSetup {
                bandwidth_hz: MAX_BANDWIDTH_HZ,
                file_length_ms: 1000,
                filename_base: PathBuf::from("iqstream"),
                ..Default::default()
            },
        }
    }
}

fn window_factor(window: SpectrumWindow) -> f64 {
    match window {
        SpectrumWindow::Kaiser => 2.23,
        SpectrumWindow::Mil6Db => 1.46,
        SpectrumWindow::BlackmanHarris => 1.90,
        SpectrumWindow::Rectangle => 0.89,
        SpectrumWindow::FlatTop => 3.77,
        SpectrumWindow::Hann => 1.50,
    }
}

/// Round and clamp requested settings the way the instrument does.
fn resolve(requested: &SpectrumSettings, center_hz: f64) -> SpectrumSettings {
    let span = requested.span_hz.clamp(100.0, MAX_BANDWIDTH_HZ);
    let rbw = requested
        .rbw_hz
        .clamp((span / 10_000.0).max(10.0), (span / 2.0).min(10e6))
        .round();
    let mut length = requested.trace_length.clamp(3, 64_001);
    if length % 2 == 0 {
        length += 1;
    }
    let step = span / (length - 1) as f64;
    let start = center_hz - span / 2.0;
    let vbw = if requested.enable_vbw {
        requested.vbw_hz.clamp(1.0, rbw)
    } else {
        rbw
    };
    let sample_rate = MAX_BANDWIDTH_HZ * SAMPLE_RATE_PER_HZ;

    SpectrumSettings {
        span_hz: span,
        rbw_hz: rbw,
        enable_vbw: requested.enable_vbw,
        vbw_hz: requested.vbw_hz,
        trace_length: length,
        window: requested.window,
        vertical_unit: requested.vertical_unit,
        actual_start_freq_hz: start,
        actual_stop_freq_hz: start + step * (length - 1) as f64,
        actual_freq_step_hz: step,
        actual_rbw_hz: rbw,
        actual_vbw_hz: vbw,
        actual_num_iq_samples: (window_factor(requested.window) * sample_rate / rbw).ceil() as u32,
    }
}

/// Smallest bandwidth of the form `40 MHz / 2^k` that covers `requested`.
fn resolve_stream_bandwidth(requested: f64) -> f64 {
    let mut bandwidth = MAX_BANDWIDTH_HZ;
    while bandwidth / 2.0 >= requested && bandwidth > 10e3 {
        bandwidth /= 2.0;
    }
    bandwidth
}

/// Simulated analyzer implementing [`AnalyzerDriver`].
#[derive(Debug)]
pub struct SimulatedAnalyzer {
    devices: Vec<DeviceRecord>,
    signal: SignalModel,
    mode: SimMode,
    ready_after_polls: u32,
    stream_polls_to_complete: u32,
    faults: Vec<Fault>,
    state: SimState,
    rng: ChaCha8Rng,
    calls: Vec<&'static str>,
}

impl Default for SimulatedAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAnalyzer {
    /// One RSA306B, instant timing, default signal.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a simulator.
    pub fn builder() -> SimulatedAnalyzerBuilder {
        SimulatedAnalyzerBuilder::default()
    }

    /// Every driver call issued so far, in order.
    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    /// How often `call` was issued.
    pub fn call_count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    /// Whether the simulated engine is running.
    pub fn is_running(&self) -> bool {
        self.state.running
    }

    /// Whether the simulated instrument is connected.
    pub fn is_connected(&self) -> bool {
        self.state.connected.is_some()
    }

    /// Centre frequency last set.
    pub fn center_frequency_hz(&self) -> f64 {
        self.state.center_hz
    }

    /// Reference level last set.
    pub fn reference_level_dbm(&self) -> f64 {
        self.state.ref_level_dbm
    }

    /// Add a fault after construction.
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    /// Remove all faults.
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    fn has_fault(&self, wanted: impl Fn(&Fault) -> bool) -> bool {
        self.faults.iter().any(wanted)
    }

    /// Record a call and apply any fault targeting it.
    fn enter(&mut self, call: &'static str) -> DriverResult<()> {
        let previous = self.call_count(call) as u32;
        self.calls.push(call);
        trace!(call, "Simulated driver call");
        for fault in &self.faults {
            match *fault {
                Fault::FailCall { call: target, code } if target == call => {
                    debug!(call, code, "Injected failure");
                    return Err(DriverStatus::new(code).with_message("injected failure"));
                }
                Fault::FailAfterN {
                    call: target,
                    count,
                    code,
                } if target == call && previous >= count => {
                    debug!(call, code, count, "Injected failure after N calls");
                    return Err(DriverStatus::new(code).with_message("injected failure"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn connected(&mut self, call: &'static str) -> DriverResult<()> {
        self.enter(call)?;
        if self.state.connected.is_none() {
            return Err(DriverStatus::new(sim_status::NOT_CONNECTED).with_message("not connected"));
        }
        Ok(())
    }

    fn running(&mut self, call: &'static str) -> DriverResult<()> {
        self.connected(call)?;
        if !self.state.running {
            return Err(DriverStatus::new(sim_status::NOT_RUNNING).with_message("not running"));
        }
        Ok(())
    }

    fn parameter(message: impl Into<String>) -> DriverStatus {
        DriverStatus::new(sim_status::PARAMETER).with_message(message)
    }

    /// Common ready logic for trace and IQ waits.
    fn poll_ready(&mut self, armed: bool, polls: u32, timeout_ms: u32) -> bool {
        let ready = armed && !self.has_fault(|f| matches!(f, Fault::NeverReady)) && polls >= self.ready_after_polls;
        if !ready && self.mode == SimMode::Realistic {
            thread::sleep(Duration::from_millis(u64::from(timeout_ms)));
        }
        ready
    }

    fn synth_trace(&mut self, out: &mut [f32]) {
        let settings = self.state.settings;
        let jitter = self.signal.jitter_db / 2.0;
        for (i, slot) in out.iter_mut().enumerate() {
            let freq = settings.actual_start_freq_hz + i as f64 * settings.actual_freq_step_hz;
            let dbm = 10.0 * self.signal.power_mw_at(freq - self.state.center_hz).log10();
            let noise = if jitter > 0.0 {
                self.rng.gen_range(-jitter..=jitter)
            } else {
                0.0
            };
            *slot = (dbm + noise) as f32;
        }
    }

    fn stream_file_names(&self) -> Vec<PathBuf> {
        let stream = &self.state.stream;
        let suffix = match stream.suffix {
            FilenameSuffix::None => String::new(),
            FilenameSuffix::Timestamp => {
                chrono::Local::now().format("-%Y.%m.%d.%H.%M.%S%.3f").to_string()
            }
            FilenameSuffix::AutoIncrement => format!("-{:05}", stream.runs),
        };
        let name = |ext: &str| {
            let mut path = stream.filename_base.clone().into_os_string();
            path.push(&suffix);
            path.push(ext);
            PathBuf::from(path)
        };
        match stream.destination {
            StreamDestination::Client => Vec::new(),
            StreamDestination::Tiq => vec![name(".tiq")],
            StreamDestination::Siq => vec![name(".siq")],
            StreamDestination::SiqSplit => vec![name(".siqd"), name(".siqh")],
        }
    }
}

impl AnalyzerDriver for SimulatedAnalyzer {
    fn api_version(&mut self) -> DriverResult<String> {
        self.enter("DEVICE_GetAPIVersion")?;
        Ok(format!("{} (simulated)", env!("CARGO_PKG_VERSION")))
    }

    fn search(&mut self) -> DriverResult<Vec<DeviceRecord>> {
        self.enter("DEVICE_Search")?;
        Ok(self.devices.clone())
    }

    fn connect(&mut self, device_id: i32) -> DriverResult<()> {
        self.enter("DEVICE_Connect")?;
        if self.state.connected.is_some() {
            return Err(Self::parameter("already connected"));
        }
        if !self.devices.iter().any(|d| d.id == device_id) {
            return Err(DriverStatus::new(sim_status::DEVICE_NOT_FOUND)
                .with_message(format!("no device with id {device_id}")));
        }
        self.state.connected = Some(device_id);
        Ok(())
    }

    fn disconnect(&mut self) -> DriverResult<()> {
        self.enter("DEVICE_Disconnect")?;
        let runs = self.state.stream.runs;
        self.state = SimState::default();
        self.state.stream.runs = runs;
        Ok(())
    }

    fn preset(&mut self) -> DriverResult<()> {
        self.connected("CONFIG_Preset")?;
        self.state.center_hz = 1e9;
        self.state.ref_level_dbm = 0.0;
        self.state.settings = resolve(&SpectrumSettings::default(), 1e9);
        Ok(())
    }

    fn run(&mut self) -> DriverResult<()> {
        self.connected("DEVICE_Run")?;
        self.state.running = true;
        Ok(())
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.connected("DEVICE_Stop")?;
        self.state.running = false;
        self.state.trace_armed = false;
        self.state.iq_armed = false;
        Ok(())
    }

    fn set_center_frequency(&mut self, hz: f64) -> DriverResult<()> {
        self.connected("CONFIG_SetCenterFreq")?;
        if !(hz.is_finite() && (9e3..=6.2e9).contains(&hz)) {
            return Err(Self::parameter(format!("centre frequency {hz} Hz out of range")));
        }
        self.state.center_hz = hz;
        let settings = self.state.settings;
        self.state.settings = resolve(&settings, hz);
        Ok(())
    }

    fn set_reference_level(&mut self, dbm: f64) -> DriverResult<()> {
        self.connected("CONFIG_SetReferenceLevel")?;
        if !(dbm.is_finite() && (-130.0..=30.0).contains(&dbm)) {
            return Err(Self::parameter(format!("reference level {dbm} dBm out of range")));
        }
        self.state.ref_level_dbm = dbm;
        Ok(())
    }

    fn spectrum_set_enable(&mut self, enable: bool) -> DriverResult<()> {
        self.connected("SPECTRUM_SetEnable")?;
        self.state.spectrum_enabled = enable;
        Ok(())
    }

    fn spectrum_set_default(&mut self) -> DriverResult<()> {
        self.connected("SPECTRUM_SetDefault")?;
        self.state.settings = resolve(&SpectrumSettings::default(), self.state.center_hz);
        Ok(())
    }

    fn set_spectrum_settings(&mut self, settings: &SpectrumSettings) -> DriverResult<()> {
        self.connected("SPECTRUM_SetSettings")?;
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(settings.span_hz) || !valid(settings.rbw_hz) || settings.trace_length == 0 {
            return Err(Self::parameter("invalid spectrum settings"));
        }
        if settings.enable_vbw && !valid(settings.vbw_hz) {
            return Err(Self::parameter("invalid video bandwidth"));
        }
        self.state.settings = resolve(settings, self.state.center_hz);
        Ok(())
    }

    fn spectrum_settings(&mut self) -> DriverResult<SpectrumSettings> {
        self.connected("SPECTRUM_GetSettings")?;
        Ok(self.state.settings)
    }

    fn acquire_trace(&mut self) -> DriverResult<()> {
        self.running("SPECTRUM_AcquireTrace")?;
        if !self.state.spectrum_enabled {
            return Err(Self::parameter("spectrum engine disabled"));
        }
        self.state.trace_armed = true;
        self.state.trace_polls = 0;
        Ok(())
    }

    fn wait_for_trace_ready(&mut self, timeout_ms: u32) -> DriverResult<bool> {
        self.running("SPECTRUM_WaitForDataReady")?;
        let ready = self.poll_ready(self.state.trace_armed, self.state.trace_polls, timeout_ms);
        self.state.trace_polls += 1;
        Ok(ready)
    }

    fn get_trace(&mut self, trace: TraceSelector, buffer: &mut [f32]) -> DriverResult<usize> {
        self.running("SPECTRUM_GetTrace")?;
        let length = self.state.settings.trace_length;
        if buffer.len() != length {
            return Err(Self::parameter(format!(
                "trace {} requested with {} points, trace length is {length}",
                trace.index() + 1,
                buffer.len()
            )));
        }
        let limit = self
            .faults
            .iter()
            .find_map(|f| match f {
                Fault::ShortTrace { points } => Some(*points),
                _ => None,
            })
            .unwrap_or(length)
            .min(length);
        self.synth_trace(&mut buffer[..limit]);
        self.state.trace_armed = false;
        self.state.trace_timestamp +=
            (self.state.settings.actual_num_iq_samples as f64 / SAMPLE_RATE_PER_HZ / MAX_BANDWIDTH_HZ
                * TICKS_PER_SECOND) as i64;
        if self.has_fault(|f| matches!(f, Fault::OversizedTrace)) {
            return Ok(limit + 1);
        }
        Ok(limit)
    }

    fn trace_info(&mut self) -> DriverResult<TraceInfo> {
        self.running("SPECTRUM_GetTraceInfo")?;
        let bits = self
            .faults
            .iter()
            .find_map(|f| match f {
                Fault::TraceStatus { bits } => Some(*bits),
                _ => None,
            })
            .unwrap_or(0);
        Ok(TraceInfo::from_raw(self.state.trace_timestamp, bits))
    }

    fn set_iq_acquisition_parameters(&mut self, params: &IqBlockParameters) -> DriverResult<()> {
        self.connected("IQBLK_SetIQBandwidth")?;
        if !(params.bandwidth_hz > 0.0 && params.bandwidth_hz <= MAX_BANDWIDTH_HZ) {
            return Err(Self::parameter("IQ bandwidth out of range"));
        }
        self.enter("IQBLK_SetIQRecordLength")?;
        if params.record_length < 2 || params.record_length > 126_000_000 {
            return Err(Self::parameter("IQ record length out of range"));
        }
        self.enter("TRIG_SetTriggerMode")?;
        if params.trigger_mode == TriggerMode::Triggered {
            self.enter("TRIG_SetIFPowerTriggerLevel")?;
        }
        self.state.iq = *params;
        Ok(())
    }

    fn iq_sample_rate(&mut self) -> DriverResult<f64> {
        self.connected("IQBLK_GetIQSampleRate")?;
        Ok(self.state.iq.bandwidth_hz * SAMPLE_RATE_PER_HZ)
    }

    fn acquire_iq(&mut self) -> DriverResult<()> {
        self.running("IQBLK_AcquireIQData")?;
        self.state.iq_armed = true;
        self.state.iq_polls = 0;
        Ok(())
    }

    fn wait_for_iq_ready(&mut self, timeout_ms: u32) -> DriverResult<bool> {
        self.running("IQBLK_WaitForIQDataReady")?;
        let ready = self.poll_ready(self.state.iq_armed, self.state.iq_polls, timeout_ms);
        self.state.iq_polls += 1;
        Ok(ready)
    }

    fn iq_acq_info(&mut self) -> DriverResult<IqAcqInfo> {
        self.running("IQBLK_GetIQAcqInfo")?;
        Ok(IqAcqInfo {
            sample0_timestamp: self.state.trace_timestamp.max(0) as u64,
            trigger_sample_index: 0,
            trigger_timestamp: self.state.trace_timestamp.max(0) as u64,
            acq_status: 0,
        })
    }

    fn get_iq_data_deinterleaved(
        &mut self,
        start_index: usize,
        i_data: &mut [f32],
        q_data: &mut [f32],
    ) -> DriverResult<usize> {
        self.running("IQBLK_GetIQDataDeinterleaved")?;
        if i_data.len() != q_data.len() {
            return Err(Self::parameter("I and Q buffers differ in length"));
        }
        let record = self.state.iq.record_length;
        if start_index >= record {
            return Err(Self::parameter("IQ start index beyond record"));
        }
        let count = i_data.len().min(record - start_index);
        let sample_rate = self.state.iq.bandwidth_hz * SAMPLE_RATE_PER_HZ;
        let amplitude = (10f64.powf(self.signal.peak_dbm / 10.0) * 1e-3 * 50.0).sqrt();
        let noise = (10f64.powf(self.signal.noise_floor_dbm / 10.0) * 1e-3 * 50.0).sqrt();
        for n in 0..count {
            let phase = 2.0 * PI * self.signal.offset_hz * (start_index + n) as f64 / sample_rate;
            i_data[n] = (amplitude * phase.cos() + noise * self.rng.gen_range(-1.0..=1.0)) as f32;
            q_data[n] = (amplitude * phase.sin() + noise * self.rng.gen_range(-1.0..=1.0)) as f32;
        }
        self.state.iq_armed = false;
        Ok(count)
    }

    fn stream_set_acq_bandwidth(&mut self, hz: f64) -> DriverResult<()> {
        self.connected("IQSTREAM_SetAcqBandwidth")?;
        if !(hz.is_finite() && hz > 0.0) {
            return Err(Self::parameter("streaming bandwidth must be positive"));
        }
        self.state.stream.bandwidth_hz = resolve_stream_bandwidth(hz.min(MAX_BANDWIDTH_HZ));
        Ok(())
    }

    fn stream_acq_parameters(&mut self) -> DriverResult<StreamAcqParameters> {
        self.connected("IQSTREAM_GetAcqParameters")?;
        let bandwidth_hz = self.state.stream.bandwidth_hz;
        Ok(StreamAcqParameters {
            bandwidth_hz,
            sample_rate: bandwidth_hz * SAMPLE_RATE_PER_HZ,
        })
    }

    fn stream_set_output(
        &mut self,
        destination: StreamDestination,
        encoding: SampleEncoding,
    ) -> DriverResult<()> {
        self.connected("IQSTREAM_SetOutputConfiguration")?;
        self.state.stream.destination = destination;
        self.state.stream.encoding = encoding;
        Ok(())
    }

    fn stream_set_filename_base(&mut self, base: &Path) -> DriverResult<()> {
        self.connected("IQSTREAM_SetDiskFilenameBase")?;
        if base.as_os_str().is_empty() {
            return Err(Self::parameter("empty filename base"));
        }
        self.state.stream.filename_base = base.to_path_buf();
        Ok(())
    }

    fn stream_set_filename_suffix(&mut self, suffix: FilenameSuffix) -> DriverResult<()> {
        self.connected("IQSTREAM_SetDiskFilenameSuffix")?;
        self.state.stream.suffix = suffix;
        Ok(())
    }

    fn stream_set_file_length(&mut self, msec: u32) -> DriverResult<()> {
        self.connected("IQSTREAM_SetDiskFileLength")?;
        self.state.stream.file_length_ms = msec;
        Ok(())
    }

    fn stream_start(&mut self) -> DriverResult<()> {
        self.running("IQSTREAM_Start")?;
        self.state.stream.started = Some(Instant::now());
        self.state.stream.polls = 0;
        Ok(())
    }

    fn stream_stop(&mut self) -> DriverResult<()> {
        self.connected("IQSTREAM_Stop")?;
        if self.state.stream.started.take().is_some() {
            self.state.stream.runs += 1;
        }
        Ok(())
    }

    fn stream_write_status(&mut self) -> DriverResult<StreamWriteStatus> {
        self.connected("IQSTREAM_GetDiskFileWriteStatus")?;
        let stream = &mut self.state.stream;
        let Some(started) = stream.started else {
            return Ok(StreamWriteStatus::default());
        };
        stream.polls += 1;
        let complete = match self.mode {
            SimMode::Instant => stream.polls >= self.stream_polls_to_complete,
            SimMode::Realistic => {
                started.elapsed() >= Duration::from_millis(u64::from(stream.file_length_ms))
            }
        };
        Ok(StreamWriteStatus {
            complete,
            writing: !complete,
        })
    }

    fn stream_file_info(&mut self) -> DriverResult<StreamFileInfo> {
        self.connected("IQSTREAM_GetDiskFileInfo")?;
        let stream = &self.state.stream;
        let sample_rate = stream.bandwidth_hz * SAMPLE_RATE_PER_HZ;
        let acq_status = self
            .faults
            .iter()
            .find_map(|f| match f {
                Fault::StreamStatus { bits } => Some(*bits),
                _ => None,
            })
            .unwrap_or(0);
        Ok(StreamFileInfo {
            number_samples: (sample_rate * f64::from(stream.file_length_ms) / 1e3) as u64,
            sample0_timestamp: self.state.trace_timestamp.max(0) as u64,
            trigger_sample_index: 0,
            trigger_timestamp: 0,
            acq_status,
            filenames: self.stream_file_names(),
        })
    }
}

/// Builder for [`SimulatedAnalyzer`].
#[derive(Debug, Clone)]
pub struct SimulatedAnalyzerBuilder {
    devices: Vec<DeviceRecord>,
    signal: SignalModel,
    mode: SimMode,
    ready_after_polls: u32,
    stream_polls_to_complete: u32,
    faults: Vec<Fault>,
    rng_seed: Option<u64>,
}

impl Default for SimulatedAnalyzerBuilder {
    fn default() -> Self {
        Self {
            devices: vec![DeviceRecord {
                id: 0,
                serial: "B021367".to_string(),
                nomenclature: "RSA306B".to_string(),
            }],
            signal: SignalModel::default(),
            mode: SimMode::default(),
            ready_after_polls: 1,
            stream_polls_to_complete: 3,
            faults: Vec::new(),
            rng_seed: None,
        }
    }
}

impl SimulatedAnalyzerBuilder {
    /// Replace the device list returned by discovery.
    pub fn devices(mut self, devices: Vec<DeviceRecord>) -> Self {
        self.devices = devices;
        self
    }

    /// Signal seen by the front end.
    pub fn signal(mut self, signal: SignalModel) -> Self {
        self.signal = signal;
        self
    }

    /// Timing behaviour.
    pub fn mode(mut self, mode: SimMode) -> Self {
        self.mode = mode;
        self
    }

    /// Not-ready answers before a wait reports ready.
    pub fn ready_after_polls(mut self, polls: u32) -> Self {
        self.ready_after_polls = polls;
        self
    }

    /// Write-status polls before an instant-mode stream completes.
    pub fn stream_polls_to_complete(mut self, polls: u32) -> Self {
        self.stream_polls_to_complete = polls.max(1);
        self
    }

    /// Add a fault.
    pub fn fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Seed the noise generator for reproducible traces.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the simulator.
    pub fn build(self) -> SimulatedAnalyzer {
        let rng = match self.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        SimulatedAnalyzer {
            devices: self.devices,
            signal: self.signal,
            mode: self.mode,
            ready_after_polls: self.ready_after_polls,
            stream_polls_to_complete: self.stream_polls_to_complete,
            faults: self.faults,
            state: SimState::default(),
            rng,
            calls: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> SimulatedAnalyzer {
        let mut sim = SimulatedAnalyzer::builder().rng_seed(1).build();
        sim.connect(0).unwrap();
        sim
    }

    #[test]
    fn test_resolve_quantises_settings() {
        let requested = SpectrumSettings {
            span_hz: 80e6,
            rbw_hz: 1.0,
            trace_length: 800,
            ..Default::default()
        };
        let resolved = resolve(&requested, 2.4e9);
        assert_eq!(resolved.span_hz, 40e6);
        assert_eq!(resolved.trace_length, 801);
        assert_eq!(resolved.actual_rbw_hz, 4e3);
        assert_eq!(resolved.actual_start_freq_hz, 2.38e9);
        assert!((resolved.actual_stop_freq_hz - 2.42e9).abs() < 1e-3);
        assert_eq!(resolved.actual_freq_step_hz, 50e3);
    }

    #[test]
    fn test_stream_bandwidth_steps() {
        assert_eq!(resolve_stream_bandwidth(40e6), 40e6);
        assert_eq!(resolve_stream_bandwidth(20e6), 20e6);
        assert_eq!(resolve_stream_bandwidth(15e6), 20e6);
        assert_eq!(resolve_stream_bandwidth(3e6), 5e6);
    }

    #[test]
    fn test_calls_require_connection() {
        let mut sim = SimulatedAnalyzer::new();
        let err = sim.run().unwrap_err();
        assert_eq!(err.code, sim_status::NOT_CONNECTED);
        assert_eq!(sim.calls(), &["DEVICE_Run"]);
    }

    #[test]
    fn test_connect_unknown_device() {
        let mut sim = SimulatedAnalyzer::new();
        assert_eq!(
            sim.connect(5).unwrap_err().code,
            sim_status::DEVICE_NOT_FOUND
        );
    }

    #[test]
    fn test_fail_after_n() {
        let mut sim = SimulatedAnalyzer::builder()
            .fault(Fault::FailAfterN {
                call: "DEVICE_Run",
                count: 1,
                code: 7,
            })
            .build();
        sim.connect(0).unwrap();
        assert!(sim.run().is_ok());
        assert_eq!(sim.run().unwrap_err().code, 7);
    }

    #[test]
    fn test_trace_ready_after_polls() {
        let mut sim = connected();
        sim.spectrum_set_enable(true).unwrap();
        sim.run().unwrap();
        // not armed yet
        assert!(!sim.wait_for_trace_ready(10).unwrap());
        sim.acquire_trace().unwrap();
        assert!(!sim.wait_for_trace_ready(10).unwrap());
        assert!(sim.wait_for_trace_ready(10).unwrap());
    }

    #[test]
    fn test_trace_peaks_at_signal() {
        let mut sim = SimulatedAnalyzer::builder()
            .signal(SignalModel {
                offset_hz: 5e6,
                jitter_db: 0.0,
                ..Default::default()
            })
            .build();
        sim.connect(0).unwrap();
        sim.spectrum_set_enable(true).unwrap();
        sim.run().unwrap();
        let mut buffer = vec![0.0; 801];
        assert_eq!(sim.get_trace(TraceSelector::Trace1, &mut buffer).unwrap(), 801);
        let (peak_index, peak) = buffer
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        // 980 MHz start, 50 kHz step: 1005 MHz is point 500
        assert_eq!(peak_index, 500);
        assert!((peak - -20.0).abs() < 0.1);
        assert!(buffer[0] < -85.0);
    }

    #[test]
    fn test_get_trace_rejects_wrong_length() {
        let mut sim = connected();
        sim.run().unwrap();
        let mut buffer = vec![0.0; 10];
        assert_eq!(
            sim.get_trace(TraceSelector::Trace1, &mut buffer)
                .unwrap_err()
                .code,
            sim_status::PARAMETER
        );
    }

    #[test]
    fn test_stream_file_names() {
        let mut sim = connected();
        sim.stream_set_filename_base(Path::new("/tmp/capture")).unwrap();
        let info = sim.stream_file_info().unwrap();
        assert_eq!(
            info.filenames,
            vec![
                PathBuf::from("/tmp/capture-00000.siqd"),
                PathBuf::from("/tmp/capture-00000.siqh"),
            ]
        );

        sim.stream_set_filename_suffix(FilenameSuffix::None).unwrap();
        sim.stream_set_output(StreamDestination::Tiq, SampleEncoding::Float32)
            .unwrap();
        let info = sim.stream_file_info().unwrap();
        assert_eq!(info.filenames, vec![PathBuf::from("/tmp/capture.tiq")]);
    }

    #[test]
    fn test_iq_record_is_tone() {
        let mut sim = SimulatedAnalyzer::builder()
            .signal(SignalModel {
                offset_hz: 0.0,
                noise_floor_dbm: -200.0,
                ..Default::default()
            })
            .build();
        sim.connect(0).unwrap();
        sim.set_iq_acquisition_parameters(&IqBlockParameters::default())
            .unwrap();
        sim.run().unwrap();
        let mut i = vec![0.0; 2048];
        let mut q = vec![0.0; 2048];
        // record length 1024 caps the read
        assert_eq!(sim.get_iq_data_deinterleaved(0, &mut i, &mut q).unwrap(), 1024);
        // zero offset: constant I, zero Q
        assert!((i[0] - i[1000]).abs() < 1e-6);
        assert!(q[500].abs() < 1e-6);
    }
}
