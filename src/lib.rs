//! # rsa_spectrum
//!
//! Acquisition sessions and spectrum measurements for Tektronix RSA
//! real-time spectrum analyzers (RSA306 family).
//!
//! ## Crate Structure
//!
//! - **`session`**: [`DeviceSession`], the lifecycle state machine owning one
//!   driver. Discovery, selection, connect, run/stop and a disconnect that
//!   always completes.
//! - **`configure`**: [`AcquisitionConfigurator`] applies centre frequency,
//!   reference level and spectrum overrides, then reads back the
//!   authoritative [`ResolvedSpectrum`].
//! - **`acquisition`**: bounded data-ready polling, single traces and the
//!   continuous acquisition loop.
//! - **`measurement`**: peak power and occupied bandwidth of a trace.
//! - **`streaming`**: IQ streaming to disk and decoding of the writer's
//!   acquisition status.
//! - **`iq`**: block IQ capture.
//! - **`driver`**: the [`AnalyzerDriver`] contract, the simulated analyzer
//!   and (feature `hardware`) the vendor library backend.
//! - **`config`** / **`logging`**: layered configuration and subscriber
//!   setup used by the `rsa-spectrum` binary.
//!
//! ## Example
//!
//! ```no_run
//! use rsa_spectrum::{
//!     acquire_single_trace, AcquisitionConfigurator, DeviceSession, PollPolicy,
//!     SimulatedAnalyzer,
//! };
//!
//! # fn main() -> rsa_spectrum::Result<()> {
//! let mut session = DeviceSession::new(SimulatedAnalyzer::new());
//! session.connect_selected(None)?;
//! AcquisitionConfigurator::new(2.4e9, -10.0).apply_settings(&mut session)?;
//! let trace = acquire_single_trace(&mut session, PollPolicy::default())?;
//! let result = trace.measure(0.99)?;
//! println!("{:.2} dBm at {:.0} Hz", result.peak.power_dbm, result.peak.frequency_hz);
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod config;
pub mod configure;
pub mod driver;
pub mod error;
pub mod iq;
pub mod logging;
pub mod measurement;
pub mod session;
pub mod spectrum;
pub mod streaming;

pub use acquisition::{
    acquire_single_trace, ContinuousStats, PollPolicy, SpectrumTrace, TraceAcquisition,
    TraceFrame,
};
pub use config::{AppConfig, ConfigError};
pub use configure::AcquisitionConfigurator;
pub use driver::{AnalyzerDriver, DeviceRecord, SimulatedAnalyzer};
pub use error::{DriverStatus, Result, RsaError};
pub use iq::{acquire_iq_block, IqBlockParameters, IqRecord};
pub use measurement::{OccupiedBandwidth, PeakPower, TraceMeasurement};
pub use session::{DeviceSession, SessionState};
pub use spectrum::{ResolvedSpectrum, SpectrumOverrides, SpectrumSettings};
pub use streaming::{run_stream, StreamCondition, StreamConfig, StreamReport};
