//! Trace acquisition: bounded ready polling, one-shot and continuous modes.
//!
//! A single `SPECTRUM_WaitForDataReady` call may return "not ready"; the
//! caller retries under a [`PollPolicy`] until the data is ready or the
//! attempt budget is exhausted. Continuous acquisition additionally runs on
//! a wall-clock budget: each wait is clamped to the remaining time, so the
//! loop ends at most one poll interval after the budget elapses.

use std::ops::ControlFlow;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::driver::AnalyzerDriver;
use crate::error::{DriverResultExt, Result, RsaError};
use crate::measurement::{self, OccupiedBandwidth, PeakPower, TraceMeasurement};
use crate::session::{DeviceSession, SessionState};
use crate::spectrum::{ResolvedSpectrum, TraceInfo, TraceSelector};

fn default_wait_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_max_attempts() -> u32 {
    100
}

/// Bounds on a data-ready poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Timeout passed to each individual wait call
    #[serde(default = "default_wait_timeout", with = "humantime_serde")]
    pub wait_timeout: Duration,
    /// Wait calls allowed before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            wait_timeout: default_wait_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl PollPolicy {
    /// Create a policy.
    pub fn new(wait_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            wait_timeout,
            max_attempts,
        }
    }

    /// Per-call timeout in whole milliseconds, at least 1.
    pub fn timeout_ms(&self) -> u32 {
        duration_to_ms(self.wait_timeout)
    }
}

fn duration_to_ms(duration: Duration) -> u32 {
    let ms = duration.as_micros().div_ceil(1000);
    u32::try_from(ms).unwrap_or(u32::MAX).clamp(1, i32::MAX as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Ready { attempts: u32 },
    DeadlineReached { attempts: u32 },
}

/// Retry `wait` until it reports ready, the attempt budget is exhausted or
/// the optional deadline passes. Each wait gets at most the time left
/// before the deadline.
pub(crate) fn poll_until_ready<F>(
    policy: &PollPolicy,
    operation: &'static str,
    deadline: Option<Instant>,
    mut wait: F,
) -> Result<PollOutcome>
where
    F: FnMut(u32) -> Result<bool>,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let timeout_ms = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(PollOutcome::DeadlineReached {
                        attempts: attempt - 1,
                    });
                }
                policy.timeout_ms().min(duration_to_ms(remaining))
            }
            None => policy.timeout_ms(),
        };
        if wait(timeout_ms)? {
            return Ok(PollOutcome::Ready { attempts: attempt });
        }
        trace!(operation, attempt, timeout_ms, "Not ready");
    }
    Err(RsaError::AcquisitionTimeout {
        operation,
        attempts: max_attempts,
        timeout_ms: policy.timeout_ms(),
    })
}

/// One trace snapshot, borrowed from the acquisition's reusable buffers.
#[derive(Debug, Clone, Copy)]
pub struct TraceFrame<'a> {
    /// Position of this frame in the run, starting at 0
    pub sequence: u64,
    /// Amplitude samples; length is the driver-reported actual length
    pub samples: &'a [f32],
    /// Frequency of each sample
    pub frequencies: &'a [f64],
    /// Timestamp and status, when the driver reported them
    pub info: Option<TraceInfo>,
    /// Settings the trace was acquired with
    pub resolved: &'a ResolvedSpectrum,
}

impl TraceFrame<'_> {
    /// Number of valid samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the driver returned no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Peak amplitude and its frequency.
    pub fn peak(&self) -> Result<PeakPower> {
        measurement::peak_power(self.samples, self.frequencies)
    }

    /// Occupied bandwidth containing `target_fraction` of the power.
    pub fn occupied_bandwidth(&self, target_fraction: f64) -> Result<OccupiedBandwidth> {
        measurement::occupied_bandwidth(self.samples, self.frequencies, self.resolved, target_fraction)
    }

    /// Peak and occupied bandwidth together.
    pub fn measure(&self, target_fraction: f64) -> Result<TraceMeasurement> {
        TraceMeasurement::compute(self.samples, self.frequencies, self.resolved, target_fraction)
    }

    /// Copy the frame out of the reusable buffers.
    pub fn to_trace(&self) -> SpectrumTrace {
        SpectrumTrace {
            samples: self.samples.to_vec(),
            frequencies: self.frequencies.to_vec(),
            info: self.info,
            resolved: *self.resolved,
        }
    }
}

/// An owned trace, for callers that keep data past the next acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumTrace {
    /// Amplitude samples
    pub samples: Vec<f32>,
    /// Frequency of each sample
    pub frequencies: Vec<f64>,
    /// Timestamp and status
    pub info: Option<TraceInfo>,
    /// Settings the trace was acquired with
    pub resolved: ResolvedSpectrum,
}

impl SpectrumTrace {
    /// Peak amplitude and its frequency.
    pub fn peak(&self) -> Result<PeakPower> {
        measurement::peak_power(&self.samples, &self.frequencies)
    }

    /// Peak and occupied bandwidth together.
    pub fn measure(&self, target_fraction: f64) -> Result<TraceMeasurement> {
        TraceMeasurement::compute(&self.samples, &self.frequencies, &self.resolved, target_fraction)
    }
}

/// Counters reported at the end of a continuous run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ContinuousStats {
    /// Traces delivered to the callback
    pub traces: u64,
    /// Poll budgets exhausted without data
    pub timeouts: u32,
    /// Traces whose status carried any flag
    pub flagged: u64,
    /// Wall-clock duration of the run
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Whether the callback ended the run before the budget
    pub stopped_early: bool,
}

impl ContinuousStats {
    /// Throughput of the run.
    pub fn traces_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.traces as f64 / secs
        } else {
            0.0
        }
    }

    /// Mean time per trace, if any trace was acquired.
    pub fn seconds_per_trace(&self) -> Option<f64> {
        (self.traces > 0).then(|| self.elapsed.as_secs_f64() / self.traces as f64)
    }
}

/// Acquires spectrum traces from a configured session.
///
/// Owns the trace and frequency buffers, sized once from the resolved
/// settings and reused for every trace.
pub struct TraceAcquisition<'s, D: AnalyzerDriver> {
    session: &'s mut DeviceSession<D>,
    resolved: ResolvedSpectrum,
    policy: PollPolicy,
    trace: TraceSelector,
    buffer: Vec<f32>,
    axis: Vec<f64>,
    valid: usize,
    ready: bool,
    sequence: u64,
}

impl<'s, D: AnalyzerDriver> TraceAcquisition<'s, D> {
    /// Prepare acquisition on a session holding resolved settings.
    ///
    /// # Errors
    ///
    /// [`RsaError::InvalidState`] unless the session is Configured or
    /// Running.
    pub fn new(session: &'s mut DeviceSession<D>, policy: PollPolicy) -> Result<Self> {
        session.require(
            "acquire traces",
            &[SessionState::Configured, SessionState::Running],
        )?;
        let resolved = *session.resolved().ok_or(RsaError::InvalidState {
            operation: "acquire traces",
            state: session.state(),
        })?;
        let length = resolved.trace_length();
        Ok(Self {
            session,
            resolved,
            policy,
            trace: TraceSelector::default(),
            buffer: vec![0.0; length],
            axis: resolved.frequency_axis(),
            valid: 0,
            ready: false,
            sequence: 0,
        })
    }

    /// Read a different device trace.
    pub fn with_trace(mut self, trace: TraceSelector) -> Self {
        self.trace = trace;
        self
    }

    /// Settings the buffers were sized from.
    pub fn resolved(&self) -> &ResolvedSpectrum {
        &self.resolved
    }

    /// Whether the last poll observed ready data.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Arm the next trace. Clears the ready flag.
    pub fn arm(&mut self) -> Result<()> {
        self.session.require("arm a trace", &[SessionState::Running])?;
        self.ready = false;
        self.session
            .driver_mut()
            .acquire_trace()
            .call("SPECTRUM_AcquireTrace")
    }

    /// Poll until trace data is ready.
    ///
    /// # Errors
    ///
    /// [`RsaError::AcquisitionTimeout`] when the attempt budget runs out.
    pub fn wait_for_data_ready(&mut self) -> Result<()> {
        match self.wait_until(None)? {
            PollOutcome::Ready { .. } => Ok(()),
            PollOutcome::DeadlineReached { attempts } => Err(RsaError::AcquisitionTimeout {
                operation: "spectrum trace",
                attempts,
                timeout_ms: self.policy.timeout_ms(),
            }),
        }
    }

    fn wait_until(&mut self, deadline: Option<Instant>) -> Result<PollOutcome> {
        self.session.require("wait for trace data", &[SessionState::Running])?;
        let session = &mut *self.session;
        let outcome = poll_until_ready(&self.policy, "spectrum trace", deadline, |timeout_ms| {
            session
                .driver_mut()
                .wait_for_trace_ready(timeout_ms)
                .call("SPECTRUM_WaitForDataReady")
        })?;
        self.ready = matches!(outcome, PollOutcome::Ready { .. });
        Ok(outcome)
    }

    /// Read the current trace into the reusable buffer.
    ///
    /// Returns the valid samples; their count is the driver's actual length,
    /// which may be below the trace length.
    pub fn get_trace(&mut self) -> Result<&[f32]> {
        self.session.require("read a trace", &[SessionState::Running])?;
        let requested = self.buffer.len();
        let actual = self
            .session
            .driver_mut()
            .get_trace(self.trace, &mut self.buffer)
            .call("SPECTRUM_GetTrace")?;
        if actual > requested {
            return Err(RsaError::configuration(format!(
                "driver returned {actual} trace points for a {requested}-point request"
            )));
        }
        if actual < requested {
            debug!(actual, requested, "Short trace");
        }
        self.valid = actual;
        Ok(&self.buffer[..actual])
    }

    /// Timestamp and status of the last trace. Failures are logged.
    pub fn trace_info(&mut self) -> Option<TraceInfo> {
        match self.session.driver_mut().trace_info() {
            Ok(info) => {
                if !info.status.is_empty() {
                    warn!(
                        status = ?info.status,
                        timestamp = info.timestamp,
                        "Trace acquisition status flagged"
                    );
                }
                Some(info)
            }
            Err(status) => {
                warn!(%status, "SPECTRUM_GetTraceInfo failed");
                None
            }
        }
    }

    fn frame(&mut self, info: Option<TraceInfo>) -> TraceFrame<'_> {
        let sequence = self.sequence;
        self.sequence += 1;
        TraceFrame {
            sequence,
            samples: &self.buffer[..self.valid],
            frequencies: &self.axis[..self.valid],
            info,
            resolved: &self.resolved,
        }
    }

    /// Arm, wait for and read one trace.
    pub fn acquire_once(&mut self) -> Result<TraceFrame<'_>> {
        self.arm()?;
        self.wait_for_data_ready()?;
        self.get_trace()?;
        let info = self.trace_info();
        Ok(self.frame(info))
    }

    /// Acquire traces until `budget` elapses or `on_frame` breaks.
    ///
    /// Exhausted poll budgets are counted and logged, then the next trace is
    /// armed. `pause` is slept between iterations, clamped to the time left.
    pub fn run_continuous<F>(
        &mut self,
        budget: Duration,
        pause: Duration,
        mut on_frame: F,
    ) -> Result<ContinuousStats>
    where
        F: FnMut(&TraceFrame<'_>) -> ControlFlow<()>,
    {
        self.session
            .require("run continuous acquisition", &[SessionState::Running])?;
        let started = Instant::now();
        let deadline = started + budget;
        let mut stats = ContinuousStats::default();
        info!(?budget, trace_length = self.resolved.trace_length(), "Continuous acquisition started");

        while Instant::now() < deadline {
            self.arm()?;
            match self.wait_until(Some(deadline)) {
                Ok(PollOutcome::Ready { .. }) => {}
                Ok(PollOutcome::DeadlineReached { .. }) => break,
                Err(RsaError::AcquisitionTimeout { attempts, .. }) => {
                    stats.timeouts += 1;
                    warn!(attempts, "Trace not ready within poll budget; re-arming");
                    continue;
                }
                Err(e) => return Err(e),
            }

            self.get_trace()?;
            let info = self.trace_info();
            if info.is_some_and(|i| !i.status.is_empty()) {
                stats.flagged += 1;
            }
            stats.traces += 1;

            let frame = self.frame(info);
            if on_frame(&frame).is_break() {
                stats.stopped_early = true;
                break;
            }

            if !pause.is_zero() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                thread::sleep(pause.min(remaining));
            }
        }

        stats.elapsed = started.elapsed();
        info!(
            traces = stats.traces,
            timeouts = stats.timeouts,
            elapsed = ?stats.elapsed,
            traces_per_second = stats.traces_per_second(),
            "Continuous acquisition finished"
        );
        Ok(stats)
    }
}

/// Run the device, acquire one trace and stop again.
///
/// The device is stopped on both success and failure.
pub fn acquire_single_trace<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    policy: PollPolicy,
) -> Result<SpectrumTrace> {
    session.run()?;
    let acquired = TraceAcquisition::new(session, policy)
        .and_then(|mut acquisition| acquisition.acquire_once().map(|frame| frame.to_trace()));
    let stopped = session.stop();
    let trace = acquired?;
    stopped?;
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_ms_rounds_up_and_floors_at_one() {
        assert_eq!(PollPolicy::new(Duration::from_micros(10), 1).timeout_ms(), 1);
        assert_eq!(PollPolicy::new(Duration::from_micros(1500), 1).timeout_ms(), 2);
        assert_eq!(PollPolicy::default().timeout_ms(), 100);
    }

    #[test]
    fn test_poll_retries_until_ready() {
        let mut calls = 0;
        let outcome = poll_until_ready(&PollPolicy::default(), "test", None, |_| {
            calls += 1;
            Ok(calls == 3)
        })
        .unwrap();
        assert_eq!(outcome, PollOutcome::Ready { attempts: 3 });
    }

    #[test]
    fn test_poll_budget_exhausted() {
        let policy = PollPolicy::new(Duration::from_millis(5), 4);
        let mut calls = 0;
        let err = poll_until_ready(&policy, "test", None, |_| {
            calls += 1;
            Ok(false)
        })
        .unwrap_err();
        assert_eq!(calls, 4);
        assert!(matches!(
            err,
            RsaError::AcquisitionTimeout {
                attempts: 4,
                timeout_ms: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_poll_clamps_wait_to_deadline() {
        let policy = PollPolicy::new(Duration::from_secs(10), 1000);
        let deadline = Instant::now() + Duration::from_millis(30);
        let outcome = poll_until_ready(&policy, "test", Some(deadline), |timeout_ms| {
            assert!(timeout_ms <= 30);
            thread::sleep(Duration::from_millis(u64::from(timeout_ms)));
            Ok(false)
        })
        .unwrap();
        assert!(matches!(outcome, PollOutcome::DeadlineReached { .. }));
    }

    #[test]
    fn test_poll_propagates_driver_error() {
        let err = poll_until_ready(&PollPolicy::default(), "test", None, |_| {
            Err(RsaError::configuration("boom"))
        })
        .unwrap_err();
        assert!(matches!(err, RsaError::ConfigurationFailure { .. }));
    }

    #[test]
    fn test_stats_rates() {
        let stats = ContinuousStats {
            traces: 20,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(stats.traces_per_second(), 10.0);
        assert_eq!(stats.seconds_per_trace(), Some(0.1));
        assert_eq!(ContinuousStats::default().seconds_per_trace(), None);
    }
}
