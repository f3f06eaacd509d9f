//! Configuration, single-trace and continuous acquisition against the
//! simulated analyzer.

mod common;

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use common::{configured, connected, simulator, simulator_with};
use rsa_spectrum::driver::mock::{Fault, SimMode, SimulatedAnalyzer};
use rsa_spectrum::{
    acquire_single_trace, AcquisitionConfigurator, PollPolicy, RsaError, SessionState,
    SpectrumOverrides, TraceAcquisition,
};

fn fast_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(1), 3)
}

#[test]
fn test_configuration_call_order() {
    let session = configured(simulator());
    let calls = session.driver().calls();
    let connect = calls.iter().position(|c| *c == "DEVICE_Connect").unwrap();
    assert_eq!(
        &calls[connect + 1..],
        [
            "CONFIG_Preset",
            "CONFIG_SetCenterFreq",
            "CONFIG_SetReferenceLevel",
            "SPECTRUM_SetEnable",
            "SPECTRUM_SetDefault",
            "SPECTRUM_GetSettings",
            "SPECTRUM_SetSettings",
            "SPECTRUM_GetSettings",
        ]
    );
    assert_eq!(session.state(), SessionState::Configured);
}

#[test]
fn test_resolved_settings_come_from_the_device() {
    let mut session = connected(simulator());
    let resolved = AcquisitionConfigurator::new(2.4e9, -10.0)
        .with_overrides(SpectrumOverrides {
            span_hz: Some(10e6),
            trace_length: Some(800),
            ..Default::default()
        })
        .apply_settings(&mut session)
        .unwrap();

    // the simulator only accepts odd trace lengths
    assert_eq!(resolved.trace_length(), 801);
    assert_eq!(resolved.span_hz(), 10e6);
    assert!((resolved.start_freq_hz() - (2.4e9 - 5e6)).abs() < 1.0);
    assert!((resolved.freq_step_hz() - 12_500.0).abs() < 1e-6);
    assert_eq!(resolved.frequency_axis().len(), 801);
    assert_eq!(session.resolved(), Some(&resolved));
    assert_eq!(session.driver().center_frequency_hz(), 2.4e9);
    assert_eq!(session.driver().reference_level_dbm(), -10.0);
}

#[test]
fn test_rejected_setting_is_a_configuration_failure() {
    let mut session = connected(simulator_with(Fault::FailCall {
        call: "SPECTRUM_SetSettings",
        code: 301,
    }));
    let err = AcquisitionConfigurator::default()
        .apply_settings(&mut session)
        .unwrap_err();
    assert!(matches!(err, RsaError::ConfigurationFailure { .. }));
    assert!(err.to_string().contains("SPECTRUM_SetSettings"));
    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.resolved().is_none());
}

#[test]
fn test_failed_reconfigure_drops_previous_settings() {
    let mut session = configured(simulator_with(Fault::FailAfterN {
        call: "SPECTRUM_SetSettings",
        count: 1,
        code: 301,
    }));
    assert_eq!(session.state(), SessionState::Configured);

    let err = AcquisitionConfigurator::new(2.4e9, 0.0)
        .apply_settings(&mut session)
        .unwrap_err();
    assert!(matches!(err, RsaError::ConfigurationFailure { .. }));
    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.resolved().is_none());
    assert!(TraceAcquisition::new(&mut session, fast_policy()).is_err());
}

#[test]
fn test_out_of_range_centre_frequency_is_rejected() {
    let mut session = connected(simulator());
    let err = AcquisitionConfigurator::new(20e9, 0.0)
        .apply_settings(&mut session)
        .unwrap_err();
    assert!(err.to_string().contains("CONFIG_SetCenterFreq"));
}

#[test]
fn test_single_trace_measures_simulated_tone() {
    let mut session = configured(simulator());
    let trace = acquire_single_trace(&mut session, PollPolicy::default()).unwrap();
    assert_eq!(session.state(), SessionState::Configured);
    assert_eq!(trace.samples.len(), 801);
    assert_eq!(trace.frequencies.len(), 801);

    let result = trace.measure(0.99).unwrap();
    assert!((result.peak.frequency_hz - 1e9).abs() < 200e3);
    assert!((result.peak.power_dbm + 20.0).abs() < 1.0);
    assert!(
        (result.obw.bandwidth_hz - 1e6).abs() < 0.25e6,
        "obw {}",
        result.obw.bandwidth_hz
    );
    assert!(result.obw.lower_freq_hz < result.peak.frequency_hz);
    assert!(result.obw.upper_freq_hz > result.peak.frequency_hz);
}

#[test]
fn test_get_trace_before_run_never_reaches_driver() {
    let mut session = configured(simulator());
    let mut acquisition = TraceAcquisition::new(&mut session, fast_policy()).unwrap();
    let err = acquisition.get_trace().unwrap_err();
    assert!(matches!(
        err,
        RsaError::InvalidState {
            state: SessionState::Configured,
            ..
        }
    ));
    drop(acquisition);
    assert_eq!(session.driver().call_count("SPECTRUM_GetTrace"), 0);
}

#[test]
fn test_arm_clears_ready_flag() {
    let mut session = configured(simulator());
    session.run().unwrap();
    let mut acquisition = TraceAcquisition::new(&mut session, fast_policy()).unwrap();
    assert!(!acquisition.is_ready());

    acquisition.acquire_once().unwrap();
    assert!(acquisition.is_ready());

    acquisition.arm().unwrap();
    assert!(!acquisition.is_ready());
}

#[test]
fn test_acquisition_needs_resolved_settings() {
    let mut session = connected(simulator());
    assert!(TraceAcquisition::new(&mut session, fast_policy()).is_err());
}

#[test]
fn test_never_ready_times_out_and_stops_device() {
    let mut session = configured(simulator_with(Fault::NeverReady));
    let err = acquire_single_trace(&mut session, fast_policy()).unwrap_err();
    match err {
        RsaError::AcquisitionTimeout { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.driver().call_count("SPECTRUM_WaitForDataReady"), 3);
    assert_eq!(session.state(), SessionState::Configured);
    assert!(!session.driver().is_running());
}

#[test]
fn test_short_trace_uses_actual_length() {
    let mut session = configured(simulator_with(Fault::ShortTrace { points: 500 }));
    let trace = acquire_single_trace(&mut session, PollPolicy::default()).unwrap();
    assert_eq!(trace.samples.len(), 500);
    assert_eq!(trace.frequencies.len(), 500);
    assert_eq!(trace.frequencies[0], trace.resolved.start_freq_hz());
}

#[test]
fn test_oversized_trace_is_rejected() {
    let mut session = configured(simulator_with(Fault::OversizedTrace));
    let err = acquire_single_trace(&mut session, PollPolicy::default()).unwrap_err();
    assert!(matches!(err, RsaError::ConfigurationFailure { .. }));
}

#[test]
fn test_trace_info_failure_is_not_fatal() {
    let mut session = configured(simulator_with(Fault::FailCall {
        call: "SPECTRUM_GetTraceInfo",
        code: 5,
    }));
    let trace = acquire_single_trace(&mut session, PollPolicy::default()).unwrap();
    assert!(trace.info.is_none());
}

#[test]
fn test_continuous_stops_when_callback_breaks() {
    let mut session = configured(simulator());
    session.run().unwrap();
    let mut sequences = Vec::new();
    let stats = TraceAcquisition::new(&mut session, PollPolicy::default())
        .unwrap()
        .run_continuous(Duration::from_secs(5), Duration::ZERO, |frame| {
            sequences.push(frame.sequence);
            assert_eq!(frame.len(), 801);
            if sequences.len() == 5 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    assert_eq!(stats.traces, 5);
    assert!(stats.stopped_early);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(session.state(), SessionState::Running);
}

#[test]
fn test_continuous_counts_flagged_traces() {
    let mut session = configured(simulator_with(Fault::TraceStatus { bits: 0x1 }));
    session.run().unwrap();
    let mut seen = 0;
    let stats = TraceAcquisition::new(&mut session, PollPolicy::default())
        .unwrap()
        .run_continuous(Duration::from_secs(5), Duration::ZERO, |frame| {
            assert!(frame.info.is_some_and(|info| !info.status.is_empty()));
            seen += 1;
            if seen == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
    assert_eq!(stats.flagged, 3);
}

#[test]
fn test_continuous_respects_budget_when_never_ready() {
    let sim = SimulatedAnalyzer::builder()
        .mode(SimMode::Realistic)
        .fault(Fault::NeverReady)
        .build();
    let mut session = configured(sim);
    session.run().unwrap();

    let budget = Duration::from_millis(200);
    let policy = PollPolicy::new(Duration::from_millis(20), 1000);
    let started = Instant::now();
    let stats = TraceAcquisition::new(&mut session, policy)
        .unwrap()
        .run_continuous(budget, Duration::ZERO, |_| ControlFlow::Continue(()))
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(stats.traces, 0);
    assert!(!stats.stopped_early);
    assert!(elapsed >= budget);
    assert!(elapsed < budget + Duration::from_millis(150), "{elapsed:?}");
}

#[test]
fn test_continuous_rearms_after_poll_budget() {
    let sim = SimulatedAnalyzer::builder()
        .mode(SimMode::Realistic)
        .fault(Fault::NeverReady)
        .build();
    let mut session = configured(sim);
    session.run().unwrap();

    let policy = PollPolicy::new(Duration::from_millis(5), 2);
    let stats = TraceAcquisition::new(&mut session, policy)
        .unwrap()
        .run_continuous(Duration::from_millis(100), Duration::ZERO, |_| {
            ControlFlow::Continue(())
        })
        .unwrap();
    assert!(stats.timeouts >= 2, "timeouts {}", stats.timeouts);
    assert!(session.driver().call_count("SPECTRUM_AcquireTrace") as u32 >= stats.timeouts);
}
