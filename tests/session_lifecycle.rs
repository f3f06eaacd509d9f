//! Lifecycle and state-guard tests for `DeviceSession`.

mod common;

use common::{configured, connected, device, simulator, simulator_with};
use rsa_spectrum::driver::mock::{Fault, SimulatedAnalyzer};
use rsa_spectrum::{DeviceSession, RsaError, SessionState};
use tracing_test::traced_test;

#[test]
fn test_run_before_connect_is_rejected() {
    let mut session = DeviceSession::new(simulator());
    let err = session.run().unwrap_err();
    assert!(matches!(
        err,
        RsaError::InvalidState {
            state: SessionState::Disconnected,
            ..
        }
    ));
    assert_eq!(session.driver().call_count("DEVICE_Run"), 0);
}

#[test]
fn test_no_devices_found() {
    let sim = SimulatedAnalyzer::builder().devices(Vec::new()).build();
    let mut session = DeviceSession::new(sim);
    let err = session.connect_selected(None).unwrap_err();
    assert!(matches!(err, RsaError::NoDeviceFound));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.driver().call_count("DEVICE_Connect"), 0);
}

#[test]
fn test_multiple_devices_need_an_index() {
    let devices = vec![device(3, "B000001"), device(8, "B000002")];
    let sim = SimulatedAnalyzer::builder().devices(devices).build();
    let mut session = DeviceSession::new(sim);

    let err = session.connect_selected(None).unwrap_err();
    assert!(matches!(err, RsaError::AmbiguousSelection { count: 2 }));
    assert!(err.is_recoverable());
    assert_eq!(session.state(), SessionState::Disconnected);

    let selected = session.connect_selected(Some(1)).unwrap();
    assert_eq!(selected.id, 8);
    assert_eq!(session.device().map(|d| d.serial.as_str()), Some("B000002"));
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn test_connect_failure_is_fatal() {
    let sim = simulator_with(Fault::FailCall {
        call: "DEVICE_Connect",
        code: 42,
    });
    let mut session = DeviceSession::new(sim);
    let err = session.connect_selected(None).unwrap_err();
    match &err {
        RsaError::ConnectFailure { device_id, status } => {
            assert_eq!(*device_id, 0);
            assert_eq!(status.code, 42);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_fatal());
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn test_stream_start_before_run_never_reaches_driver() {
    let mut session = configured(simulator());
    let err = session.stream_start().unwrap_err();
    assert_eq!(err.to_string(), "Cannot start streaming while configured");
    assert_eq!(session.driver().call_count("IQSTREAM_Start"), 0);
    assert_eq!(session.state(), SessionState::Configured);
}

#[test]
fn test_stop_returns_to_idle_state() {
    let mut session = connected(simulator());
    session.run().unwrap();
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Connected);

    let mut session = configured(simulator());
    session.run().unwrap();
    assert_eq!(session.state(), SessionState::Running);
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Configured);
    assert!(session.resolved().is_some());
}

#[test]
fn test_disconnect_from_every_state() {
    let mut session = connected(simulator());
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);

    let mut session = configured(simulator());
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.resolved().is_none());

    let mut session = configured(simulator());
    session.run().unwrap();
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.driver().is_running());

    let mut session = configured(simulator());
    session.run().unwrap();
    session.stream_start().unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
    let calls = session.driver().calls();
    let tail = &calls[calls.len() - 3..];
    assert_eq!(tail, ["IQSTREAM_Stop", "DEVICE_Stop", "DEVICE_Disconnect"]);
    assert!(!session.driver().is_connected());
}

#[test]
fn test_disconnect_twice_is_a_no_op() {
    let mut session = connected(simulator());
    session.disconnect();
    session.disconnect();
    assert_eq!(session.driver().call_count("DEVICE_Disconnect"), 1);
}

#[traced_test]
#[test]
fn test_disconnect_logs_stop_failure_and_completes() {
    let mut session = connected(simulator_with(Fault::FailCall {
        call: "DEVICE_Stop",
        code: 7,
    }));
    session.run().unwrap();
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.driver().call_count("DEVICE_Disconnect"), 1);
    assert!(logs_contain("DEVICE_Stop failed during disconnect"));
}

#[test]
fn test_discover_requires_disconnected() {
    let mut session = connected(simulator());
    let err = session.discover().unwrap_err();
    assert!(matches!(err, RsaError::InvalidState { .. }));
    assert_eq!(session.driver().call_count("DEVICE_Search"), 1);
}

#[test]
fn test_api_version_failure_yields_none() {
    let mut session = DeviceSession::new(simulator_with(Fault::FailCall {
        call: "DEVICE_GetAPIVersion",
        code: 1,
    }));
    assert!(session.api_version().is_none());

    let mut session = DeviceSession::new(simulator());
    assert!(session.api_version().is_some_and(|v| v.contains("simulated")));
}
