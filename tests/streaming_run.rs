//! IQ streaming runs against the simulated analyzer.

mod common;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use common::{configured, connected, simulator, simulator_with};
use rsa_spectrum::driver::mock::{Fault, SimMode, SimulatedAnalyzer};
use rsa_spectrum::streaming::{
    configure_stream, FilenameSuffix, StreamDestination, StreamMonitor,
};
use rsa_spectrum::{run_stream, RsaError, SessionState, StreamCondition, StreamConfig};
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> StreamConfig {
    StreamConfig {
        filename_base: dir.path().join("capture"),
        file_duration: Duration::from_millis(20),
        ..Default::default()
    }
}

#[test]
fn test_stream_run_reports_files_and_status() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let mut session = connected(simulator());

    let report = run_stream(&mut session, &config).unwrap();

    assert_eq!(report.parameters.bandwidth_hz, 20e6);
    assert_eq!(report.parameters.sample_rate, 28e6);
    assert_eq!(report.polls, 3);
    assert_eq!(
        report.file_info.filenames,
        vec![
            dir.path().join("capture-00000.siqd"),
            dir.path().join("capture-00000.siqh"),
        ]
    );
    assert_eq!(report.conditions, BTreeSet::from([StreamCondition::NoError]));
    assert!(report.data_loss().is_empty());
    assert!(report.ensure_no_data_loss().is_ok());

    assert_eq!(session.driver().call_count("IQSTREAM_GetDiskFileInfo"), 1);
    assert_eq!(session.driver().call_count("IQSTREAM_Stop"), 1);
    assert_eq!(session.state(), SessionState::Connected);
    assert!(!session.driver().is_running());
}

#[test]
fn test_configured_session_returns_to_configured() {
    let dir = TempDir::new().unwrap();
    let mut session = configured(simulator());
    run_stream(&mut session, &config_in(&dir)).unwrap();
    assert_eq!(session.state(), SessionState::Configured);
}

#[test]
fn test_auto_increment_suffix_advances_per_run() {
    let dir = TempDir::new().unwrap();
    let config = StreamConfig {
        destination: StreamDestination::Tiq,
        ..config_in(&dir)
    };
    let mut session = connected(simulator());
    run_stream(&mut session, &config).unwrap();
    let second = run_stream(&mut session, &config).unwrap();
    assert_eq!(
        second.file_info.filenames,
        vec![dir.path().join("capture-00001.tiq")]
    );
}

#[test]
fn test_no_suffix_uses_base_name() {
    let dir = TempDir::new().unwrap();
    let config = StreamConfig {
        destination: StreamDestination::Siq,
        suffix: FilenameSuffix::None,
        ..config_in(&dir)
    };
    let mut session = connected(simulator());
    let report = run_stream(&mut session, &config).unwrap();
    assert_eq!(report.file_info.filenames, vec![dir.path().join("capture.siq")]);
}

#[test]
fn test_device_stopped_when_stream_stop_fails() {
    let dir = TempDir::new().unwrap();
    let mut session = connected(simulator_with(Fault::FailCall {
        call: "IQSTREAM_Stop",
        code: 12,
    }));

    let err = run_stream(&mut session, &config_in(&dir)).unwrap_err();

    assert!(matches!(
        err,
        RsaError::Driver {
            call: "IQSTREAM_Stop",
            ..
        }
    ));
    assert_eq!(session.driver().call_count("DEVICE_Stop"), 1);
    assert!(!session.driver().is_running());
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn test_data_loss_is_reported_not_raised() {
    let dir = TempDir::new().unwrap();
    let bits = (1 << 16) | (1 << 19) | (1 << 21);
    let mut session = connected(simulator_with(Fault::StreamStatus { bits }));

    let report = run_stream(&mut session, &config_in(&dir)).unwrap();

    assert_eq!(
        report.conditions,
        BTreeSet::from([
            StreamCondition::InputOverrange,
            StreamCondition::InputBufferOverflowDataLoss,
            StreamCondition::OutputBufferOverflowDataLoss,
        ])
    );
    assert_eq!(
        report.data_loss(),
        vec![
            StreamCondition::InputBufferOverflowDataLoss,
            StreamCondition::OutputBufferOverflowDataLoss,
        ]
    );
    let err = report.ensure_no_data_loss().unwrap_err();
    assert!(matches!(err, RsaError::StreamingDataLoss { .. }));
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("file writing too slow"));
}

#[test]
fn test_unnamed_status_bit_is_ignored() {
    let dir = TempDir::new().unwrap();
    let mut session = connected(simulator_with(Fault::StreamStatus { bits: 1 << 17 }));
    let report = run_stream(&mut session, &config_in(&dir)).unwrap();
    assert!(report.conditions.is_empty());
}

#[test]
fn test_stream_start_failure_stops_device() {
    let dir = TempDir::new().unwrap();
    let mut session = connected(simulator_with(Fault::FailCall {
        call: "IQSTREAM_Start",
        code: 12,
    }));
    let err = run_stream(&mut session, &config_in(&dir)).unwrap_err();
    assert!(matches!(
        err,
        RsaError::Driver {
            call: "IQSTREAM_Start",
            ..
        }
    ));
    assert_eq!(session.state(), SessionState::Connected);
    assert!(!session.driver().is_running());
    assert_eq!(session.driver().call_count("IQSTREAM_GetDiskFileInfo"), 0);
}

#[test]
fn test_completion_timeout_still_stops_stream() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedAnalyzer::builder()
        .stream_polls_to_complete(u32::MAX)
        .build();
    let config = StreamConfig {
        completion_grace: Duration::from_millis(30),
        ..config_in(&dir)
    };
    let mut session = connected(sim);

    let err = run_stream(&mut session, &config).unwrap_err();

    assert!(matches!(err, RsaError::AcquisitionTimeout { .. }));
    assert_eq!(session.driver().call_count("IQSTREAM_Stop"), 1);
    assert_eq!(session.driver().call_count("IQSTREAM_GetDiskFileInfo"), 0);
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn test_realistic_stream_waits_for_file_duration() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedAnalyzer::builder().mode(SimMode::Realistic).build();
    let config = StreamConfig {
        file_duration: Duration::from_millis(50),
        ..config_in(&dir)
    };
    let mut session = connected(sim);
    let report = run_stream(&mut session, &config).unwrap();
    assert!(report.elapsed >= Duration::from_millis(40));
    assert!(report.polls >= 5);
}

#[test]
fn test_client_destination_skips_file_naming() {
    let mut session = connected(simulator());
    let config = StreamConfig {
        destination: StreamDestination::Client,
        filename_base: PathBuf::new(),
        file_duration: Duration::from_millis(20),
        ..Default::default()
    };
    let params = configure_stream(&mut session, &config).unwrap();
    assert_eq!(params.bandwidth_hz, 20e6);
    assert_eq!(session.driver().call_count("IQSTREAM_SetDiskFilenameBase"), 0);
    assert_eq!(session.driver().call_count("IQSTREAM_SetDiskFilenameSuffix"), 0);
}

#[test]
fn test_invalid_config_makes_no_driver_calls() {
    let mut session = connected(simulator());
    let before = session.driver().calls().len();
    let config = StreamConfig {
        bandwidth_hz: -1.0,
        ..Default::default()
    };
    let err = configure_stream(&mut session, &config).unwrap_err();
    assert!(matches!(err, RsaError::ConfigurationFailure { .. }));
    assert_eq!(session.driver().calls().len(), before);
}

#[test]
fn test_monitor_requires_streaming() {
    let mut session = connected(simulator());
    let monitor = StreamMonitor::new(Duration::from_millis(1), Duration::from_millis(10));
    let err = monitor.wait_for_completion(&mut session).unwrap_err();
    assert!(matches!(err, RsaError::InvalidState { .. }));
}
