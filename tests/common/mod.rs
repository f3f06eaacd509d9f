//! Shared helpers for integration tests against the simulated analyzer.
#![allow(dead_code)]

use rsa_spectrum::driver::mock::{Fault, SimulatedAnalyzer};
use rsa_spectrum::driver::DeviceRecord;
use rsa_spectrum::{AcquisitionConfigurator, DeviceSession, SpectrumOverrides};

pub fn device(id: i32, serial: &str) -> DeviceRecord {
    DeviceRecord {
        id,
        serial: serial.to_string(),
        nomenclature: "RSA306B".to_string(),
    }
}

pub fn simulator() -> SimulatedAnalyzer {
    SimulatedAnalyzer::builder().rng_seed(7).build()
}

pub fn simulator_with(fault: Fault) -> SimulatedAnalyzer {
    SimulatedAnalyzer::builder().rng_seed(7).fault(fault).build()
}

/// Session connected to the single simulated device.
pub fn connected(sim: SimulatedAnalyzer) -> DeviceSession<SimulatedAnalyzer> {
    let mut session = DeviceSession::new(sim);
    session.connect_selected(None).unwrap();
    session
}

/// Session configured for 20 MHz around 1 GHz with 801 points.
pub fn configured(sim: SimulatedAnalyzer) -> DeviceSession<SimulatedAnalyzer> {
    let mut session = connected(sim);
    AcquisitionConfigurator::new(1e9, 0.0)
        .with_overrides(SpectrumOverrides {
            span_hz: Some(20e6),
            trace_length: Some(801),
            ..Default::default()
        })
        .apply_settings(&mut session)
        .unwrap();
    session
}
