//! Configuration layering: defaults, TOML file, environment.

use std::fs;
use std::path::Path;
use std::time::Duration;

use rsa_spectrum::config::{AppConfig, ConfigError};
use rsa_spectrum::logging::OutputFormat;
use rsa_spectrum::spectrum::SpectrumWindow;
use rsa_spectrum::streaming::{SampleEncoding, StreamDestination};
use serial_test::serial;
use tempfile::TempDir;

const CENTER_VAR: &str = "RSA_SPECTRUM_INSTRUMENT__CENTER_FREQUENCY_HZ";
const TIMEOUT_VAR: &str = "RSA_SPECTRUM_ACQUISITION__WAIT_TIMEOUT";

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("rsa-spectrum.toml");
    fs::write(&path, contents).unwrap();
    path
}

fn clear_env() {
    std::env::remove_var(CENTER_VAR);
    std::env::remove_var(TIMEOUT_VAR);
}

#[test]
#[serial]
fn test_file_overrides_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[logging]
level = "debug"
format = "json"

[instrument]
device_index = 1
center_frequency_hz = 2.4e9
reference_level_dbm = -10.0

[spectrum]
span_hz = 20e6
window = "flat_top"

[acquisition]
wait_timeout = "250ms"
continuous_budget = "30s"

[measurement]
obw_fraction = 0.9

[streaming]
destination = "tiq"
encoding = "float32"
file_duration = "1s"
"#,
    );

    let config = AppConfig::load(Some(&path)).unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, OutputFormat::Json);
    assert_eq!(config.instrument.device_index, Some(1));
    assert_eq!(config.instrument.center_frequency_hz, 2.4e9);
    assert_eq!(config.instrument.reference_level_dbm, -10.0);
    assert_eq!(config.spectrum.span_hz, 20e6);
    assert_eq!(config.spectrum.window, SpectrumWindow::FlatTop);
    assert_eq!(config.spectrum.rbw_hz, 300e3);
    assert_eq!(config.acquisition.wait_timeout, Duration::from_millis(250));
    assert_eq!(config.acquisition.continuous_budget, Duration::from_secs(30));
    assert_eq!(config.acquisition.max_wait_attempts, 100);
    assert_eq!(config.measurement.obw_fraction, 0.9);
    assert_eq!(config.streaming.destination, StreamDestination::Tiq);
    assert_eq!(config.streaming.encoding, SampleEncoding::Float32);
    assert_eq!(config.streaming.file_duration, Duration::from_secs(1));
    assert_eq!(config.streaming.bandwidth_hz, 20e6);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[instrument]
center_frequency_hz = 2.4e9

[acquisition]
wait_timeout = "250ms"
"#,
    );

    std::env::set_var(CENTER_VAR, "915000000.0");
    std::env::set_var(TIMEOUT_VAR, "50ms");
    let loaded = AppConfig::load(Some(&path));
    clear_env();

    let config = loaded.unwrap();
    assert_eq!(config.instrument.center_frequency_hz, 915e6);
    assert_eq!(config.acquisition.wait_timeout, Duration::from_millis(50));
}

#[test]
#[serial]
fn test_defaults_without_file() {
    clear_env();
    let config = AppConfig::figment(None).extract::<AppConfig>().unwrap();
    assert_eq!(config, AppConfig::default());
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env();
    let err = AppConfig::load(Some(Path::new("/nonexistent/rsa-spectrum.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

#[test]
#[serial]
fn test_invalid_value_is_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[measurement]\nobw_fraction = 1.5\n");
    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("obw_fraction"));
}

#[test]
#[serial]
fn test_wrong_type_is_a_load_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[spectrum]\ntrace_length = \"many\"\n");
    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
#[serial]
fn test_unknown_log_level_is_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[logging]\nlevel = \"chatty\"\n");
    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("chatty"));
}
