//! CLI entry point for rsa-spectrum
//!
//! Provides command-line access to:
//! - Device discovery
//! - One-shot spectrum measurement (peak power and occupied bandwidth)
//! - Continuous peak monitoring
//! - IQ streaming to disk
//! - Block IQ capture
//!
//! Without the `hardware` feature every command runs against the simulated
//! analyzer.
//!
//! # Usage
//!
//! ```bash
//! rsa-spectrum discover
//! rsa-spectrum spectrum --center 2.4e9 --span 20e6 --json
//! rsa-spectrum monitor --duration 30s
//! rsa-spectrum stream --output /data/capture --duration 1s
//! ```

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use rsa_spectrum::acquisition::TraceAcquisition;
use rsa_spectrum::config::AppConfig;
use rsa_spectrum::driver::{AnalyzerDriver, DeviceRecord};
use rsa_spectrum::logging::{self, OutputFormat, TracingConfig};
use rsa_spectrum::measurement::{PeakPower, TraceMeasurement};
use rsa_spectrum::spectrum::ResolvedSpectrum;
use rsa_spectrum::{acquire_iq_block, acquire_single_trace, run_stream, DeviceSession};

#[derive(Parser)]
#[command(name = "rsa-spectrum")]
#[command(about = "Spectrum and IQ acquisition for Tektronix RSA analyzers", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./rsa-spectrum.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Index of the instrument in the discovery list
    #[arg(long, global = true)]
    device_index: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<OutputFormat>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached instruments
    Discover,

    /// Acquire one trace and report peak power and occupied bandwidth
    Spectrum(SpectrumArgs),

    /// Track the peak continuously
    Monitor {
        #[command(flatten)]
        spectrum: SpectrumArgs,

        /// Wall-clock budget (e.g. "10s")
        #[arg(long, value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Pause between traces (e.g. "50ms")
        #[arg(long, value_parser = parse_duration)]
        pause: Option<Duration>,
    },

    /// Stream IQ data to files and report the writer status
    Stream {
        /// Directory and stem of the output files
        #[arg(long)]
        output: Option<PathBuf>,

        /// Acquisition bandwidth in Hz
        #[arg(long)]
        bandwidth: Option<f64>,

        /// Length of the recording (e.g. "100ms")
        #[arg(long, value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Exit with an error when samples were lost
        #[arg(long)]
        strict: bool,
    },

    /// Capture one block of IQ samples
    Iq {
        /// Samples to capture
        #[arg(long)]
        record_length: Option<usize>,

        /// IQ bandwidth in Hz
        #[arg(long)]
        bandwidth: Option<f64>,
    },
}

#[derive(Args, Clone, Copy)]
struct SpectrumArgs {
    /// Centre frequency in Hz
    #[arg(long)]
    center: Option<f64>,

    /// Span in Hz
    #[arg(long)]
    span: Option<f64>,

    /// Resolution bandwidth in Hz
    #[arg(long)]
    rbw: Option<f64>,

    /// Reference level in dBm
    #[arg(long)]
    ref_level: Option<f64>,

    /// Points per trace
    #[arg(long)]
    points: Option<usize>,

    /// Power fraction for occupied bandwidth
    #[arg(long)]
    fraction: Option<f64>,
}

impl SpectrumArgs {
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(center) = self.center {
            config.instrument.center_frequency_hz = center;
        }
        if let Some(span) = self.span {
            config.spectrum.span_hz = span;
        }
        if let Some(rbw) = self.rbw {
            config.spectrum.rbw_hz = rbw;
        }
        if let Some(level) = self.ref_level {
            config.instrument.reference_level_dbm = level;
        }
        if let Some(points) = self.points {
            config.spectrum.trace_length = points;
        }
        if let Some(fraction) = self.fraction {
            config.measurement.obw_fraction = fraction;
        }
    }
}

impl Cli {
    /// Fold command-line overrides into the loaded configuration.
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(index) = self.device_index {
            config.instrument.device_index = Some(index);
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        match &self.command {
            Commands::Discover => {}
            Commands::Spectrum(args) => args.apply_to(config),
            Commands::Monitor {
                spectrum,
                duration,
                pause,
            } => {
                spectrum.apply_to(config);
                if let Some(duration) = duration {
                    config.acquisition.continuous_budget = *duration;
                }
                if let Some(pause) = pause {
                    config.acquisition.pause = *pause;
                }
            }
            Commands::Stream {
                output,
                bandwidth,
                duration,
                ..
            } => {
                if let Some(output) = output {
                    config.streaming.filename_base = output.clone();
                }
                if let Some(bandwidth) = bandwidth {
                    config.streaming.bandwidth_hz = *bandwidth;
                }
                if let Some(duration) = duration {
                    config.streaming.file_duration = *duration;
                }
            }
            Commands::Iq {
                record_length,
                bandwidth,
            } => {
                if let Some(length) = record_length {
                    config.iq.record_length = *length;
                }
                if let Some(bandwidth) = bandwidth {
                    config.iq.bandwidth_hz = *bandwidth;
                }
            }
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Loading configuration")?;
    cli.apply_to(&mut config);
    config.validate().context("Applying command-line overrides")?;

    let tracing =
        TracingConfig::from_logging_config(&config.logging).map_err(anyhow::Error::msg)?;
    logging::init(tracing).map_err(anyhow::Error::msg)?;

    let mut session = DeviceSession::new(open_driver()?);
    let result = run_command(&mut session, &cli.command, &config, cli.json);
    session.disconnect();
    result
}

#[cfg(feature = "hardware")]
fn open_driver() -> Result<rsa_spectrum::driver::RsaApiDriver> {
    rsa_spectrum::driver::RsaApiDriver::open().context("Opening the RSA API")
}

#[cfg(not(feature = "hardware"))]
fn open_driver() -> Result<rsa_spectrum::SimulatedAnalyzer> {
    tracing::info!("Built without the hardware feature; using the simulated analyzer");
    Ok(rsa_spectrum::SimulatedAnalyzer::new())
}

fn run_command<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    command: &Commands,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Discover => discover(session, json),
        Commands::Spectrum(_) => spectrum(session, config, json),
        Commands::Monitor { .. } => monitor(session, config, json),
        Commands::Stream { strict, .. } => stream(session, config, *strict, json),
        Commands::Iq { .. } => iq(session, config, json),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct DiscoverOutput {
    api_version: Option<String>,
    devices: Vec<DeviceRecord>,
}

fn discover<D: AnalyzerDriver>(session: &mut DeviceSession<D>, json: bool) -> Result<()> {
    let api_version = session.api_version();
    let devices = session.discover().context("Searching for instruments")?;
    if json {
        return print_json(&DiscoverOutput {
            api_version,
            devices,
        });
    }
    if let Some(version) = api_version {
        println!("RSA API {version}");
    }
    for (index, device) in devices.iter().enumerate() {
        println!(
            "[{index}] id {} {} (serial {})",
            device.id, device.nomenclature, device.serial
        );
    }
    Ok(())
}

fn connect_and_configure<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    config: &AppConfig,
) -> Result<(DeviceRecord, ResolvedSpectrum)> {
    let device = session
        .connect_selected(config.instrument.device_index)
        .context("Connecting to instrument")?;
    let resolved = config
        .configurator()
        .apply_settings(session)
        .context("Configuring spectrum")?;
    Ok((device, resolved))
}

#[derive(Serialize)]
struct SpectrumOutput {
    device: DeviceRecord,
    resolved: ResolvedSpectrum,
    measurement: TraceMeasurement,
}

fn spectrum<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    let (device, resolved) = connect_and_configure(session, config)?;
    let trace = acquire_single_trace(session, config.acquisition.poll_policy())
        .context("Acquiring trace")?;
    let measurement = trace
        .measure(config.measurement.obw_fraction)
        .context("Measuring trace")?;

    if json {
        return print_json(&SpectrumOutput {
            device,
            resolved,
            measurement,
        });
    }
    println!(
        "{} {}: span {:.3} MHz, RBW {:.1} kHz, {} points",
        device.nomenclature,
        device.serial,
        resolved.span_hz() / 1e6,
        resolved.actual_rbw_hz() / 1e3,
        resolved.trace_length()
    );
    print_peak(&measurement.peak);
    let obw = &measurement.obw;
    println!(
        "OBW ({:.1}%): {:.3} MHz [{:.6} .. {:.6} MHz], total {:.2} dBm",
        obw.target_fraction * 100.0,
        obw.bandwidth_hz / 1e6,
        obw.lower_freq_hz / 1e6,
        obw.upper_freq_hz / 1e6,
        obw.total_power_dbm
    );
    Ok(())
}

fn print_peak(peak: &PeakPower) {
    println!(
        "Peak: {:.2} dBm at {:.6} MHz",
        peak.power_dbm,
        peak.frequency_hz / 1e6
    );
}

#[derive(Serialize)]
struct MonitorLine {
    sequence: u64,
    peak: PeakPower,
}

fn monitor<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    connect_and_configure(session, config)?;
    session.run().context("Starting acquisition")?;

    let policy = config.acquisition.poll_policy();
    let outcome = TraceAcquisition::new(session, policy).and_then(|mut acquisition| {
        acquisition.run_continuous(
            config.acquisition.continuous_budget,
            config.acquisition.pause,
            |frame| {
                match frame.peak() {
                    Ok(peak) if json => match serde_json::to_string(&MonitorLine {
                        sequence: frame.sequence,
                        peak,
                    }) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!(error = %e, "Failed to encode peak"),
                    },
                    Ok(peak) => {
                        print!("#{:<6} ", frame.sequence);
                        print_peak(&peak);
                    }
                    Err(e) => tracing::warn!(sequence = frame.sequence, error = %e, "Skipping trace"),
                }
                ControlFlow::Continue(())
            },
        )
    });
    let stopped = session.stop();
    let stats = outcome.context("Continuous acquisition")?;
    stopped.context("Stopping acquisition")?;

    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!(
            "{} traces in {:.2} s ({:.1}/s), {} timeouts, {} flagged",
            stats.traces,
            stats.elapsed.as_secs_f64(),
            stats.traces_per_second(),
            stats.timeouts,
            stats.flagged
        );
    }
    Ok(())
}

fn stream<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    config: &AppConfig,
    strict: bool,
    json: bool,
) -> Result<()> {
    session
        .connect_selected(config.instrument.device_index)
        .context("Connecting to instrument")?;
    let report = run_stream(session, &config.streaming).context("Streaming IQ")?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Streamed {} samples at {:.3} MS/s ({:.3} MHz bandwidth) in {} polls",
            report.file_info.number_samples,
            report.parameters.sample_rate / 1e6,
            report.parameters.bandwidth_hz / 1e6,
            report.polls
        );
        for file in &report.file_info.filenames {
            println!("  {}", file.display());
        }
        for condition in &report.conditions {
            println!("Status: {condition}");
        }
    }
    if strict {
        report.ensure_no_data_loss()?;
    }
    Ok(())
}

#[derive(Serialize)]
struct IqSummary {
    samples: usize,
    requested: usize,
    sample_rate: f64,
    mean_power_dbm: Option<f64>,
}

fn iq<D: AnalyzerDriver>(
    session: &mut DeviceSession<D>,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    session
        .connect_selected(config.instrument.device_index)
        .context("Connecting to instrument")?;
    let record = acquire_iq_block(session, &config.iq, config.acquisition.poll_policy())
        .context("Capturing IQ block")?;
    let summary = IqSummary {
        samples: record.len(),
        requested: record.requested_length,
        sample_rate: record.sample_rate,
        mean_power_dbm: record.mean_power_dbm(),
    };

    if json {
        return print_json(&summary);
    }
    println!(
        "{} of {} samples at {:.3} MS/s",
        summary.samples,
        summary.requested,
        summary.sample_rate / 1e6
    );
    if let Some(power) = summary.mean_power_dbm {
        println!("Mean power: {power:.2} dBm");
    }
    Ok(())
}
