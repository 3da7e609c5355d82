//! `spl-meter` command line.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use spl_meter::calibration::{CorrectionFilter, FileFilterCache, Sensitivity};
use spl_meter::metrics::{
    parse_start_time, read_wav_mono, write_csv, AnalysisSummary, MetricsCalculator,
    MetricsSettings, TrailingAnalyzer,
};
use spl_meter::source::{find_input_device, select_input_device};
use spl_meter::{list_input_devices, Meter, MeterConfig, MeterSession, RecorderSink};

/// Name fragment of the measurement microphone picked when no device is given.
const AUTO_DETECT_NAME: &str = "umik";

/// Calibrated SPL and loudness meter
#[derive(Parser)]
#[command(name = "spl-meter", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List input devices
    Devices,

    /// Design and cache the correction filter, then print the sensitivity
    Calibrate {
        #[command(flatten)]
        meter: MeterArgs,
    },

    /// Print level metrics in real time
    Meter {
        #[command(flatten)]
        meter: MeterArgs,
    },

    /// Record corrected audio to rotating WAV files while metering
    Record {
        #[command(flatten)]
        meter: MeterArgs,

        /// Output directory, or a file path used as a name template
        #[arg(short, long, default_value = "recordings")]
        output: PathBuf,

        /// Segment length in seconds (0 disables rotation)
        #[arg(long, default_value_t = 3600)]
        rotation_secs: u64,
    },

    /// Compute metrics for a recorded WAV file and write them as CSV
    Analyze {
        /// WAV file to analyze
        input: PathBuf,

        /// CSV output (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Calibration file for dBSPL
        #[arg(long, env = "CALIBRATION_FILE")]
        calibration_file: Option<PathBuf>,

        /// Recording start, "YYYY-MM-DD HH:MM:SS" (default: parsed from the file name)
        #[arg(long)]
        start_time: Option<String>,

        /// Step between rows in milliseconds
        #[arg(long, default_value_t = 100)]
        step_ms: u64,

        /// Trailing LUFS window in milliseconds
        #[arg(long, default_value_t = 1000)]
        window_ms: u64,
    },
}

#[derive(Args)]
struct MeterArgs {
    /// Input device index (default: a UMIK if calibrated and present, else the system default)
    #[arg(short, long)]
    device: Option<usize>,

    /// Microphone calibration file
    #[arg(short, long, env = "CALIBRATION_FILE")]
    calibration_file: Option<PathBuf>,

    /// Sample rate in Hz (ignored when calibrated)
    #[arg(long, default_value_t = 48000)]
    sample_rate: u32,

    /// Seconds of audio per captured frame
    #[arg(long, default_value_t = 6.0)]
    buffer_seconds: f64,

    /// FIR tap count
    #[arg(long, default_value_t = 1024)]
    num_taps: usize,

    /// Redesign the filter even if it is cached
    #[arg(long)]
    force_rebuild: bool,

    /// Metrics interval in seconds (0 = one snapshot per frame)
    #[arg(long, default_value_t = 3.0)]
    interval: f64,
}

impl MeterArgs {
    fn into_config(self) -> Result<MeterConfig> {
        if !self.interval.is_finite() || self.interval < 0.0 {
            bail!("interval must be a non-negative number of seconds");
        }
        // A non-default device needs its calibration file, so only look for
        // the measurement microphone when one is given.
        let device = match self.device {
            Some(index) => Some(index),
            None if self.calibration_file.is_none() => None,
            None => find_input_device(AUTO_DETECT_NAME).map(|d| {
                tracing::info!(
                    index = d.index,
                    name = %d.name,
                    "Auto-detected measurement microphone"
                );
                d.index
            }),
        };
        let config = MeterConfig {
            device,
            sample_rate: self.sample_rate,
            buffer_seconds: self.buffer_seconds,
            calibration_file: self.calibration_file,
            num_taps: self.num_taps,
            force_filter_rebuild: self.force_rebuild,
            metrics_interval: Duration::from_secs_f64(self.interval),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Devices => devices(),
        Command::Calibrate { meter } => calibrate(meter.into_config()?),
        Command::Meter { meter } => {
            let session = Meter::builder()
                .config(meter.into_config()?)
                .metrics()
                .on_event(|e| tracing::warn!(?e, "meter event"))
                .start()
                .await?;
            run_until_ctrl_c(session).await
        }
        Command::Record {
            meter,
            output,
            rotation_secs,
        } => {
            let config = MeterConfig {
                rotation: Duration::from_secs(rotation_secs),
                ..meter.into_config()?
            };
            let recorder = RecorderSink::new(output, config.rotation);
            let session = Meter::builder()
                .config(config)
                .metrics()
                .add_sink(recorder)
                .on_event(|e| tracing::warn!(?e, "meter event"))
                .start()
                .await?;
            run_until_ctrl_c(session).await
        }
        Command::Analyze {
            input,
            output,
            calibration_file,
            start_time,
            step_ms,
            window_ms,
        } => analyze(
            &input,
            output,
            calibration_file,
            start_time.as_deref(),
            Duration::from_millis(step_ms),
            Duration::from_millis(window_ms),
        ),
    }
}

fn devices() -> Result<()> {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }
    for d in devices {
        println!(
            "{}{:>3}: {} ({} ch, {} Hz)",
            if d.is_default { "*" } else { " " },
            d.index,
            d.name,
            d.max_input_channels,
            d.default_sample_rate
        );
    }
    Ok(())
}

fn calibrate(config: MeterConfig) -> Result<()> {
    let Some(path) = &config.calibration_file else {
        bail!("calibrate needs a calibration file (--calibration-file or CALIBRATION_FILE)");
    };
    let device = select_input_device(config.device)?;
    let sample_rate = if device.default_sample_rate > 0 {
        device.default_sample_rate
    } else {
        config.sample_rate
    };

    let filter = CorrectionFilter::load_or_design(
        path,
        sample_rate,
        config.num_taps,
        &FileFilterCache::new(),
        config.force_filter_rebuild,
    )?;
    let sensitivity =
        Sensitivity::load(path, config.nominal_sensitivity_dbfs, config.reference_dbspl)?;

    println!("Device:       {} ({} Hz)", device.name, sample_rate);
    println!(
        "Filter:       {} coefficients ({:?})",
        filter.coefficients().len(),
        filter.source()
    );
    println!(
        "Sensitivity:  {:.2} dBFS @ {:.1} dBSPL",
        sensitivity.sensitivity_dbfs, sensitivity.reference_dbspl
    );
    Ok(())
}

async fn run_until_ctrl_c(session: MeterSession) -> Result<()> {
    println!(
        "Metering {} at {} Hz, press Ctrl+C to stop",
        session.device().name,
        session.sample_rate()
    );
    let cancel = session.cancel_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stopping");
            cancel.cancel();
        }
    });

    let stats = session.wait().await?;
    println!(
        "Captured {} frames, dispatched {}, dropped {}",
        stats.frames_captured, stats.frames_dispatched, stats.frames_dropped
    );
    Ok(())
}

fn analyze(
    input: &std::path::Path,
    output: Option<PathBuf>,
    calibration_file: Option<PathBuf>,
    start_time: Option<&str>,
    step: Duration,
    window: Duration,
) -> Result<()> {
    if step.is_zero() {
        bail!("step must be non-zero");
    }
    let (sample_rate, samples) =
        read_wav_mono(input).with_context(|| format!("reading {}", input.display()))?;

    let defaults = MeterConfig::default();
    let sensitivity = calibration_file
        .map(|path| {
            Sensitivity::load(path, defaults.nominal_sensitivity_dbfs, defaults.reference_dbspl)
        })
        .transpose()?;

    let start = match start_time {
        Some(text) => Some(
            parse_start_time(text).with_context(|| format!("unrecognized start time '{text}'"))?,
        ),
        None => input
            .file_name()
            .and_then(|name| parse_start_time(&name.to_string_lossy())),
    };

    let settings = MetricsSettings::from_config(&defaults, sensitivity);
    let calculator = MetricsCalculator::new(sample_rate, settings);
    let rows = TrailingAnalyzer::new(calculator)
        .step(step)
        .window(window)
        .analyze(&samples, start);

    match output {
        Some(path) => {
            let file =
                File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            write_csv(BufWriter::new(file), &rows)?;
        }
        None => write_csv(std::io::stdout().lock(), &rows)?,
    }

    if let Some(summary) = AnalysisSummary::from_rows(&rows) {
        eprintln!(
            "{} rows, max dBFS {:.2}, max LUFS {:.2}, max flux {:.2}{}",
            rows.len(),
            summary.max_dbfs,
            summary.max_lufs,
            summary.max_flux,
            summary
                .max_dbspl
                .map(|v| format!(", max dBSPL {v:.2}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
