//! flimari CLI - Command-line interface for phasor lifetime analysis.
//!
//! Loads photon-count stacks, corrects them against a reference, applies
//! photon-count thresholds and median smoothing, and reports lifetime
//! statistics per dataset.
#![allow(clippy::uninlined_format_args, clippy::too_many_lines)]

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use flimari_core::{Signal, DEFAULT_FREQUENCY_MHZ, FREQUENCY_ATTR};
use flimari_io::{export_summaries, AutoSignalLoader, TiffSignalLoader};
use flimari_phasor::{
    AttrValue, Calibration, CalibrationMode, CalibrationStatus, Dataset, DatasetAttr,
    FilterParams, Metric, Session, Shared, Stat,
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    FlimariIo(#[from] flimari_io::Error),

    #[error("{0}")]
    Core(#[from] flimari_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Calibration mode selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Rotate and scale by offsets from a known-lifetime standard
    Mapping,
    /// Divide by the measured instrument response
    Irf,
}

impl From<Mode> for CalibrationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mapping => CalibrationMode::Mapping,
            Mode::Irf => CalibrationMode::Irf,
        }
    }
}

/// Phasor FLIM calibration and lifetime analysis.
#[derive(Parser)]
#[command(name = "flimari")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that reads signal files.
#[derive(Args, Debug, Clone, Copy)]
struct InputArgs {
    /// Channel to read (1-based)
    #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u16).range(1..))]
    channel: u16,

    /// Number of channels interleaved in TIFF stacks
    #[arg(long, default_value = "1")]
    tiff_channels: usize,
}

impl InputArgs {
    fn channel_index(self) -> usize {
        usize::from(self.channel) - 1
    }

    fn loader(self, frequency: Option<f64>) -> AutoSignalLoader {
        let mut tiff = TiffSignalLoader::new().with_channels(self.tiff_channels);
        if let Some(frequency) = frequency {
            tiff = tiff.with_frequency(frequency);
        }
        AutoSignalLoader::new().with_tiff(tiff)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a signal file
    Info {
        /// Input file (TIFF stack or HDF5)
        input: PathBuf,

        #[command(flatten)]
        io: InputArgs,
    },

    /// Compute calibration offsets from a reference of known lifetime
    Calibrate {
        /// Reference file
        #[arg(short, long)]
        reference: PathBuf,

        #[command(flatten)]
        io: InputArgs,

        /// Laser frequency in MHz (default: file metadata, else 80)
        #[arg(long)]
        frequency: Option<f64>,

        /// Lifetime of the reference standard in ns
        #[arg(long, default_value = "4.0")]
        lifetime: f64,
    },

    /// Calibrate, filter and summarise one or more datasets
    Process {
        /// Input files
        #[arg(required = true)]
        input: Vec<PathBuf>,

        #[command(flatten)]
        io: InputArgs,

        /// Reference file for calibration
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Calibration mode
        #[arg(long, value_enum, default_value = "mapping")]
        mode: Mode,

        /// Laser frequency in MHz (default: reference metadata, else 80)
        #[arg(long)]
        frequency: Option<f64>,

        /// Lifetime of the reference standard in ns
        #[arg(long, default_value = "4.0")]
        lifetime: f64,

        /// Pixels with fewer photons are excluded
        #[arg(long, default_value = "0")]
        min_count: u64,

        /// Pixels with more photons are excluded
        #[arg(long, default_value = "10000")]
        max_count: u64,

        /// Median filter window size (below 3 disables smoothing)
        #[arg(long, default_value = "3")]
        kernel_size: usize,

        /// Median filter passes (0 disables smoothing)
        #[arg(long, default_value = "0")]
        repetition: usize,

        /// Group assigned to every input
        #[arg(short, long)]
        group: Option<String>,

        /// Directory for per-dataset CSV summaries
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Statistics of one metric of one dataset.
#[derive(Serialize)]
struct FeatureRow {
    metric: Metric,
    stats: BTreeMap<Stat, f64>,
}

#[derive(Serialize)]
struct DatasetReport {
    name: String,
    display_name: String,
    group: String,
    color: String,
    frequency: f64,
    calibration: CalibrationStatus,
    pixels: usize,
    features: Vec<FeatureRow>,
}

#[derive(Serialize)]
struct ProcessReport {
    datasets: Vec<DatasetReport>,
    shared_settings: Vec<(DatasetAttr, Shared<AttrValue>)>,
    group_median_avg_lifetime: BTreeMap<String, f64>,
    exported: Vec<PathBuf>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { input, io } => {
            let signal = io.loader(None).read(&input, io.channel_index())?;
            print_info(&input, &signal);
        }

        Commands::Calibrate {
            reference,
            io,
            frequency,
            lifetime,
        } => {
            let mut calibration = Calibration::new();
            calibration.load(&reference, io.channel_index(), &io.loader(frequency))?;
            let frequency = resolve_frequency(frequency, &calibration);
            calibration.calibrate(frequency, lifetime)?;

            if let Some(path) = calibration.reference_path() {
                println!("Reference: {}", path.display());
            }
            println!("Frequency: {} MHz, lifetime: {} ns", frequency, lifetime);
            if let Some(offsets) = calibration.offsets() {
                println!("{:<10} | {:<15} | {:<15}", "Harmonic", "Phase (rad)", "Modulation");
                println!("{:-<10}-|-{:-<15}-|-{:-<15}", "", "", "");
                for (i, (phase, modulation)) in offsets
                    .phase_zero
                    .iter()
                    .zip(offsets.modulation_zero.iter())
                    .enumerate()
                {
                    println!("{:<10} | {:<15.6} | {:<15.6}", i + 1, phase, modulation);
                }
            }
        }

        Commands::Process {
            input,
            io,
            reference,
            mode,
            frequency,
            lifetime,
            min_count,
            max_count,
            kernel_size,
            repetition,
            group,
            output_dir,
            json,
        } => {
            let start = Instant::now();
            let loader = io.loader(frequency);
            let channel = io.channel_index();

            let datasets = input
                .par_iter()
                .map(|path| Dataset::open(path, channel, &loader))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut session = Session::new();
            for dataset in datasets {
                session.add_dataset(dataset);
            }
            let indices: Vec<usize> = (0..session.len()).collect();

            if let Some(reference) = &reference {
                session.load_reference(reference, channel, &loader)?;
                session.set_calibration_mode(mode.into());
                if matches!(mode, Mode::Mapping) {
                    let frequency = resolve_frequency(frequency, session.calibration());
                    session.recalibrate(frequency, lifetime)?;
                }
                session.calibrate_datasets(&indices)?;
            }

            let params = FilterParams::default()
                .with_min_count(min_count)
                .with_max_count(max_count)
                .with_kernel_size(kernel_size)
                .with_repetition(repetition);
            session.apply_filter_params(&indices, params.into())?;
            if let Some(group) = &group {
                session.assign_group(&indices, group)?;
            }

            let mut exported = Vec::new();
            if let Some(dir) = &output_dir {
                let report = export_summaries(dir, session.datasets())?;
                for (name, error) in &report.failed {
                    log::error!("could not export {name}: {error}");
                }
                exported = report.exported;
            }

            let report = build_report(&session, &indices, exported)?;
            log::info!(
                "processed {} file(s) in {:.2}s",
                input.len(),
                start.elapsed().as_secs_f64()
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}

/// Explicit frequency, else the reference metadata, else the default.
fn resolve_frequency(explicit: Option<f64>, calibration: &Calibration) -> f64 {
    explicit
        .or_else(|| calibration.signal_attribute(FREQUENCY_ATTR))
        .filter(|f| *f > 0.0)
        .unwrap_or(DEFAULT_FREQUENCY_MHZ)
}

fn print_info(path: &Path, signal: &Signal) {
    let (samples, ny, nx) = signal.counts.dim();
    let totals = signal.total_counts();
    println!("File: {}", path.display());
    println!("Samples: {}", samples);
    println!("Image: {} x {} pixels", nx, ny);
    match signal.attr(FREQUENCY_ATTR) {
        Some(f) => println!("Frequency: {} MHz", f),
        None => println!("Frequency: not recorded (default {} MHz)", DEFAULT_FREQUENCY_MHZ),
    }
    println!("Total photons: {}", totals.sum());
    println!(
        "Brightest pixel: {} photons",
        totals.iter().copied().max().unwrap_or(0)
    );
}

fn build_report(
    session: &Session,
    indices: &[usize],
    exported: Vec<PathBuf>,
) -> Result<ProcessReport> {
    let mut datasets = Vec::with_capacity(indices.len());
    for &index in indices {
        let dataset = session.dataset(index)?;
        let mut features = Vec::with_capacity(Metric::HEADLINE.len());
        for metric in Metric::HEADLINE {
            let mut values = dataset.pixel_values(metric, 1)?;
            let stats = Stat::ALL
                .into_iter()
                .map(|stat| (stat, stat.reduce(&mut values)))
                .collect();
            features.push(FeatureRow { metric, stats });
        }
        datasets.push(DatasetReport {
            name: dataset.name().to_string(),
            display_name: dataset.display_name(),
            group: dataset.group().to_string(),
            color: dataset.color().to_string(),
            frequency: dataset.frequency(),
            calibration: session.calibration_status(index)?,
            pixels: dataset.mask().iter().filter(|&&k| k).count(),
            features,
        });
    }

    let group_median_avg_lifetime = session
        .pooled_by_group(indices, Metric::AvgLifetime)?
        .into_iter()
        .map(|(group, mut values)| (group, Stat::Median.reduce(&mut values)))
        .collect();

    Ok(ProcessReport {
        datasets,
        shared_settings: session.shared_filter_params(indices)?,
        group_median_avg_lifetime,
        exported,
    })
}

fn print_report(report: &ProcessReport) {
    for dataset in &report.datasets {
        println!();
        println!(
            "{} | {} MHz | {} pixels | calibration {:?}",
            dataset.display_name, dataset.frequency, dataset.pixels, dataset.calibration
        );
        print!("{:<14}", "metric");
        for stat in Stat::ALL {
            print!(" | {:<10}", stat);
        }
        println!();
        for row in &dataset.features {
            print!("{:<14}", row.metric);
            for stat in Stat::ALL {
                let value = row.stats.get(&stat).copied().unwrap_or(f64::NAN);
                print!(" | {:<10.4}", value);
            }
            println!();
        }
    }

    println!();
    for (attr, shared) in &report.shared_settings {
        match shared {
            Shared::Value(value) => println!("{}: {}", attr, value),
            Shared::Mixed => println!("{}: varies", attr),
        }
    }
    for (group, median) in &report.group_median_avg_lifetime {
        println!("group {}: median average lifetime {:.4} ns", group, median);
    }
    for path in &report.exported {
        println!("Wrote {}", path.display());
    }
}
