// main.rs

use anyhow::{anyhow, Error, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info};
use rayon::prelude::*;
use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use qc_pca::output_writer;
use qc_pca::workflow::{self, ScoreReport};
use qc_pca::{AngleUnit, CovarianceOptions, FeatureSource, FeatureTable, InputFormat, ReferenceSnapshot};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting qc_pca with args: {:?}", cli_args);

    // Configure Rayon thread pool
    let num_threads = cli_args.threads.unwrap_or_else(num_cpus::get);
    info!("Using {} threads for parallel operations.", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    let precision = cli_args.precision;
    match &cli_args.command {
        cli::Command::Store {
            reference,
            format,
            correlation,
            snapshot,
        } => run_store(reference, (*format).into(), *correlation, snapshot)?,
        cli::Command::Score {
            snapshot,
            tests,
            format,
            components,
            output_prefix,
        } => run_score(snapshot, tests, (*format).into(), *components, output_prefix, precision)?,
        cli::Command::Analyze {
            input,
            format,
            correlation,
            components,
            output_prefix,
        } => run_analyze(input, (*format).into(), *correlation, *components, output_prefix, precision)?,
        cli::Command::Angle {
            reference,
            test,
            format,
            unit,
            output_prefix,
        } => {
            let unit: AngleUnit = unit.parse()?;
            run_angle(reference, test, (*format).into(), unit, output_prefix, precision)?
        }
    }

    info!(
        "qc_pca finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

fn read_table(path: &Path, format: InputFormat) -> Result<FeatureTable> {
    let table = format
        .reader(path)
        .read_table()
        .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
    info!(
        "Read {} units x {} features from {}.",
        table.n_units(),
        table.n_features(),
        path.display()
    );
    debug!("Feature labels (first 5): {:?}", table.labels().iter().take(5).collect::<Vec<_>>());
    Ok(table)
}

fn run_store(reference: &Path, format: InputFormat, correlation: bool, snapshot_path: &Path) -> Result<()> {
    let table = read_table(reference, format)?;
    let snapshot = workflow::store_reference(&table, correlation)?;
    output_writer::ensure_output_dir(&snapshot_path.to_string_lossy())?;
    snapshot
        .write_to_path(snapshot_path)
        .map_err(|e| anyhow!("Failed to write snapshot {}: {}", snapshot_path.display(), e))?;
    info!(
        "Stored reference snapshot ({} features, {} components) at {}.",
        snapshot.n_features(),
        snapshot.eigen().len(),
        snapshot_path.display()
    );
    Ok(())
}

fn run_score(
    snapshot_path: &Path,
    tests: &[PathBuf],
    format: InputFormat,
    components: Option<usize>,
    output_prefix: &str,
    precision: usize,
) -> Result<()> {
    let snapshot = ReferenceSnapshot::read_from_path(snapshot_path)
        .map_err(|e| anyhow!("Failed to read snapshot {}: {}", snapshot_path.display(), e))?;
    output_writer::ensure_output_dir(output_prefix)?;

    info!("Scoring {} test file(s) in parallel...", tests.len());
    let pb_style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) ETA: {eta}",
        )
        .map_err(|e| anyhow!("Failed to create progress bar style: {}", e))?
        .progress_chars("=> ");
    let pb = ProgressBar::new(tests.len() as u64).with_style(pb_style);

    let results: Vec<Result<ScoreReport>> = tests
        .par_iter()
        .map(|path| {
            let result = read_table(path, format).and_then(|table| {
                workflow::score_against_reference(&snapshot, &table, components).map_err(Error::from)
            });
            pb.inc(1);
            result
        })
        .collect();
    pb.finish_with_message("Scoring complete.");

    let mut reports = Vec::with_capacity(results.len());
    let mut scoring_errors: Vec<Error> = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(report) => reports.push((i, report)),
            Err(e) => scoring_errors.push(anyhow!("Error scoring {}: {}", tests[i].display(), e)),
        }
    }
    if !scoring_errors.is_empty() {
        for err in scoring_errors {
            error!("{}", err);
        }
        return Err(anyhow!("Failed to score one or more test files. See errors above."));
    }

    for (i, report) in reports {
        let suffix = if tests.len() == 1 {
            "scores.csv".to_string()
        } else {
            let stem = tests[i]
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("test{}", i + 1));
            format!("{}.scores.csv", stem)
        };
        output_writer::write_pc_scores(
            output_prefix,
            &suffix,
            &report.unit_ids,
            &report.scores,
            report.limit_violations.as_deref(),
            precision,
        )?;
    }
    Ok(())
}

fn run_analyze(
    input: &Path,
    format: InputFormat,
    correlation: bool,
    components: Option<usize>,
    output_prefix: &str,
    precision: usize,
) -> Result<()> {
    let table = read_table(input, format)?;
    let options = CovarianceOptions::default().correlation(correlation);
    let analysis = workflow::analyze(&table, &options, components)?;

    output_writer::ensure_output_dir(output_prefix)?;
    output_writer::write_pc_scores(
        output_prefix,
        "scores.csv",
        &analysis.unit_ids,
        &analysis.scores,
        analysis.limit_violations.as_deref(),
        precision,
    )?;
    output_writer::write_variance(
        output_prefix,
        analysis.eigen.values(),
        &analysis.variance_curve,
        precision,
    )?;
    Ok(())
}

fn run_angle(
    reference: &Path,
    test: &Path,
    format: InputFormat,
    unit: AngleUnit,
    output_prefix: &str,
    precision: usize,
) -> Result<()> {
    let reference_table = read_table(reference, format)?;
    let test_table = read_table(test, format)?;
    let angles = workflow::hmethod_angles(&test_table, &reference_table, unit)?;

    output_writer::ensure_output_dir(output_prefix)?;
    output_writer::write_angles(output_prefix, test_table.unit_ids(), &angles, unit, precision)?;
    Ok(())
}

mod cli {
    use std::path::PathBuf;
    use clap::{Parser, Subcommand, ValueEnum};
    use qc_pca::InputFormat;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "PCA and H-Method quality checks for vibration test data.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        #[command(subcommand)]
        pub(crate) command: Command,

        #[arg(short = 't', long, global = true)]
        pub(crate) threads: Option<usize>,

        #[arg(long, global = true, default_value = "Info")]
        pub(crate) log_level: String,

        /// Decimal places in output tables.
        #[arg(long, global = true, default_value_t = 6)]
        pub(crate) precision: usize,
    }

    #[derive(Subcommand, Debug)]
    pub(crate) enum Command {
        /// Fit a reference snapshot to known-good units.
        Store {
            #[arg(short, long, required = true)]
            reference: PathBuf,

            #[arg(short, long, value_enum, default_value_t = DataFormat::Ascii)]
            format: DataFormat,

            #[arg(long)]
            correlation: bool,

            #[arg(short, long, required = true)]
            snapshot: PathBuf,
        },
        /// Score test units against a stored snapshot.
        Score {
            #[arg(short, long, required = true)]
            snapshot: PathBuf,

            #[arg(required = true, num_args = 1..)]
            tests: Vec<PathBuf>,

            #[arg(short, long, value_enum, default_value_t = DataFormat::Ascii)]
            format: DataFormat,

            #[arg(short = 'k', long)]
            components: Option<usize>,

            #[arg(short, long = "out", required = true)]
            output_prefix: String,
        },
        /// PCA of one population against itself.
        Analyze {
            #[arg(short, long, required = true)]
            input: PathBuf,

            #[arg(short, long, value_enum, default_value_t = DataFormat::Ascii)]
            format: DataFormat,

            #[arg(long)]
            correlation: bool,

            #[arg(short = 'k', long)]
            components: Option<usize>,

            #[arg(short, long = "out", required = true)]
            output_prefix: String,
        },
        /// H-Method angle of each test unit against a reference population.
        Angle {
            #[arg(short, long, required = true)]
            reference: PathBuf,

            #[arg(long, required = true)]
            test: PathBuf,

            #[arg(short, long, value_enum, default_value_t = DataFormat::Ascii)]
            format: DataFormat,

            /// "d" for degrees, "r" for radians.
            #[arg(short, long, default_value = "d")]
            unit: String,

            #[arg(short, long = "out", required = true)]
            output_prefix: String,
        },
    }

    #[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum DataFormat {
        /// Test-case data (ASCII) export.
        Ascii,
        /// Unit-data export.
        Unit,
    }

    impl From<DataFormat> for InputFormat {
        fn from(format: DataFormat) -> Self {
            match format {
                DataFormat::Ascii => InputFormat::AsciiTestCase,
                DataFormat::Unit => InputFormat::UnitData,
            }
        }
    }
}
