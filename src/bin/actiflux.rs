//! Actiflux CLI - Command-line interface for Actigraphy Flux
//!
//! Commands:
//! - features: Build the daily feature corpus (batch mode)
//! - join: Build the corpus and join it with clinical labels
//! - scan: List subjects discovered in a corpus directory
//! - doctor: Diagnose corpus layout and configuration
//! - schema: Print input and output column schemas

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use actigraphy_flux::labels::{DEFAULT_ID_COLUMN, DEFAULT_SCORE_COLUMN, SEVERITY_THRESHOLDS};
use actigraphy_flux::schema::REQUIRED_COLUMNS;
use actigraphy_flux::{
    BatchFeatureBuilder, BatchOutcome, BatchReport, LabelJoiner, LabelSource, LabelTable,
    PipelineConfig, PipelineError, SubjectCorpusScanner, FLUX_VERSION, PRODUCER_NAME,
};

/// Actiflux - Daily behavioral features from actigraphy recordings
#[derive(Parser)]
#[command(name = "actiflux")]
#[command(author = "Synheart AI Inc")]
#[command(version = FLUX_VERSION)]
#[command(about = "Reduce actigraphy recordings into daily feature rows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the daily feature corpus
    Features {
        #[command(flatten)]
        corpus: CorpusArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Build the corpus and inner-join it with clinical labels
    Join {
        #[command(flatten)]
        corpus: CorpusArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Label CSV path (overrides the config file)
        #[arg(long)]
        labels: Option<PathBuf>,

        /// Subject id column of the label CSV
        #[arg(long)]
        id_column: Option<String>,

        /// Total score column of the label CSV
        #[arg(long)]
        score_column: Option<String>,
    },

    /// List subjects discovered in the corpus
    Scan {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose corpus layout and configuration
    Doctor {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Label CSV to check
        #[arg(long)]
        labels: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Args)]
struct CorpusArgs {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Corpus directory (one `id=<subject>` partition per subject)
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    /// Worker threads (0 = one per core, 1 = sequential)
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct OutputArgs {
    /// Output file path (use - for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Output format
    #[arg(long, default_value = "ndjson")]
    format: OutputFormat,

    /// Write the batch report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// JSON array of rows
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Comma-separated values with a header row
    Csv,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Raw series columns
    Input,
    /// Daily feature columns
    Output,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliCommandError> {
    match cli.command {
        Commands::Features { corpus, output } => cmd_features(&corpus, &output),

        Commands::Join {
            corpus,
            output,
            labels,
            id_column,
            score_column,
        } => cmd_join(&corpus, &output, labels, id_column, score_column),

        Commands::Scan { corpus, json } => cmd_scan(&corpus, json),

        Commands::Doctor {
            corpus,
            labels,
            json,
        } => cmd_doctor(&corpus, labels.as_deref(), json),

        Commands::Schema { schema_type } => {
            cmd_schema(schema_type);
            Ok(())
        }
    }
}

fn resolve_config(args: &CorpusArgs) -> Result<PipelineConfig, CliCommandError> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(base_dir) = &args.base_dir {
        config.base_dir = base_dir.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    config.validate()?;
    Ok(config)
}

fn cmd_features(corpus: &CorpusArgs, output: &OutputArgs) -> Result<(), CliCommandError> {
    let config = resolve_config(corpus)?;
    let outcome = build_corpus(&config, output.report.as_deref())?;

    let data = format_rows(outcome.corpus.rows(), &output.format)?;
    write_output(&output.output, &data)
}

fn cmd_join(
    corpus: &CorpusArgs,
    output: &OutputArgs,
    labels: Option<PathBuf>,
    id_column: Option<String>,
    score_column: Option<String>,
) -> Result<(), CliCommandError> {
    let config = resolve_config(corpus)?;

    let mut source = match (labels, &config.labels) {
        (Some(path), _) => LabelSource::new(path),
        (None, Some(source)) => source.clone(),
        (None, None) => return Err(CliCommandError::NoLabels),
    };
    if let Some(id_column) = id_column {
        source.id_column = id_column;
    }
    if let Some(score_column) = score_column {
        source.score_column = score_column;
    }

    // Fail on a bad label file before spending time on the corpus
    let label_table = LabelTable::from_csv_path(&source)?;

    let outcome = build_corpus(&config, output.report.as_deref())?;

    let joined = LabelJoiner::join(&outcome.corpus, &label_table);
    if joined.dropped_feature_rows > 0 {
        eprintln!(
            "Dropped {} feature rows from {} unlabeled subjects",
            joined.dropped_feature_rows,
            joined.unlabeled_subjects.len()
        );
    }
    if joined.rows.is_empty() {
        return Err(CliCommandError::EmptyJoin);
    }

    let data = format_rows(&joined.rows, &output.format)?;
    write_output(&output.output, &data)
}

fn cmd_scan(corpus: &CorpusArgs, json: bool) -> Result<(), CliCommandError> {
    let config = resolve_config(corpus)?;
    let scanner = SubjectCorpusScanner::new(&config.base_dir, config.layout.clone());
    let partitions = scanner.discover()?;

    if json {
        let listing = ScanListing {
            base_dir: config.base_dir.clone(),
            subjects: partitions
                .iter()
                .map(|p| ScanEntry {
                    id: p.subject_id.to_string(),
                    series_path: p.series_path.clone(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for partition in &partitions {
            println!("{}", partition.subject_id);
        }
        eprintln!("{} subjects", partitions.len());
    }

    Ok(())
}

fn cmd_doctor(
    corpus: &CorpusArgs,
    labels: Option<&Path>,
    json: bool,
) -> Result<(), CliCommandError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "flux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Flux version {}", FLUX_VERSION),
    });

    let config = match resolve_config(corpus) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Layout {}<subject>/{}",
                    config.layout.partition_prefix, config.layout.series_file_name
                ),
            });
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            });
            None
        }
    };

    if let Some(config) = &config {
        let scanner = SubjectCorpusScanner::new(&config.base_dir, config.layout.clone());
        let check = match scanner.discover() {
            Ok(partitions) if partitions.is_empty() => DoctorCheck {
                name: "corpus".to_string(),
                status: CheckStatus::Warning,
                message: format!("No subject partitions in {}", config.base_dir.display()),
            },
            Ok(partitions) => DoctorCheck {
                name: "corpus".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "{} subject partitions in {}",
                    partitions.len(),
                    config.base_dir.display()
                ),
            },
            Err(e) => DoctorCheck {
                name: "corpus".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        };
        checks.push(check);
    }

    let label_source = labels
        .map(LabelSource::new)
        .or_else(|| config.as_ref().and_then(|c| c.labels.clone()));

    if let Some(source) = label_source {
        let check = match LabelTable::from_csv_path(&source) {
            Ok(table) => DoctorCheck {
                name: "labels".to_string(),
                status: if table.is_empty() {
                    CheckStatus::Warning
                } else {
                    CheckStatus::Ok
                },
                message: format!(
                    "{} labeled subjects, {} rows without score",
                    table.len(),
                    table.unscored_rows()
                ),
            },
            Err(e) => DoctorCheck {
                name: "labels".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        };
        checks.push(check);
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Actiflux Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CliCommandError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType) {
    match schema_type {
        SchemaType::Input => {
            println!("Input Schema: one Parquet file per subject partition");
            println!();
            println!("Required columns (first matching source name is used):");
            for column in REQUIRED_COLUMNS {
                println!(
                    "  - {:<14} {:?} <- {}",
                    column.name,
                    column.kind,
                    column.sources.join(" | ")
                );
            }
            println!();
            println!("Rows with a non-zero non_wear_flag are excluded from every statistic.");
        }
        SchemaType::Output => {
            println!("Output Schema: one row per subject per day");
            println!();
            println!("- id: subject id as named by its partition (matched case- and zero-insensitively)");
            println!("- day: relative day index");
            println!("- mean_enmo, total_enmo: movement intensity");
            println!("- mean_light, max_light: ambient light");
            println!("- mean_anglez: device orientation");
            println!("- total_samples: worn samples in the day");
            println!("- night_samples: worn samples between 22:00 and 07:00");
            println!("- percent_night_activity: night_samples / total_samples");
            println!();
            println!(
                "The join command adds total_score ({} / {}) and sii (<= {} -> 0, <= {} -> 1, <= {} -> 2, else 3).",
                DEFAULT_ID_COLUMN,
                DEFAULT_SCORE_COLUMN,
                SEVERITY_THRESHOLDS[0],
                SEVERITY_THRESHOLDS[1],
                SEVERITY_THRESHOLDS[2]
            );
        }
    }
}

// Helper functions

/// Run the batch, reporting skipped subjects even when no row was produced
fn build_corpus(
    config: &PipelineConfig,
    report_path: Option<&Path>,
) -> Result<BatchOutcome, CliCommandError> {
    match BatchFeatureBuilder::from_config(config).build() {
        Ok(outcome) => {
            print_skipped(&outcome.report);
            write_report(&outcome.report, report_path)?;
            Ok(outcome)
        }
        Err(PipelineError::EmptyCorpusError { report }) => {
            print_skipped(&report);
            write_report(&report, report_path)?;
            Err(PipelineError::EmptyCorpusError { report }.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_skipped(report: &BatchReport) {
    if report.skipped_count() == 0 {
        return;
    }

    eprintln!("Skipped {} subjects:", report.skipped_count());
    for failure in &report.failures {
        eprintln!("  - {}: {}", failure.subject_id, failure.reason);
    }
    for subject in &report.cancelled {
        eprintln!("  - {}: cancelled", subject);
    }
}

fn write_report(report: &BatchReport, path: Option<&Path>) -> Result<(), CliCommandError> {
    if let Some(path) = path {
        fs::write(path, serde_json::to_string_pretty(report)?)?;
    }
    Ok(())
}

fn format_rows<T: Serialize>(rows: &[T], format: &OutputFormat) -> Result<String, CliCommandError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::with_capacity(rows.len());
            for row in rows {
                lines.push(serde_json::to_string(row)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(rows)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(rows)?),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for row in rows {
                writer.serialize(row)?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| CliCommandError::Csv(e.into_error().into()))?;
            String::from_utf8(bytes).map_err(|e| CliCommandError::Io(io::Error::other(e)))
        }
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), CliCommandError> {
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        stdout.write_all(data.as_bytes())?;
        stdout.flush()?;
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum CliCommandError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
    Csv(csv::Error),
    NoLabels,
    EmptyJoin,
    DoctorFailed,
}

impl From<io::Error> for CliCommandError {
    fn from(e: io::Error) -> Self {
        CliCommandError::Io(e)
    }
}

impl From<PipelineError> for CliCommandError {
    fn from(e: PipelineError) -> Self {
        CliCommandError::Pipeline(e)
    }
}

impl From<serde_json::Error> for CliCommandError {
    fn from(e: serde_json::Error) -> Self {
        CliCommandError::Json(e)
    }
}

impl From<csv::Error> for CliCommandError {
    fn from(e: csv::Error) -> Self {
        CliCommandError::Csv(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CliCommandError> for CliError {
    fn from(e: CliCommandError) -> Self {
        match e {
            CliCommandError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CliCommandError::Pipeline(e) => pipeline_error(e),
            CliCommandError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CliCommandError::Csv(e) => CliError {
                code: "CSV_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CliCommandError::NoLabels => CliError {
                code: "NO_LABELS".to_string(),
                message: "No label source configured".to_string(),
                hint: Some("Pass --labels or set labels.path in the config file".to_string()),
            },
            CliCommandError::EmptyJoin => CliError {
                code: "EMPTY_JOIN".to_string(),
                message: "No feature rows matched a label".to_string(),
                hint: Some("Check that label ids match the corpus partition names".to_string()),
            },
            CliCommandError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

fn pipeline_error(e: PipelineError) -> CliError {
    let (code, hint) = match &e {
        PipelineError::NotFoundError(_) => ("NOT_FOUND", Some("Pass --base-dir or set base_dir")),
        PipelineError::ScanError(_) => (
            "DUPLICATE_SUBJECT",
            Some("Two partitions map to the same subject id; remove one"),
        ),
        PipelineError::EmptyCorpusError { .. } => (
            "EMPTY_CORPUS",
            Some("Run with RUST_LOG=warn to see why subjects were skipped"),
        ),
        PipelineError::ReadError { .. } => ("READ_ERROR", None),
        PipelineError::SchemaError { .. } => ("SCHEMA_ERROR", Some("Run 'actiflux schema input'")),
        PipelineError::IoError(_) => ("IO_ERROR", Some("Check file paths and permissions")),
        PipelineError::JsonError(_) => ("JSON_ERROR", Some("Check the config file syntax")),
        PipelineError::LabelError(_) => ("LABEL_ERROR", Some("Check --id-column and --score-column")),
        PipelineError::ConfigError(_) => ("CONFIG_ERROR", None),
    };

    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: hint.map(str::to_string),
    }
}

// Report types

#[derive(Serialize)]
struct ScanListing {
    base_dir: PathBuf,
    subjects: Vec<ScanEntry>,
}

#[derive(Serialize)]
struct ScanEntry {
    id: String,
    series_path: PathBuf,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
