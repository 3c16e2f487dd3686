//! Cohort CLI - Command-line interface for Cohort Flux
//!
//! Commands:
//! - build: Build the labeled modeling table from survey records
//! - features: Split subjects and build train/test feature tables
//! - evaluate: Sweep decision thresholds over scored predictions
//! - validate: Validate survey record schema
//! - config: Print the default pipeline configuration
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cohort_flux::encoder::{TableEncoder, TablePayload};
use cohort_flux::schema::{RecordReader, SurveyRecord, SCHEMA_VERSION};
use cohort_flux::types::Partition;
use cohort_flux::{CohortProcessor, PanelError, PipelineConfig, PRODUCER_NAME, VERSION};

/// Cohort - Longitudinal survey panels to modeling-ready feature tables
#[derive(Parser)]
#[command(name = "cohort")]
#[command(version = VERSION)]
#[command(about = "Build labeled, leakage-free panels from survey records", long_about = None)]
struct Cli {
    /// Log pipeline progress (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the labeled modeling table
    Build {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,

        /// Pipeline configuration (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write cohort diagnostics to this file
        #[arg(long)]
        diagnostics: Option<PathBuf>,
    },

    /// Split subjects and build train/test feature tables
    Features {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Train feature table output path
        #[arg(long)]
        train_output: PathBuf,

        /// Test feature table output path
        #[arg(long)]
        test_output: PathBuf,

        /// Write the subject split to this file
        #[arg(long)]
        split_output: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,

        /// Pipeline configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Sweep thresholds over scored predictions ({"score", "label"} per line)
    Evaluate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Pipeline configuration supplying the threshold grid
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate survey record schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default pipeline configuration
    Config,

    /// Diagnose configuration and environment
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// Pretty-printed table payload
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

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

fn run(cli: Cli) -> Result<(), CohortCliError> {
    match cli.command {
        Commands::Build {
            input,
            output,
            input_format,
            output_format,
            config,
            diagnostics,
        } => cmd_build(
            &input,
            &output,
            input_format,
            output_format,
            config.as_deref(),
            diagnostics.as_deref(),
        ),
        Commands::Features {
            input,
            train_output,
            test_output,
            split_output,
            input_format,
            output_format,
            config,
        } => cmd_features(
            &input,
            &train_output,
            &test_output,
            split_output.as_deref(),
            input_format,
            output_format,
            config.as_deref(),
        ),
        Commands::Evaluate { input, config, json } => cmd_evaluate(&input, config.as_deref(), json),
        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),
        Commands::Config => cmd_config(),
        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn read_input(input: &Path) -> Result<String, CohortCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), CohortCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, CohortCliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn load_records(
    input: &Path,
    input_format: InputFormat,
) -> Result<Vec<SurveyRecord>, CohortCliError> {
    let data = read_input(input)?;
    let records = match input_format {
        InputFormat::Ndjson => RecordReader::parse_ndjson(&data)?,
        InputFormat::Json => RecordReader::parse_array(&data)?,
    };
    if records.is_empty() {
        return Err(CohortCliError::NoRecords);
    }
    Ok(records)
}

fn render(
    encoder: &TableEncoder,
    payload: &TablePayload,
    format: &OutputFormat,
) -> Result<String, CohortCliError> {
    Ok(match format {
        OutputFormat::Ndjson => encoder.to_ndjson(payload)?,
        OutputFormat::JsonPretty => encoder.to_json(payload)?,
    })
}

fn cmd_build(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
    diagnostics: Option<&Path>,
) -> Result<(), CohortCliError> {
    let processor = CohortProcessor::new(load_config(config)?)?;
    let records = load_records(input, input_format)?;
    let build = processor.build_cohort(records)?;

    if let Some(path) = diagnostics {
        fs::write(path, serde_json::to_string_pretty(&build.diagnostics)?)?;
    }

    let encoder = TableEncoder::new();
    let payload = encoder.encode_modeling(&build.rows);
    write_output(output, &render(&encoder, &payload, &output_format)?)
}

fn cmd_features(
    input: &Path,
    train_output: &Path,
    test_output: &Path,
    split_output: Option<&Path>,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
) -> Result<(), CohortCliError> {
    let processor = CohortProcessor::new(load_config(config)?)?;
    let records = load_records(input, input_format)?;
    let build = processor.build_cohort(records)?;
    if build.rows.is_empty() {
        return Err(CohortCliError::EmptyCohort);
    }

    let split = processor.split(&build.rows)?;
    let features = processor.build_features(build.rows, &split)?;

    if let Some(path) = split_output {
        fs::write(path, serde_json::to_string_pretty(&features.split)?)?;
    }

    // one run id shared by both partitions
    let encoder = TableEncoder::new();
    let train = encoder.encode_features(&features.train, Partition::Train);
    let test = encoder.encode_features(&features.test, Partition::Test);
    write_output(train_output, &render(&encoder, &train, &output_format)?)?;
    write_output(test_output, &render(&encoder, &test, &output_format)?)
}

#[derive(Deserialize)]
struct ScoredLabel {
    score: f64,
    label: u8,
}

fn cmd_evaluate(input: &Path, config: Option<&Path>, json: bool) -> Result<(), CohortCliError> {
    let processor = CohortProcessor::new(load_config(config)?)?;
    let data = read_input(input)?;

    let mut scores = Vec::new();
    let mut labels = Vec::new();
    for (line_num, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row: ScoredLabel = serde_json::from_str(trimmed).map_err(|e| {
            CohortCliError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
        })?;
        scores.push(row.score);
        labels.push(row.label);
    }
    if scores.is_empty() {
        return Err(CohortCliError::NoRecords);
    }

    let report = processor.evaluate(&scores, &labels)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Threshold Sweep");
        println!("===============");
        println!(
            "Positives: {}  Negatives: {}  Prevalence: {:.3}",
            report.positives, report.negatives, report.prevalence
        );
        println!();
        println!("threshold  precision  recall  f1");
        for m in &report.metrics {
            println!(
                "{:>9.2}  {:>9.3}  {:>6.3}  {:.3}{}",
                m.threshold,
                m.precision,
                m.recall,
                m.f1,
                if m.degenerate { "  (degenerate)" } else { "" }
            );
        }
        if let Some(best) = &report.best {
            println!();
            println!("Best threshold: {:.2} (F1 {:.3})", best.threshold, best.f1);
        }
    }
    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), CohortCliError> {
    let data = read_input(input)?;

    // Parse without validating so every bad record is reported
    let records: Vec<SurveyRecord> = match input_format {
        InputFormat::Json => serde_json::from_str(&data)?,
        InputFormat::Ndjson => data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(line_num, line)| {
                serde_json::from_str::<SurveyRecord>(line.trim()).map_err(|e| {
                    CohortCliError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>, CohortCliError>>()?,
    };

    let results = RecordReader::validate_records(&records);
    let report = ValidationReport {
        total_records: records.len(),
        valid_records: records.len() - results.len(),
        invalid_records: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                subject_id: r.subject_id.clone(),
                error: r.result.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Subject {} (index {}): {}", err.subject_id, err.index, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(CohortCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_config() -> Result<(), CohortCliError> {
    println!("{}", PipelineConfig::default().to_json()?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), CohortCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("cohort-flux version {}", VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    if let Some(path) = config {
        let check = if !path.exists() {
            DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist; defaults will be used".to_string(),
            }
        } else {
            match fs::read_to_string(path) {
                Ok(content) => match PipelineConfig::from_json(&content) {
                    Ok(loaded) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Config valid ({} item rules, {} composites)",
                            loaded.items.len(),
                            loaded.composites.len()
                        ),
                    },
                    Err(e) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid config: {}", e),
                    },
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read config file: {}", e),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Cohort Doctor Report");
        println!("====================");
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CohortCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum CohortCliError {
    Io(io::Error),
    Panel(PanelError),
    Json(serde_json::Error),
    NoRecords,
    EmptyCohort,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for CohortCliError {
    fn from(e: io::Error) -> Self {
        CohortCliError::Io(e)
    }
}

impl From<PanelError> for CohortCliError {
    fn from(e: PanelError) -> Self {
        CohortCliError::Panel(e)
    }
}

impl From<serde_json::Error> for CohortCliError {
    fn from(e: serde_json::Error) -> Self {
        CohortCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

fn panel_error(e: PanelError) -> CliError {
    let (code, hint) = match &e {
        PanelError::UnknownItem(_)
        | PanelError::InvalidConfig(_)
        | PanelError::UnknownColumn(_) => {
            ("CONFIG_ERROR", "Run 'cohort doctor --config <file>' for details")
        }
        PanelError::DuplicateRound { .. } => {
            ("DUPLICATE_ROUND", "Each subject may report a round only once")
        }
        PanelError::ParseError(_) | PanelError::JsonError(_) => {
            ("PARSE_ERROR", "Ensure input matches survey.record.v1 schema")
        }
        PanelError::LengthMismatch { .. } | PanelError::InvalidScore { .. } => {
            ("EVALUATION_ERROR", "Scores must be in [0, 1] with one label per score")
        }
        PanelError::SplitOverlap { .. } => ("SPLIT_ERROR", "Check subject ids for duplicates"),
        PanelError::ModelError(_) => ("MODEL_ERROR", "Check the model collaborator output"),
        PanelError::EmptyInput(_) => {
            ("EMPTY_INPUT", "Provide more subjects or relax the inclusion policy")
        }
    };
    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: Some(hint.to_string()),
    }
}

impl From<CohortCliError> for CliError {
    fn from(e: CohortCliError) -> Self {
        match e {
            CohortCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CohortCliError::Panel(e) => panel_error(e),
            CohortCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CohortCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            CohortCliError::EmptyCohort => CliError {
                code: "EMPTY_COHORT".to_string(),
                message: "No subjects survived the inclusion policy".to_string(),
                hint: Some("Run 'cohort build --diagnostics <file>' to see exclusions".to_string()),
            },
            CohortCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            CohortCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            CohortCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    index: usize,
    subject_id: String,
    error: String,
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
