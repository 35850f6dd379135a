use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use irida_sample_uploader::app::App;
use irida_sample_uploader::config::{
    ConfigLoader, DEFAULT_CONFIG_PATH, DEFAULT_MAX_ATTEMPTS, DEFAULT_UPLOADER, ManifestSettings,
    RetryPolicy, ScanOptions, UploadSettings, expand_home,
};
use irida_sample_uploader::domain::{ProjectId, StrandTags};
use irida_sample_uploader::error::UploaderError;
use irida_sample_uploader::irida::{IridaClient, IridaHttpClient, ProjectSummary};
use irida_sample_uploader::output::{JsonOutput, LogSink, OutputMode, TextOutput};
use irida_sample_uploader::upload::SystemUploadRunner;

const EXIT_VALIDATION: u8 = 3;
const EXIT_DIRECTORY: u8 = 4;
const EXIT_REMOTE: u8 = 5;
const EXIT_ABANDONED: u8 = 6;

#[derive(Parser)]
#[command(name = "irida-upload")]
#[command(about = "Upload a directory of FASTQ files to IRIDA, sample by sample")]
#[command(version, author)]
struct Cli {
    /// Increase output verbosity
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Upload each sample separately, retrying failed attempts")]
    Upload(UploadArgs),
    #[command(about = "Write one sample sheet for the whole directory")]
    Manifest(ManifestArgs),
}

#[derive(Args, Clone)]
struct ScanArgs {
    /// Directory containing FASTQ files
    #[arg(short, long)]
    input_dir: Utf8PathBuf,

    /// Tag for R1 reads [default: _1. or _R1_]
    #[arg(short = '1', long)]
    for_tag: Option<String>,

    /// Tag for R2 reads [default: _2. or _R2_]
    #[arg(short = '2', long)]
    rev_tag: Option<String>,

    /// Where merged shard files are written
    #[arg(long)]
    work_dir: Option<Utf8PathBuf>,

    /// Do not concatenate four-shard samples
    #[arg(long)]
    no_merge: bool,

    /// Path to the IRIDA configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    irida_conf: PathBuf,
}

#[derive(Args, Clone)]
struct UploadArgs {
    #[command(flatten)]
    scan: ScanArgs,

    /// IRIDA project id
    #[arg(short, long)]
    project_id: ProjectId,

    /// Project name used to prefix short sample names [default: project id]
    #[arg(long)]
    project_name: Option<String>,

    /// Path to the upload_run.py script
    #[arg(short, long, default_value = DEFAULT_UPLOADER)]
    uploader: PathBuf,

    /// Try this many times each sample
    #[arg(short, long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    attempts: u32,

    /// Seconds to wait after the first failed attempt; grows linearly
    #[arg(long, default_value_t = 0)]
    retry_delay: u64,

    /// Upload samples even if the project already contains them
    #[arg(long)]
    no_dedup: bool,
}

#[derive(Args, Clone)]
struct ManifestArgs {
    #[command(flatten)]
    scan: ScanArgs,

    /// Project to look up or create [default: Basespace-<input dir name>]
    #[arg(long)]
    project_name: Option<String>,

    /// Sample sheet path [default: <tmp>/<project>-Samplesheet.csv]
    #[arg(short, long)]
    output: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<UploaderError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &UploaderError) -> u8 {
    match error {
        UploaderError::Validation(_) => EXIT_VALIDATION,
        UploaderError::Directory { .. } => EXIT_DIRECTORY,
        UploaderError::IridaHttp(_)
        | UploaderError::IridaStatus { .. }
        | UploaderError::AmbiguousProject { .. }
        | UploaderError::ConfigRead(_)
        | UploaderError::ConfigParse(_) => EXIT_REMOTE,
        UploaderError::InvalidTag(_) | UploaderError::InvalidProjectId(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Upload(args) => run_upload(args, output_mode),
        Commands::Manifest(args) => run_manifest(args, output_mode),
    }
}

fn scan_options(args: &ScanArgs) -> Result<ScanOptions, UploaderError> {
    Ok(ScanOptions {
        input_dir: args.input_dir.clone(),
        tags: StrandTags::with_overrides(args.for_tag.clone(), args.rev_tag.clone())?,
        merge_shards: !args.no_merge,
        work_dir: args.work_dir.clone(),
    })
}

fn run_upload(args: UploadArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let irida_conf = expand_home(&args.scan.irida_conf);
    let settings = UploadSettings {
        scan: scan_options(&args.scan)?,
        project_id: args.project_id,
        project_name: args.project_name,
        irida_conf: irida_conf.clone(),
        uploader: args.uploader,
        retry: RetryPolicy {
            max_attempts: args.attempts,
            base_delay: Duration::from_secs(args.retry_delay),
        },
        dedup: !args.no_dedup,
    };

    let remote = if settings.dedup {
        match ConfigLoader::resolve(&irida_conf).and_then(IridaHttpClient::new) {
            Ok(client) => Remote::Http(client),
            Err(err) => {
                warn!("sample deduplication disabled: {err}");
                Remote::Offline
            }
        }
    } else {
        Remote::Offline
    };

    let app = App::new(remote, SystemUploadRunner);
    let report = match output_mode {
        OutputMode::Json => {
            let report = app.upload(&settings, &JsonOutput)?;
            JsonOutput::print_upload(&report).into_diagnostic()?;
            report
        }
        OutputMode::Text => {
            let report = app.upload(&settings, &LogSink)?;
            TextOutput::print_upload(&report).into_diagnostic()?;
            report
        }
    };

    if report.has_abandoned() {
        return Ok(ExitCode::from(EXIT_ABANDONED));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_manifest(args: ManifestArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let config = ConfigLoader::resolve(&args.scan.irida_conf)?;
    let client = IridaHttpClient::new(config)?;
    let project_name = args
        .project_name
        .unwrap_or_else(|| ManifestSettings::default_project_name(&args.scan.input_dir));
    let settings = ManifestSettings {
        scan: scan_options(&args.scan)?,
        project_name,
        output: args.output,
    };

    let app = App::new(Remote::Http(client), SystemUploadRunner);
    match output_mode {
        OutputMode::Json => {
            let report = app.build_manifest(&settings, &JsonOutput)?;
            JsonOutput::print_manifest(&report).into_diagnostic()?;
        }
        OutputMode::Text => {
            let report = app.build_manifest(&settings, &LogSink)?;
            TextOutput::print_manifest(&report).into_diagnostic()?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// IRIDA access for the run; offline when no usable config was found.
enum Remote {
    Http(IridaHttpClient),
    Offline,
}

impl IridaClient for Remote {
    fn list_projects(&self) -> Result<Vec<ProjectSummary>, UploaderError> {
        match self {
            Remote::Http(client) => client.list_projects(),
            Remote::Offline => Err(UploaderError::IridaHttp(
                "IRIDA client not configured".to_string(),
            )),
        }
    }

    fn create_project(&self, name: &str, description: &str) -> Result<ProjectId, UploaderError> {
        match self {
            Remote::Http(client) => client.create_project(name, description),
            Remote::Offline => Err(UploaderError::IridaHttp(
                "IRIDA client not configured".to_string(),
            )),
        }
    }

    fn list_sample_names(&self, project: ProjectId) -> Result<Vec<String>, UploaderError> {
        match self {
            Remote::Http(client) => client.list_sample_names(project),
            Remote::Offline => Ok(Vec::new()),
        }
    }
}
