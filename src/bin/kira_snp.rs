use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_snp_harvester::app::{
    App, CountResult, DownloadOptions, DownloadResult, ProgressSink, TotalResult,
};
use kira_snp_harvester::config::{Config, ConfigLoader, ResolvedConfig};
use kira_snp_harvester::domain::{PageRequest, SearchCursor};
use kira_snp_harvester::error::HarvestError;
use kira_snp_harvester::eutils::{CursorResolver, EutilsHttpClient, PageFetcher};
use kira_snp_harvester::harvest::HarvestOutcome;
use kira_snp_harvester::output::{JsonOutput, OutputMode, TextOutput};
use kira_snp_harvester::store::Store;

const PARTIAL_EXIT: u8 = 4;

#[derive(Parser)]
#[command(name = "kira-snp")]
#[command(about = "Resumable dbSNP harvester and flanking-dinucleotide counter")]
#[command(version, author)]
struct Cli {
    /// Print JSON results on stdout; progress goes to the log on stderr
    /// (level `info` unless RUST_LOG is set)
    #[arg(long, global = true)]
    non_interactive: bool,

    /// JSON config file (default: ./kira-snp.json, then the user config dir)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download (or resume) the raw records of one allele")]
    Download(DownloadArgs),
    #[command(about = "Count flanking dinucleotides of one downloaded allele")]
    Count(DatasetArgs),
    #[command(about = "Merge counts of every downloaded allele into a total report")]
    Total(TotalArgs),
}

#[derive(Args, Clone, Default)]
struct DatasetArgs {
    /// IUPAC allele code, e.g. Y or R
    #[arg(long)]
    allele: Option<String>,

    /// Entrez database; `OMIM` selects OMIM-filtered dbSNP
    #[arg(long)]
    database: Option<String>,

    #[arg(long)]
    omim: bool,

    #[arg(long)]
    output_dir: Option<String>,
}

#[derive(Args, Clone)]
struct DownloadArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Entrez query replacing the default term
    #[arg(long)]
    term: Option<String>,

    #[arg(long)]
    email: Option<String>,

    #[arg(long)]
    page_size: Option<u64>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Discard an existing raw file instead of resuming it
    #[arg(long)]
    fresh: bool,
}

#[derive(Args, Clone)]
struct TotalArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    #[arg(long)]
    workers: Option<usize>,
}

// `HarvestError` must reach the report through `?` (not `into_diagnostic`)
// for the downcast below to match.
fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<HarvestError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_)
        | HarvestError::InvalidAllele(_)
        | HarvestError::NoDatasets(_) => 2,
        HarvestError::EutilsHttp(_)
        | HarvestError::EutilsStatus { .. }
        | HarvestError::SearchResponse(_)
        | HarvestError::BatchTimeout { .. }
        | HarvestError::BatchTransport { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<u8> {
    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    tracing_subscriber::fmt()
        .with_env_filter(default_filter(output_mode))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Download(args) => {
            let overrides = Config {
                term: args.term,
                email: args.email,
                page_size: args.page_size,
                timeout_secs: args.timeout_secs,
                ..dataset_overrides(&args.dataset)
            };
            let resolved = ConfigLoader::resolve_with(config_path, overrides)?;
            run_download(&resolved, DownloadOptions { fresh: args.fresh }, output_mode)
        }
        Commands::Count(args) => {
            let resolved = ConfigLoader::resolve_with(config_path, dataset_overrides(&args))?;
            let app = App::new(Store::new(resolved.output_dir.clone()), NopEutils, NopEutils);
            let result = app.count(&resolved.dataset, sink(output_mode))?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_count(&result).into_diagnostic()?,
                OutputMode::Interactive => print_count_summary(&result),
            }
            Ok(0)
        }
        Commands::Total(args) => {
            let overrides = Config {
                workers: args.workers,
                ..dataset_overrides(&args.dataset)
            };
            let resolved = ConfigLoader::resolve_with(config_path, overrides)?;
            let app = App::new(Store::new(resolved.output_dir.clone()), NopEutils, NopEutils);
            let result = app.total(&resolved.dataset.label(), resolved.workers, sink(output_mode))?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_total(&result).into_diagnostic()?,
                OutputMode::Interactive => print_total_summary(&result),
            }
            Ok(0)
        }
    }
}

/// `RUST_LOG` wins; otherwise non-interactive runs log per-page progress at
/// `info`, since their progress sink prints nothing.
fn default_filter(output_mode: OutputMode) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(output_mode)))
}

fn default_directive(output_mode: OutputMode) -> &'static str {
    match output_mode {
        OutputMode::NonInteractive => "info",
        OutputMode::Interactive => "warn",
    }
}

fn dataset_overrides(args: &DatasetArgs) -> Config {
    Config {
        allele: args.allele.clone(),
        database: args.database.clone(),
        omim: args.omim.then_some(true),
        output_dir: args.output_dir.clone(),
        ..Config::default()
    }
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &TextOutput,
    }
}

fn run_download(
    resolved: &ResolvedConfig,
    options: DownloadOptions,
    output_mode: OutputMode,
) -> miette::Result<u8> {
    let client = EutilsHttpClient::new(resolved.eutils.clone())?;
    let app = App::new(
        Store::new(resolved.output_dir.clone()),
        client.clone(),
        client,
    );
    let result = app.download(resolved, options, sink(output_mode))?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_download(&result).into_diagnostic()?,
        OutputMode::Interactive => print_download_summary(&result),
    }
    Ok(if result.report.is_complete() {
        0
    } else {
        PARTIAL_EXIT
    })
}

fn print_download_summary(result: &DownloadResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}kira-snp download: {} {}{reset}", result.label, result.allele);
    println!(
        "  esearch: {} records (QueryKey {}, WebEnv {})",
        result.cursor.count, result.cursor.key, result.cursor.env
    );
    println!(
        "  pages fetched: {}, timeouts retried: {}",
        result.report.pages_fetched, result.report.timeouts
    );
    match &result.report.outcome {
        HarvestOutcome::Complete => println!(
            "{green}  complete: {} lines in {}{reset}",
            result.lines_after, result.report.output_path
        ),
        HarvestOutcome::Partial { offset, message } => {
            println!(
                "{yellow}  stopped at offset {offset}: {message}{reset}"
            );
            println!(
                "{yellow}  believed downloaded {} of {}; {} lines in {}. Re-run to resume.{reset}",
                result.report.believed_downloaded,
                result.report.expected,
                result.lines_after,
                result.report.output_path
            );
        }
    }
}

fn print_count_summary(result: &CountResult) {
    println!(
        "kira-snp count: {} {} ({} lines) -> {} and {}",
        result.label,
        result.allele,
        result.table.total(),
        result.report_path,
        result.json_path
    );
}

fn print_total_summary(result: &TotalResult) {
    println!(
        "kira-snp total: {} datasets ({} lines) -> {}",
        result.files.len(),
        result.total.total(),
        result.report_path
    );
    for file in &result.files {
        println!("  {} {} ({} lines)", file.allele, file.path, file.table.total());
    }
    if !result.skipped.is_empty() {
        println!("  {} other files ignored", result.skipped.len());
    }
}

/// Stands in for the network when a command works on local files only.
struct NopEutils;

impl CursorResolver for NopEutils {
    fn search(&self, _database: &str, _term: &str) -> Result<SearchCursor, HarvestError> {
        Err(HarvestError::EutilsHttp(
            "E-utilities client not configured".to_string(),
        ))
    }
}

impl PageFetcher for NopEutils {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<String, HarvestError> {
        Err(HarvestError::BatchTransport {
            offset: request.offset,
            status: None,
            message: "E-utilities client not configured".to_string(),
        })
    }
}
