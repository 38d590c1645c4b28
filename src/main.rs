use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cbr_stats::config::Config;
use cbr_stats::importers::archiver::{DEFAULT_ARCHIVE_NAME, DEFAULT_SERIES_URLS};
use cbr_stats::importers::{CbrDownloader, LayoutRecipe};
use cbr_stats::locator::IndexLocator;
use cbr_stats::names::{NameNormalizer, NormalizeOptions};
use cbr_stats::services::{ArchiveService, EscrowService, PipelineOptions, PipelineReport};

#[derive(Parser)]
#[command(name = "cbr-stats")]
#[command(about = "Collect Bank of Russia statistics spreadsheets into pivot workbooks", long_about = None)]
struct Cli {
    /// Route requests through the internal gateway
    #[arg(long, global = true)]
    inbank: bool,

    /// Worker count for downloads and parsing (overrides PARSE_CONCURRENCY)
    #[arg(long, global = true)]
    parallel: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the escrow-account tables from the index page and pivot them
    Escrow {
        /// Index page listing the monthly files
        #[arg(long, env = "CBR_INDEX_URL")]
        index_url: Option<String>,

        /// Where to write the workbook
        #[arg(long, env = "OUTPUT_PATH")]
        output: Option<PathBuf>,

        /// Directory for downloaded files (reused between runs)
        #[arg(long, env = "WORK_DIR")]
        work_dir: Option<PathBuf>,

        /// Also save the long-form dataset as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Pivot spreadsheets already on disk
    Build {
        /// Directory with the spreadsheets
        #[arg(long)]
        dir: PathBuf,

        /// Layout recipe: a preset name (escrow, nps) or a JSON file
        #[arg(long, default_value = "escrow")]
        recipe: String,

        #[arg(long)]
        output: PathBuf,

        /// Also save the long-form dataset as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Header of the first column in the workbook
        #[arg(long)]
        entity_header: Option<String>,
    },

    /// Download full time-series files and pack them into a zip
    Archive {
        /// URLs to collect; the built-in series list when omitted
        urls: Vec<String>,

        #[arg(long, default_value = DEFAULT_ARCHIVE_NAME)]
        output: PathBuf,
    },

    /// Print canonical forms of organisation names, one per line
    Normalize {
        /// Names to normalize; read from stdin when omitted
        values: Vec<String>,

        /// Legal-form tag placement: left, right or none
        #[arg(long, default_value = "left")]
        placement: String,

        /// Letter case: upper or preserve
        #[arg(long, default_value = "preserve")]
        case: String,

        /// Generic words at the edges: keep or edges
        #[arg(long, default_value = "keep")]
        generic: String,
    },
}

fn bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    );
    pb
}

fn print_report(report: &PipelineReport) {
    for warning in &report.warnings {
        warn!("{}: {}", warning.source, warning.message);
    }
    match &report.output {
        Some(path) => println!(
            "Wrote {} sheets ({} records from {} files) to {}",
            report.indicators.len(),
            report.records,
            report.files,
            path.display()
        ),
        None => println!("No data found in {} files, nothing written", report.files),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cbr_stats=debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if cli.inbank {
        config.inbank = true;
    }
    if let Some(parallel) = cli.parallel {
        config.parse_concurrency = parallel.max(1);
    }
    info!("Starting with config: {:?}", config);

    let timeout = Duration::from_secs(config.http_timeout_secs);

    match cli.command {
        Command::Escrow {
            index_url,
            output,
            work_dir,
            json,
        } => {
            let index_url = index_url.unwrap_or(config.index_url.clone());
            let output = output.unwrap_or(config.output_path.clone());
            let work_dir = work_dir.unwrap_or(config.work_dir.clone());

            let locator =
                IndexLocator::new(index_url, timeout).with_prefix(config.endpoint_prefix());
            let downloader = CbrDownloader::new(timeout)
                .with_prefix(config.endpoint_prefix())
                .with_cache_dir(work_dir);

            let mut options = PipelineOptions::new(LayoutRecipe::escrow());
            options.policy = config.unknown_indicator_policy;
            options.concurrency = config.parse_concurrency;
            options.dataset_json = json;

            let service = EscrowService::new(options).with_progress(bar(0));
            let report = service.run_index(&locator, &downloader, &output).await?;
            print_report(&report);
        }

        Command::Build {
            dir,
            recipe,
            output,
            json,
            entity_header,
        } => {
            let recipe = LayoutRecipe::resolve(&recipe)?;
            info!("Using layout recipe '{}'", recipe.name);

            let mut options = PipelineOptions::new(recipe);
            options.policy = config.unknown_indicator_policy;
            options.concurrency = config.parse_concurrency;
            options.dataset_json = json;
            if let Some(header) = entity_header {
                options.render.entity_header = header;
            }

            let service = EscrowService::new(options).with_progress(bar(0));
            let report = service.run_directory(&dir, &output).await?;
            print_report(&report);
        }

        Command::Archive { urls, output } => {
            let urls: Vec<String> = if urls.is_empty() {
                DEFAULT_SERIES_URLS.iter().map(|u| u.to_string()).collect()
            } else {
                urls
            };

            let downloader = CbrDownloader::new(timeout).with_prefix(config.endpoint_prefix());
            let service = ArchiveService::new(downloader, config.parse_concurrency)
                .with_progress(bar(urls.len() as u64));
            let report = service.run(&urls, &output).await?;

            for (url, reason) in &report.failed {
                warn!("Skipped {}: {}", url, reason);
            }
            println!(
                "Archived {} of {} files into {}",
                report.archived,
                urls.len(),
                report.path.display()
            );
        }

        Command::Normalize {
            values,
            placement,
            case,
            generic,
        } => {
            let options = NormalizeOptions::parse(&placement, &case, &generic)?;
            let normalizer = NameNormalizer::new(options);

            let values = if values.is_empty() {
                std::io::stdin().lock().lines().collect::<Result<Vec<_>, _>>()?
            } else {
                values
            };
            for value in &values {
                println!("{}", normalizer.normalize_str(value).unwrap_or_default());
            }
        }
    }

    Ok(())
}
