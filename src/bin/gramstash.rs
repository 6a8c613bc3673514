#![forbid(unsafe_code)]

//! Command-line front end: scrape one post/reel URL or a whole account into
//! the working directory, then print what happened.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gramstash::config::{RuntimeOverrides, resolve_runtime_config};
use gramstash::scraper::{ItemState, ScrapeReport, Scraper};
use gramstash::{MediaSelection, MediaType, RangeSpec};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gramstash", version, about = "Archive Instagram posts and reels with gallery-dl")]
struct Cli {
    /// Working directory (defaults to ./date=DD-MM-YYYY)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Path of the .env file to read settings from
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// gallery-dl executable
    #[arg(long, global = true)]
    gallery_dl: Option<PathBuf>,

    /// gallery-dl configuration file
    #[arg(long, global = true)]
    gallery_dl_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a single post or reel
    Url { url: String },
    /// Download an account's posts and/or reels
    Account {
        /// Account handle or profile URL
        account: String,
        #[arg(long = "type", default_value = "all")]
        media: MediaSelection,
        /// Item positions to fetch, `N` or `N-M` (1-based, inclusive)
        #[arg(long)]
        range: Option<RangeSpec>,
        /// Fetch every item, ignoring --range
        #[arg(long)]
        all: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(
        "gramstash=info"
            .parse()
            .unwrap_or_else(|_| tracing::Level::INFO.into()),
    );
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let config = resolve_runtime_config(RuntimeOverrides {
        scrape_root: cli.root,
        gallery_dl: cli.gallery_dl,
        gallery_dl_config: cli.gallery_dl_config,
        env_path: cli.env_file,
    })
    .context("loading configuration")?;
    let mut scraper = Scraper::from_config(&config)?;

    println!("===================================");
    println!("Instagram Scraper");
    println!("===================================");
    println!("Base directory: {}", scraper.paths().base.display());
    println!(
        "Ledger: {} ({} ids)",
        scraper.ledger().path().display(),
        scraper.ledger().len()
    );
    println!();

    let report = match cli.command {
        Command::Url { url } => {
            println!("Target: {url}");
            scraper.scrape_url(&url).await
        }
        Command::Account {
            account,
            media,
            range,
            all,
        } => {
            println!("Account: {account}");
            scraper.scrape_account(&account, media, range, all).await
        }
    };
    let report = match report {
        Ok(report) => report,
        Err(err) => {
            eprintln!("Error: {err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    print_summary(&report);
    let failed = report.failures().next().is_some() || !report.failed_listings.is_empty();
    match report.into_count() {
        Some(count) => println!("Downloaded {count} new item(s)"),
        None => println!("Nothing new downloaded"),
    }
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_summary(report: &ScrapeReport) {
    println!();
    println!("===================================");
    println!("Scrape complete!");
    println!("===================================");
    if let Some(account) = &report.account {
        println!("Account: {account}");
    }
    for media_type in [MediaType::Post, MediaType::Reel] {
        println!(
            "{} downloaded: {}",
            media_type.label(),
            report.downloaded_of(media_type)
        );
    }
    println!("Skipped (already downloaded): {}", report.skipped());
    for (media_type, reason) in &report.failed_listings {
        println!("Listing {media_type} failed: {reason}");
    }
    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("Failed:");
        for item in failures {
            if let ItemState::DownloadFailed(reason) = &item.state {
                println!("  - {} ({}): {reason}", item.media_id, item.url);
            }
        }
    }
    if !report.removed_duplicates.is_empty() {
        println!(
            "Removed {} duplicate video(s) from posts",
            report.removed_duplicates.len()
        );
    }
}
