mod config;
mod error;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{AppConfig, RegionConfig};
use crate::loader::{discover_csv_files, load_batch};
use crate::models::{CrawlRunStats, krp_label};
use crate::pipeline::Pipeline;
use crate::scraper::parsers::catalog::{CatalogKind, discover_regions};
use crate::scraper::{PageFetcher, build_fetcher};
use crate::storage::Repository;
use crate::utils::{fmt_number, pad};

#[derive(Parser)]
#[command(
    name = "company-scraper",
    about = "Company directory scraper: crawl, normalise and export regional company lists",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the configured region map and write one CSV per region
    Crawl {
        /// Only crawl these region keys (config order is kept)
        #[arg(short, long = "region")]
        regions: Vec<String>,

        /// Output directory (default: output.dir)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Skip the consolidated all-regions file
        #[arg(long)]
        no_consolidated: bool,

        /// Print the run statistics as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Discover the region map from a catalog page
    Discover {
        #[arg(long)]
        catalog: String,

        /// Catalog layout (default: guessed from the URL)
        #[arg(long, value_enum)]
        kind: Option<CatalogKind>,

        /// Crawl the discovered regions right away
        #[arg(long)]
        crawl: bool,
    },

    /// Concatenate batch files sharing one schema
    Merge {
        #[arg(short, long)]
        out: PathBuf,

        /// Remove the input files once the merged file is written
        #[arg(long)]
        delete_partials: bool,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Load written batch files into the local catalog
    Import {
        /// Directory with batch files (default: output.dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Show catalog counts per region and size class
    Stats,

    /// List the configured region map in crawl order
    Regions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "company_directory_scraper=info,warn",
        1 => "company_directory_scraper=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Crawl {
            regions,
            out,
            no_consolidated,
            json,
        } => {
            let _t = utils::Timer::start("Crawl");
            if let Some(dir) = out {
                config.output.dir = dir;
            }
            if no_consolidated {
                config.output.consolidated = false;
            }

            let selected = select_regions(&config.crawl.regions, &regions);
            let fetcher = build_fetcher(&config.fetch)?;
            let stats = crawl(config, fetcher.as_ref(), &selected).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_summary(&stats);
            }
        }

        Command::Discover {
            catalog,
            kind,
            crawl: run_crawl,
        } => {
            let _t = utils::Timer::start("Region discovery");
            let kind = kind.unwrap_or_else(|| CatalogKind::detect(&catalog));
            let fetcher = build_fetcher(&config.fetch)?;

            let regions = match fetcher.fetch(&catalog).await {
                Ok(page) => discover_regions(&page, kind)?,
                Err(e) => {
                    warn!("Catalog fetch failed: {}", e);
                    Vec::new()
                }
            };
            fetcher.release().await;
            print_regions(&regions);

            if run_crawl && !regions.is_empty() {
                let stats = crawl(config, fetcher.as_ref(), &regions).await?;
                print_summary(&stats);
            }
        }

        Command::Merge {
            out,
            delete_partials,
            files,
        } => {
            let rows = storage::merge(&files, &out)
                .with_context(|| format!("Failed to merge into {:?}", out))?;
            println!("Merged {} rows from {} files into {:?}", fmt_number(rows), files.len(), out);

            if delete_partials {
                let removed = storage::delete_partials(&files);
                println!("Deleted {} partial files", removed);
            }
        }

        Command::Import { dir } => {
            let _t = utils::Timer::start("Catalog import");
            let dir = dir.unwrap_or_else(|| config.output.dir.clone());
            let repo = Repository::open(&config.catalog.db_path)?;
            if config.catalog.run_migrations {
                repo.run_migrations()?;
            }

            let files: Vec<PathBuf> = discover_csv_files(&dir)?
                .into_iter()
                .filter(|p| {
                    p.file_name().and_then(|n| n.to_str()) != Some(config.output.summary_name.as_str())
                })
                .collect();
            info!("Found {} batch files in {:?}", files.len(), dir);

            let run_id = repo.begin_import_run().unwrap_or(0);
            let mut total = 0usize;
            let mut errors = 0usize;
            for path in &files {
                match load_batch(path) {
                    Ok((_shape, records)) => {
                        total += repo.upsert_companies(&records)?;
                    }
                    Err(e) => {
                        warn!("Error loading {:?}: {:#}", path, e);
                        errors += 1;
                    }
                }
            }

            let error_msg = (errors > 0).then(|| format!("{} files failed", errors));
            repo.finish_import_run(run_id, files.len(), total, error_msg.as_deref())
                .ok();
            info!("Done: {} records upserted, {} errors", total, errors);
        }

        Command::Stats => {
            let repo = Repository::open(&config.catalog.db_path)?;
            if config.catalog.run_migrations {
                repo.run_migrations()?;
            }
            let total = repo.company_count()?;
            println!("─────────────────────────────────────────────");
            println!("  Company catalog");
            println!("─────────────────────────────────────────────");
            println!("  Companies : {}", fmt_number(total.max(0) as usize));
            println!("  Last import: {}", repo.last_import_status()?.unwrap_or("—".into()));
            println!();
            println!("  By region:");
            for (region, n) in repo.counts_by_region()? {
                println!("    {} {:>8}", pad(&region, 28), fmt_number(n.max(0) as usize));
            }
            println!();
            println!("  By size class:");
            for (class, n) in repo.counts_by_size_class()? {
                let label = krp_label(&class).map(|l| format!("{class} {l}")).unwrap_or(class);
                println!("    {} {:>8}", pad(&label, 28), fmt_number(n.max(0) as usize));
            }
            println!("─────────────────────────────────────────────");
        }

        Command::Regions => print_regions(&config.crawl.regions),
    }

    Ok(())
}

async fn crawl(
    config: AppConfig,
    fetcher: &dyn PageFetcher,
    regions: &[RegionConfig],
) -> Result<CrawlRunStats> {
    let pipeline = Pipeline::new(config).context("Failed to build record extractor")?;
    Ok(pipeline.run(fetcher, regions).await)
}

/// Restrict the region map to `keys`, keeping config order.
fn select_regions(all: &[RegionConfig], keys: &[String]) -> Vec<RegionConfig> {
    if keys.is_empty() {
        return all.to_vec();
    }
    for key in keys {
        if !all.iter().any(|r| &r.key == key) {
            warn!("Unknown region {:?}, skipping", key);
        }
    }
    all.iter().filter(|r| keys.contains(&r.key)).cloned().collect()
}

fn print_regions(regions: &[RegionConfig]) {
    if regions.is_empty() {
        println!("No regions.");
        return;
    }
    println!("{} regions:", regions.len());
    for region in regions {
        let shape = region.shape.map(|s| format!("{s:?}").to_lowercase()).unwrap_or("auto".into());
        println!(
            "  {} {:<5} paginate={:<5} {}",
            pad(&region.key, 24),
            shape,
            region.paginate,
            region.urls.first().map(String::as_str).unwrap_or("")
        );
        for url in region.urls.iter().skip(1) {
            println!("  {} {}", " ".repeat(46), url);
        }
    }
}

fn print_summary(stats: &CrawlRunStats) {
    println!("─────────────────────────────────────────────────────────────");
    println!(
        "  {} {} {:>8} {:>6} {:>8}",
        pad("Region", 24),
        pad("Status", 15),
        "Records",
        "Pages",
        "Failures"
    );
    println!("─────────────────────────────────────────────────────────────");
    for r in &stats.regions {
        println!(
            "  {} {} {:>8} {:>6} {:>8}",
            pad(&r.region, 24),
            pad(r.status.as_str(), 15),
            fmt_number(r.records),
            r.pages_visited,
            r.fetch_failures
        );
        if let Some(err) = &r.error {
            println!("      error: {}", err);
        }
    }
    println!("─────────────────────────────────────────────────────────────");
    println!(
        "  Regions: {} attempted, {} with records, {} failed to persist",
        stats.regions_attempted,
        stats.regions_with_records,
        stats.failed_regions().count()
    );
    println!("  Records: {}", fmt_number(stats.total_records));
    for (class, n) in &stats.size_classes {
        let label = krp_label(class).unwrap_or("");
        println!("    {} {:>8}  {}", pad(class, 24), fmt_number(*n), label);
    }
    if let Some(path) = &stats.consolidated_file {
        println!("  Consolidated: {:?}", path);
    }
}
