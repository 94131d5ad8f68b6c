use clap::{Parser, ValueEnum};
use image_publisher::config::{self, CONFIG_FILENAME, PublisherConfig};
use image_publisher::pipeline::{self, Pipeline, PipelineError, RunOptions};
use image_publisher::{maintenance, output, scan};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

mod logging;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MaintenanceOp {
    /// Entry counts, version and dirty flag
    Stats,
    /// Every entry as JSON on stdout
    Export,
    /// Drop entries whose variants are missing from the store
    Repair,
}

#[derive(Parser)]
#[command(name = "image-publisher")]
#[command(version)]
#[command(about = "Publish resized variants of the images referenced by a markdown site")]
#[command(long_about = "\
Publish resized variants of the images referenced by a markdown site

Every image tag with an http(s) source found under the content directory is
downloaded, resized to each configured width, re-encoded as JPEG and uploaded
to the object store. Images already recorded in the cache file are skipped.

Published object paths (widths = [240, 480, 960, 0]):

  images/<filename>_0.jpeg     240px
  images/<filename>_1.jpeg     480px
  images/<filename>_2.jpeg     960px
  images/<filename>.jpeg       original width

Exit status: 0 on success, 1 if any image failed (or verification found
problems), 2 on setup or cache save failure.

Run 'image-publisher --gen-config' to print a documented config file.")]
struct Cli {
    /// Config file (missing file means stock defaults)
    #[arg(long, default_value = CONFIG_FILENAME)]
    config: PathBuf,

    /// Markdown content directory
    #[arg(long)]
    content: Option<PathBuf>,

    /// Cache file
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Images processed concurrently
    #[arg(long)]
    parallelism: Option<usize>,

    /// Debug logging, including every cached image
    #[arg(long, short)]
    verbose: bool,

    /// Show what would be processed without fetching, uploading or saving
    #[arg(long)]
    dry_run: bool,

    /// Fetch cached images too and reprocess those whose content changed
    #[arg(long)]
    recheck: bool,

    /// Repopulate the cache from the object store's current contents
    #[arg(long, conflicts_with_all = ["verify_cache", "maintenance"])]
    rebuild_cache: bool,

    /// Check that every cached variant exists in the object store
    #[arg(long, conflicts_with = "maintenance")]
    verify_cache: bool,

    /// Cache maintenance operation
    #[arg(long, value_enum)]
    maintenance: Option<MaintenanceOp>,

    /// Print a stock config file with all options documented
    #[arg(long)]
    gen_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    if cli.gen_config {
        print!("{}", config::stock_config_toml());
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}

/// `Ok(false)` means the run finished but something needs attention.
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = resolve_config(&cli)?;
    let resources = pipeline::open_resources(&config).await?;
    let cache = &resources.cache;
    let store = resources.store.as_ref();

    if cli.rebuild_cache {
        info!(store = store.name(), "rebuilding cache from object store");
        let report = maintenance::rebuild(cache, store, &config.images).await?;
        output::print_rebuild(&report);
        return Ok(true);
    }
    if cli.verify_cache {
        let report =
            maintenance::verify(cache, store, &config.images, config.parallelism).await?;
        output::print_verify(&report);
        return Ok(report.is_clean());
    }
    if let Some(op) = cli.maintenance {
        match op {
            MaintenanceOp::Stats => output::print_cache_stats(&cache.stats()),
            MaintenanceOp::Export => println!("{}", maintenance::export_json(cache)?),
            MaintenanceOp::Repair => {
                let report =
                    maintenance::repair(cache, store, &config.images, config.parallelism).await?;
                output::print_repair(&report);
            }
        }
        return Ok(true);
    }

    let refs = scan::web_images(&config.content_dir)?;
    let options = RunOptions {
        dry_run: cli.dry_run,
        recheck: cli.recheck,
        ..RunOptions::from_config(&config)
    };
    let pipeline = Pipeline::from_config(&config, &resources, options)?;
    let partition = pipeline.partition(&refs);
    output::print_partition(&partition);

    match pipeline.run_jobs(partition).await {
        Ok(report) => {
            output::print_run_summary(&report);
            if report.saved {
                info!(path = %config.cache_file.display(), "cache saved");
            }
            Ok(!report.has_failures())
        }
        Err(e) => {
            if let PipelineError::Save { report, .. } = &e {
                output::print_run_summary(report);
            }
            Err(e.into())
        }
    }
}

/// Config file merged over defaults, then command-line overrides.
fn resolve_config(cli: &Cli) -> Result<PublisherConfig, config::ConfigError> {
    let mut config = config::load_config(&cli.config)?;
    if let Some(content) = &cli.content {
        config.content_dir = content.clone();
    }
    if let Some(cache_file) = &cli.cache_file {
        config.cache_file = cache_file.clone();
    }
    if let Some(parallelism) = cli.parallelism {
        config.parallelism = parallelism;
    }
    config.validate()?;
    Ok(config)
}
