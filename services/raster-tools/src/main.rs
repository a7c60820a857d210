//! Raster grid tool.
//!
//! Masks ASCII grids to a mask grid, splits them into one file per mask
//! subset and merges subset files back. Jobs come from the command line or
//! from a YAML run file.

mod config;
mod jobs;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{RunConfig, DEFAULT_MASK_CACHE};
use jobs::{Job, JobContext, JobReport};

#[derive(Parser, Debug)]
#[command(name = "raster-tools")]
#[command(about = "Mask, split and merge raster grids")]
struct Cli {
    /// Run file with a list of jobs
    #[arg(short, long, env = "RASTER_RUN_FILE")]
    config: Option<String>,

    /// Worker threads for grid computations
    #[arg(long, env = "RASTER_THREADS")]
    threads: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info", env = "RASTER_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Job>,
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries the job reports
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs)?;

    let run = match (&cli.config, cli.command) {
        (Some(_), Some(_)) => bail!("Give either a subcommand or --config, not both"),
        (Some(path), None) => {
            let run = RunConfig::from_file(path)?;
            info!(path = %path, jobs = run.jobs.len(), "Loaded run file");
            run
        }
        (None, Some(job)) => RunConfig {
            jobs: vec![job],
            ..RunConfig::default()
        },
        (None, None) => bail!("Nothing to do: give a subcommand or --config <run file>"),
    };

    if let Some(threads) = cli.threads.or(run.threads) {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build worker pool")?;
        info!(threads, "Configured worker pool");
    }

    let cache_size = if run.mask_cache_size == 0 {
        DEFAULT_MASK_CACHE
    } else {
        run.mask_cache_size
    };
    let ctx = JobContext::new(cache_size, run.storage.clone());

    let mut reports: Vec<JobReport> = Vec::with_capacity(run.jobs.len());
    for (i, job) in run.jobs.iter().enumerate() {
        match job.run(&ctx).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(job = i, mode = job.mode(), error = %format!("{:#}", e), "Job failed");
                return Err(e.context(format!("job {} ({}) failed", i, job.mode())));
            }
        }
    }

    let stats = ctx.masks.stats().await;
    info!(
        jobs = reports.len(),
        mask_hits = stats.hits,
        mask_misses = stats.misses,
        "Run complete"
    );

    let out = if reports.len() == 1 {
        serde_json::to_string_pretty(&reports[0])?
    } else {
        serde_json::to_string_pretty(&reports)?
    };
    println!("{}", out);
    Ok(())
}
