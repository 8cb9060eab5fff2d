//! TOROS pipeline CLI
//!
//! One subcommand per pipeline stage, so an external scheduler can run each
//! DAG node as its own process. `run` executes the whole night in-process.
//!
//! # Usage
//!
//! ```bash
//! toros-pipeline ingest --bundle 20250210 --dir /data/toros/2025-02-10
//! toros-pipeline dark-master --bundle 20250210
//! toros-pipeline flat-master --bundle 20250210
//! toros-pipeline correct --bundle 20250210
//!
//! # Everything at once, machine-readable report on stdout
//! toros-pipeline --json run --bundle 20250210 --dir /data/toros/2025-02-10
//! ```
//!
//! Separate processes only share state through a persistent store: Postgres,
//! or a local JSON snapshot (`[repository] snapshot_path`).
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: log filter (default: info)
//! - `REPOSITORY_TYPE`, `TOROS_SNAPSHOT_PATH`, `DATABASE_URL`: override `toros.toml`
//!
//! Exit status is 0 on success, 1 on failure and 2 when correction finished
//! with some frames failed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use toros_pipeline::config::Settings;
use toros_pipeline::db::RepositoryFactory;
use toros_pipeline::models::BundleId;
use toros_pipeline::pipeline::{Pipeline, StageStatus};

#[derive(Parser, Debug)]
#[command(name = "toros-pipeline", version)]
#[command(about = "Nightly calibration pipeline for TOROS CCD exposures")]
struct Cli {
    /// Settings file (default: first toros.toml found)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print the stage report as JSON on stdout
    #[arg(long = "json", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Catalogue the raw frames of a night directory
    Ingest {
        #[arg(long)]
        bundle: i64,
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,
    },
    /// Median-combine the night's darks into dark_master.fits
    DarkMaster {
        #[arg(long)]
        bundle: i64,
    },
    /// Average-combine the night's flats into flat_master.fits
    FlatMaster {
        #[arg(long)]
        bundle: i64,
    },
    /// Calibrate every light frame with the two masters
    Correct {
        #[arg(long)]
        bundle: i64,
    },
    /// Run all four stages in order
    Run {
        #[arg(long)]
        bundle: i64,
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(StageStatus::Succeeded) => ExitCode::SUCCESS,
        Ok(StageStatus::PartiallyFailed) => ExitCode::from(2),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<StageStatus> {
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let repository = RepositoryFactory::from_settings(&settings)
        .await
        .context("opening repository")?;
    let pipeline = Pipeline::with_fits(repository, settings.pipeline.clone());
    let json = cli.json;

    match cli.command {
        Command::Ingest { bundle, dir } => {
            let report = pipeline.ingest(BundleId(bundle), &dir).await?;
            info!(exposures = report.exposures, "Ingest finished");
            emit(json, &report)?;
            Ok(StageStatus::Succeeded)
        }
        Command::DarkMaster { bundle } => {
            let report = pipeline.make_dark_master(BundleId(bundle)).await?;
            emit(json, &report)?;
            Ok(StageStatus::Succeeded)
        }
        Command::FlatMaster { bundle } => {
            let report = pipeline.make_flat_master(BundleId(bundle)).await?;
            emit(json, &report)?;
            Ok(StageStatus::Succeeded)
        }
        Command::Correct { bundle } => {
            let report = pipeline.correct(BundleId(bundle)).await?;
            for failure in &report.failures {
                error!(file = %failure.filename, "{}", failure.error);
            }
            emit(json, &report)?;
            Ok(report.status())
        }
        Command::Run { bundle, dir } => {
            let report = pipeline.run_night(BundleId(bundle), &dir).await?;
            emit(json, &report)?;
            Ok(report.status())
        }
    }
}

fn emit<T: Serialize>(json: bool, report: &T) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    Ok(())
}
