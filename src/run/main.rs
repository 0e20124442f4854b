//! Batch runner: marks every address that has a gate within routed reach.
//!
//! Reads layer `<address_layer>` of `<base>/<addresses>.gpkg` and layer
//! `<gate_layer>` of `<base>/<gates>.gpkg`, writes layer `<address_layer>_300`
//! of `<base>/<addresses>_300.gpkg` plus a pair dump.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gatereach::config::Config;
use gatereach::pipeline::{run, Job};
use gatereach::routing::OsrmClient;

#[derive(Parser, Debug)]
#[command(name = "gatereach")]
#[command(about = "Flag addresses with a gate within routed driving distance")]
struct Args {
    /// Address GeoPackage name, without the .gpkg extension
    address_dataset: String,

    /// Gate GeoPackage name, without the .gpkg extension
    gate_dataset: String,

    /// Address layer name
    address_layer: String,

    /// Gate layer name
    gate_layer: String,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the datasets (defaults to the working directory)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Routing service base URL
    #[arg(long)]
    routing_url: Option<String>,

    /// Do not verify the routing service TLS certificate
    #[arg(long)]
    insecure: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            eprintln!(
                "Error: four arguments are required: the address dataset, the gate dataset and their layer names."
            );
            std::process::exit(1);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    info!("Start {}", Local::now().format("%Y-%m-%d %H:%M:%S"));

    if let Err(e) = execute(args).await {
        error!("ERROR:");
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("Completed {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

async fn execute(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(url) = args.routing_url {
        config.routing.base_url = url;
    }
    if args.insecure {
        config.routing.accept_invalid_certs = true;
    }
    if config.routing.accept_invalid_certs {
        warn!("TLS certificate verification is disabled for the routing service");
    }

    let base_dir = match args.base_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve working directory")?,
    };

    let job = Job {
        base_dir,
        address_dataset: args.address_dataset,
        gate_dataset: args.gate_dataset,
        address_layer: args.address_layer,
        gate_layer: args.gate_layer,
        show_progress: !args.no_progress,
    };

    info!("Routing service: {}", config.routing.base_url);
    info!(
        "Buffer {} m, threshold {} m ({:?} / {:?})",
        config.buffer_m, config.threshold_m, config.measure.metric, config.measure.mode
    );

    config.validate()?;
    let client = OsrmClient::new(&config.routing)?;
    let summary = run(&config, &job, &client).await?;

    info!(
        "Output layer: '{}' in {}",
        summary.output_layer,
        summary.output_dataset.display()
    );
    info!("Pair dump: {}", summary.pair_dump.display());
    Ok(())
}
