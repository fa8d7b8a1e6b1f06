use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use linkwatch::{
    LinkWatch,
    config::{Config, StorageConfig, read_config_file},
    service::open_store,
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Connectivity and throughput monitor")]
struct Args {
    /// Config file (JSON); environment defaults apply without one
    #[arg(short, long)]
    config: Option<String>,

    /// SQLite database path, overrides the configured storage
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![("linkwatch", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };
    if let Some(path) = args.database {
        config.storage = Some(StorageConfig::Sqlite { path });
    }

    let store = open_store(&config.storage())
        .await
        .context("failed to open storage")?;

    let service = LinkWatch::new(config, store)?;
    service.initialize().await?;

    info!("monitoring started");
    service
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("monitoring stopped");
    Ok(())
}
