use clap::Parser;
use log::info;
use server::config::HostConfig;
use server::network::UdpHost;
use server::registry::ServiceRegistry;
use server::services::install_default_services;
use server::stats::StatsLedger;
use server::worker_pool::WorkerPool;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the services bind on
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Minimum number of pool workers
    #[arg(long)]
    min_workers: Option<usize>,

    /// Maximum number of pool workers
    #[arg(long)]
    max_workers: Option<usize>,

    /// Task queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = HostConfig::default();
    config.server.host = args.host;
    if let Some(min) = args.min_workers {
        config.pool.min_workers = min;
    }
    if let Some(max) = args.max_workers {
        config.pool.max_workers = max;
    }
    if let Some(capacity) = args.queue_capacity {
        config.pool.queue_capacity = capacity;
    }

    let ledger = Arc::new(StatsLedger::new());
    let pool = WorkerPool::new(config.pool.clone());
    let registry = Arc::new(ServiceRegistry::new());
    install_default_services(&registry, &config, Arc::clone(&ledger), pool.clone())?;

    let host = UdpHost::new(config, registry, pool, ledger);
    host.start().await?;

    info!("Press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    host.stop().await;
    Ok(())
}
