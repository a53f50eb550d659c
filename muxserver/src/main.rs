use clap::Parser;
use muxserver::config::MuxConfig;
use muxserver::network::MuxServer;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind on
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum concurrent client sessions
    #[arg(long, default_value = "1000")]
    max_clients: usize,

    /// Estimated client round trip in milliseconds
    #[arg(long, default_value = "10")]
    ping_timeout: u64,

    /// Fallback chunk size in bytes when ping-timeout is 0
    #[arg(long, default_value = "512")]
    chunk_size: usize,

    /// Readiness wait timeout in milliseconds
    #[arg(long, default_value = "10")]
    select_timeout: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = MuxConfig {
        host: args.host,
        port: args.port,
        max_clients: args.max_clients,
        ping_timeout: Duration::from_millis(args.ping_timeout),
        chunk_size: args.chunk_size,
        select_timeout: Duration::from_millis(args.select_timeout),
        ..MuxConfig::default()
    };

    let mut server = MuxServer::bind(config)?;
    server.run()?;
    Ok(())
}
