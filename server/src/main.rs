use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig};
use shared::DEFAULT_PORT;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Interval between TIME_SYNC broadcasts in milliseconds
    #[arg(long, default_value = "1000")]
    time_sync_interval_ms: u64,

    /// How often the loop checks for due ticks, in milliseconds
    #[arg(long, default_value = "5")]
    wake_interval_ms: u64,

    /// Remove a client's entity when it disconnects
    #[arg(long)]
    reap_disconnected: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        max_clients: args.max_clients,
        time_sync_interval: Duration::from_millis(args.time_sync_interval_ms),
        wake_interval: Duration::from_millis(args.wake_interval_ms.max(1)),
        reap_disconnected: args.reap_disconnected,
    };

    let address = format!("{}:{}", args.host, args.port);
    info!("Starting server on {}", address);
    info!("Max clients: {}", config.max_clients);

    let mut server = Server::new(&address, config).await?;
    server.run().await?;

    Ok(())
}
