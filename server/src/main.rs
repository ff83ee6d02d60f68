use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::{Server, ServerError};
use shared::{DEFAULT_PORT, MIN_TICK_INTERVAL_MS};
use std::time::Duration;

/// Authoritative box arena game server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Minimum milliseconds between simulation steps
    #[arg(long, default_value_t = MIN_TICK_INTERVAL_MS)]
    tick_ms: u64,

    /// How often, in milliseconds, the loop checks whether a step is due
    #[arg(long, default_value = "10")]
    poll_ms: u64,

    /// Maximum number of connected clients
    #[arg(long, default_value = "32")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    client_timeout_secs: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            tick_interval: Duration::from_millis(args.tick_ms),
            poll_interval: Duration::from_millis(args.poll_ms.max(1)),
            max_clients: args.max_clients,
            client_timeout: Duration::from_secs(args.client_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());
    info!(
        "Starting server on {} (tick {:?}, max {} clients)",
        config.bind_addr(),
        config.tick_interval,
        config.max_clients
    );

    let mut server = Server::new(&config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await
}
