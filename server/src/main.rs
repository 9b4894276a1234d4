use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::{Server, ServerMessage};
use shared::room::Authority;
use std::path::PathBuf;

/// Hazel lobby server.
/// Loads the config file if given, applies command-line overrides, then serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// TOML config file
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Server IP address to bind to
        #[clap(short = 'H', long)]
        host: Option<String>,
        /// Server port to listen on
        #[clap(short, long)]
        port: Option<u16>,
        /// Room updates per second
        #[clap(short, long)]
        tick_rate: Option<u32>,
        /// Connected clients before new ones are refused
        #[clap(short, long)]
        max_clients: Option<usize>,
        /// Run rounds on the server instead of the host client
        #[clap(long)]
        server_authority: bool,
        /// Log at debug level
        #[clap(short, long)]
        verbose: bool,
    }

    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.room.tick_rate = Some(tick_rate);
    }
    if let Some(max_clients) = args.max_clients {
        config.max_clients = max_clients;
    }
    if args.server_authority {
        config.room.authority = Authority::Server;
    }

    info!(
        "Starting server on {} ({:?} authority, {:?} ticks/s)",
        config.bind_addr(),
        config.room.authority,
        config.room.tick_rate
    );

    let mut server = Server::new(config).await?;
    let handle = server.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = handle.send(ServerMessage::Shutdown);
        }
    });

    server.run().await
}
