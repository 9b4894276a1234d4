use clap::{Parser, Subcommand};
use client::capture::{load_capture, replay};
use client::matchmaker::StaticMatchmaker;
use client::network::{Client, ClientOptions, Goal};
use log::info;
use shared::code::{code_to_int, display_code};
use shared::settings::GameSettings;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:22023")]
    server: String,

    /// Player name sent in the handshake
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Record every datagram to this file
    #[arg(short = 'c', long)]
    capture: Option<PathBuf>,

    /// Log at debug level
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a new room and wait in it
    Host {
        /// Player cap for the room
        #[arg(long, default_value = "10")]
        max_players: u8,
        #[arg(long, default_value = "1")]
        impostors: u8,
        /// Start the round once this many players joined
        #[arg(long)]
        start_at: Option<usize>,
    },
    /// Join a room by its code
    Join { code: String },
    /// List public rooms
    List,
    /// Rebuild a room offline from a capture file
    Replay { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let (goal, start_at) = match args.command {
        Command::Replay { file } => {
            let records = load_capture(&file)?;
            let session = replay(&records);
            match session.room() {
                Some(room) => {
                    info!(
                        "Room {}: host {}, {} players, {} objects, {:?}",
                        display_code(room.code()),
                        room.host_id(),
                        room.players().count(),
                        room.objects().count(),
                        room.state()
                    );
                    for player in room.players() {
                        info!("  client {} as player {:?}", player.client_id, player.player_id);
                    }
                }
                None => info!("Capture never joined a room"),
            }
            return Ok(());
        }
        Command::Host {
            max_players,
            impostors,
            start_at,
        } => {
            let settings = GameSettings {
                max_players,
                impostors,
                ..GameSettings::default()
            };
            settings.validate()?;
            (Goal::Host(settings), start_at)
        }
        Command::Join { code } => {
            let code = code_to_int(&code).ok_or_else(|| format!("invalid room code {:?}", code))?;
            (Goal::Join(code), None)
        }
        Command::List => (Goal::List, None),
    };

    let mut options = ClientOptions::new(args.name, goal);
    options.start_at = start_at;
    options.capture = args.capture;

    let matchmaker = StaticMatchmaker::new(args.server);
    let mut client = Client::new(&matchmaker, options).await?;
    client.run().await?;

    Ok(())
}
