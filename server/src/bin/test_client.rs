//! Headless bot that exercises a running server.
//!
//! Connects, wanders and fires in random directions, grabs a gun once, and
//! logs every snapshot it receives before disconnecting.

use clap::Parser;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ClientMessage, Reassembler, ServerMessage, WORLD_HEIGHT, WORLD_WIDTH};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, Instant};

type BotError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:12345")]
    server: String,

    /// How long to play before disconnecting
    #[arg(short = 'd', long, default_value = "10")]
    duration_secs: u64,

    /// Seed for the bot's random choices
    #[arg(long)]
    seed: Option<u64>,
}

async fn send(
    socket: &UdpSocket,
    addr: SocketAddr,
    message: &ClientMessage,
) -> Result<(), BotError> {
    socket.send_to(&message.encode()?, addr).await?;
    Ok(())
}

fn random_action(rng: &mut StdRng) -> ClientMessage {
    if rng.gen_bool(0.3) {
        let angle: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
        let speed: f32 = rng.gen_range(2.0..8.0);
        ClientMessage::Shoot {
            dx: angle.cos() * speed,
            dy: angle.sin() * speed,
        }
    } else {
        ClientMessage::Move {
            x: rng.gen_range(0.0..WORLD_WIDTH),
            y: rng.gen_range(0.0..WORLD_HEIGHT),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BotError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = args.server.parse()?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Bot socket bound to {}", socket.local_addr()?);

    send(&socket, server_addr, &ClientMessage::Connect).await?;

    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let mut actions = interval(Duration::from_millis(250));
    let mut buf = vec![0u8; 64 * 1024];
    let mut reassembler = Reassembler::new();
    let mut client_id = None;
    let mut picked_up = false;

    while Instant::now() < deadline {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, _) = received?;
                match reassembler.accept(&buf[..len]) {
                    Ok(None) => {}
                    Ok(Some(ServerMessage::Connected { client_id: id })) => {
                        info!("Connected with client ID {}", id);
                        client_id = Some(id);
                    }
                    Ok(Some(ServerMessage::Disconnected { reason })) => {
                        warn!("Disconnected: {}", reason);
                        return Ok(());
                    }
                    Ok(Some(ServerMessage::Rejected { reason })) => warn!("Rejected: {}", reason),
                    Ok(Some(message)) => {
                        if let Some(world) = message.game_state() {
                            info!(
                                "Snapshot: {} players, {} boxes, {} bullets",
                                world.players.len(),
                                world.boxes.len(),
                                world.bullets.len()
                            );
                        }
                    }
                    Err(e) => warn!("Failed to decode server message: {}", e),
                }
            }
            _ = actions.tick() => {
                if client_id.is_some() {
                    let action = if picked_up {
                        random_action(&mut rng)
                    } else {
                        picked_up = true;
                        ClientMessage::Pickup
                    };
                    send(&socket, server_addr, &action).await?;
                }
            }
        }
    }

    send(&socket, server_addr, &ClientMessage::Disconnect).await?;
    info!("Bot finished");

    Ok(())
}
