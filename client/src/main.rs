use clap::Parser;
use client::network::{ClientConfig, LobbyClient, Transport};
use log::{info, warn};
use rand::Rng;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:5000")]
    server: String,

    /// Transport: udp, udp4 or udp6
    #[arg(short = 't', long, default_value = "udp")]
    transport: String,

    /// Player id to join as
    #[arg(short = 'p', long, default_value = "1")]
    player_id: u64,

    /// Number of random-walk steps to send before leaving
    #[arg(short = 'm', long, default_value = "50")]
    moves: u32,

    /// Delay between steps in milliseconds
    #[arg(short = 'i', long, default_value = "100")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let transport: Transport = args.transport.parse()?;

    info!("Starting client...");
    info!("Connecting to: {} over {:?}", args.server, transport);

    let config = ClientConfig {
        transport,
        ..ClientConfig::default()
    };
    let client = LobbyClient::connect(&args.server, config).await?;
    client.ping().await?;

    let seed = client.join(args.player_id).await?;
    info!("Joined as player {} with world seed {}", args.player_id, seed);

    let mut rng = rand::thread_rng();
    let (mut x, mut y) = (0i32, 0i32);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));

    for step in 0..args.moves {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted after {} steps", step);
                break;
            }
        }

        x = x.saturating_add(rng.gen_range(-1..=1));
        y = y.saturating_add(rng.gen_range(-1..=1));
        client.transform_player(args.player_id, x, y);

        if step % 10 == 0 {
            info!("At ({}, {}), other players: {:?}", x, y, client.players());
        }
    }

    client.shutdown().await;
    info!("Client stopped");
    Ok(())
}
