//! Speaks the wire protocol over a bare socket to check a running server.

use clap::Parser;
use shared::{marshal_command, unmarshal_command, Command, CommandId, PlayerTransform};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about = "Send raw lobby commands to a server")]
struct Args {
    /// Server address to probe
    #[arg(short = 's', long, default_value = "127.0.0.1:5000")]
    server: String,

    /// Player id to join with
    #[arg(long, default_value = "1")]
    player_id: u64,

    /// Number of position updates to send after joining
    #[arg(long, default_value = "0")]
    moves: u32,

    /// Also send a truncated datagram to check the server shrugs it off
    #[arg(long)]
    malformed: bool,
}

async fn exchange(
    socket: &UdpSocket,
    command: &Command,
) -> Result<Command, Box<dyn std::error::Error>> {
    socket.send(&marshal_command(command)).await?;

    let mut buf = [0u8; shared::MAX_COMMAND_SIZE];
    let len = timeout(Duration::from_secs(1), socket.recv(&mut buf)).await??;
    Ok(unmarshal_command(&buf[..len])?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let server_addr: SocketAddr = args.server.parse()?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(server_addr).await?;
    println!("Probe socket bound to {}", socket.local_addr()?);

    let started = std::time::Instant::now();
    let pong = exchange(&socket, &Command::ping()).await?;
    if pong.id() != Some(CommandId::Pong) {
        return Err(format!("expected Pong, got {:?}", pong).into());
    }
    println!("Pong after {:?}", started.elapsed());

    if args.malformed {
        socket.send(&[0x00, 0x03]).await?;
        socket.send(&[0x00, 0x03, 0x00, 0x10, 0xFF]).await?;
        let pong = exchange(&socket, &Command::ping()).await?;
        println!("Server still answering after malformed input: {:?}", pong.id());
    }

    let reply = exchange(&socket, &Command::join(args.player_id)).await?;
    match reply.seed() {
        Some(seed) => println!("Joined as player {}, world seed {}", args.player_id, seed),
        None => return Err(format!("expected SetSeed, got {:?}", reply).into()),
    }

    for step in 0..args.moves {
        let transform = PlayerTransform::new(args.player_id, step as i32, -(step as i32));
        socket
            .send(&marshal_command(&Command::transform_player(transform)))
            .await?;
        println!("Sent {:?}", transform);
        sleep(Duration::from_millis(200)).await;
    }

    println!("Probe finished");
    Ok(())
}
