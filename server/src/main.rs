use clap::Parser;
use log::info;
use server::network::{LobbyServer, SeedPolicy, ServerConfig};
use shared::shutdown;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Use this world seed for every lobby instead of a random one
    #[arg(short, long, allow_negative_numbers = true)]
    seed: Option<i32>,

    /// Maximum number of datagram handlers running at once
    #[arg(long, default_value = "64")]
    max_in_flight: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        seed_policy: args.seed.map_or(SeedPolicy::Random, SeedPolicy::Fixed),
        max_in_flight: args.max_in_flight,
        ..ServerConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let server = LobbyServer::bind(&address, config).await?;
    info!("Started lobby server on {}", server.local_addr()?);

    let (trigger, listener) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        trigger.trigger();
    });

    server.run(listener).await?;

    Ok(())
}
