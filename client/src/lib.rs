//! # Lobby Client Library
//!
//! This library provides the client side of the lobby relay. It owns one UDP
//! socket to the server, keeps the session alive, and tracks where every other
//! player in the lobby was last seen.
//!
//! ## Architecture Overview
//!
//! ### Duplex Runtime
//! Reads and writes run on separate tasks so neither blocks the other. The
//! writer drains a bounded outbound queue; the reader sorts incoming commands
//! into two streams:
//! - relayed positions and disconnect notices go straight to the player cache
//! - replies (`Pong`, `SetSeed`) go to a bounded inbound queue that the
//!   blocking calls wait on
//!
//! ### Liveness
//! A keepalive task writes `KeepAlive` on a fixed period below the server's
//! idle threshold, and a server `Ping` is answered with `KeepAlive` by the
//! reader itself. The host never has to think about eviction.
//!
//! ### Shutdown
//! Every socket operation carries a deadline. Shutdown flips a shared signal,
//! each task finishes its current operation and returns, and only then is the
//! socket released.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - Address resolution and transport selection
//! - Writer, reader and keepalive tasks
//! - `ping`, `join` and `transform_player`
//!
//! ### Players Module (`players`)
//! Last-known positions keyed by player id, safe to read from any thread.
//!
//! ### Embed Module (`embed`)
//! A blocking facade with a polled last-error slot, for host programs that
//! cannot await.
//!
//! ### Error Module (`error`)
//! The error type every fallible client operation returns.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{ClientConfig, LobbyClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = LobbyClient::connect("127.0.0.1:5000", ClientConfig::default()).await?;
//!     client.ping().await?;
//!
//!     let seed = client.join(7).await?;
//!     println!("world seed {}", seed);
//!
//!     client.transform_player(7, 10, -4);
//!     for player in client.players() {
//!         println!("{:?}", player);
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod embed;
pub mod error;
pub mod network;
pub mod players;

pub use embed::EmbeddedClient;
pub use error::{ClientError, ClientResult};
pub use network::{ClientConfig, LobbyClient, Transport};
pub use players::PlayerCache;
