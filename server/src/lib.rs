//! # Lobby Server Library
//!
//! This library provides the session server for the lobby relay. It accepts
//! datagrams from any peer, tracks which peers are still alive, hands every
//! joiner the same world seed, and relays player positions between peers.
//!
//! ## Core Responsibilities
//!
//! ### Seed Negotiation
//! The first `Join` into an empty lobby starts a new epoch and fixes the world
//! seed for it. Every later joiner receives that same seed until the lobby
//! empties again.
//!
//! ### Position Relay
//! A `TransformPlayer` from one peer is re-framed as a server command and sent
//! to every other session. The sender never receives its own update.
//!
//! ### Liveness
//! Any datagram refreshes the sender's session. Sessions that go quiet are
//! pinged after the idle threshold and dropped after the eviction threshold,
//! at which point the remaining peers are told the player disconnected.
//!
//! ## Architecture Design
//!
//! ### Task Per Datagram
//! The receive loop decodes each datagram and spawns an independent handler
//! for it. Handlers complete in any order. A semaphore caps how many run at
//! once, so a flood slows intake rather than piling up tasks.
//!
//! ### Shared State
//! The session registry and the world seed sit behind a single
//! `tokio::sync::RwLock`; it is the only state touched by more than one task.
//!
//! ### Failure Handling
//! Malformed datagrams are logged and dropped. A failed send to one peer is
//! logged and never stops delivery to the others.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! - Session records and the address-keyed registry
//! - Assigned id generation
//! - Two-stage idle sweep
//!
//! ### Network Module (`network`)
//! - UDP socket ownership and the receive loop
//! - Command handlers and fan-out
//! - Periodic eviction task and graceful shutdown
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{LobbyServer, ServerConfig};
//! use shared::shutdown;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = LobbyServer::bind("0.0.0.0:5000", ServerConfig::default()).await?;
//!     let (trigger, listener) = shutdown::channel();
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         trigger.trigger();
//!     });
//!
//!     server.run(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod session;

pub use network::{LobbyServer, SeedPolicy, ServerConfig};
