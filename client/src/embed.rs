//! Synchronous facade for host programs that don't run their own async runtime.
//!
//! Every call blocks the calling thread. Failures are returned and also kept
//! as a message the host can poll with [`EmbeddedClient::last_error`]; the
//! message is cleared by the next call that succeeds.

use crate::error::{ClientError, ClientResult};
use crate::network::{ClientConfig, LobbyClient, Transport};
use log::info;
use shared::PlayerTransform;
use std::io;
use tokio::runtime::{Builder, Runtime};

pub struct EmbeddedClient {
    // Dropped before the runtime its tasks live on
    client: Option<LobbyClient>,
    last_error: Option<String>,
    runtime: Runtime,
}

impl EmbeddedClient {
    /// Starts a small multi-threaded runtime so the reader keeps draining the
    /// socket between host calls.
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("lobby-client")
            .enable_all()
            .build()?;

        Ok(Self {
            client: None,
            last_error: None,
            runtime,
        })
    }

    /// Dials `address` over `transport` ("udp", "udp4" or "udp6") and confirms
    /// the server answers a ping. Any previous connection is closed first.
    pub fn connect(&mut self, transport: &str, address: &str) -> ClientResult<()> {
        self.disconnect();

        let result = self.runtime.block_on(dial(transport, address));

        let client = self.record(result)?;
        info!("Connected to lobby at {}", client.server_addr());
        self.client = Some(client);
        Ok(())
    }

    /// Joins the lobby and returns the world seed, or 0 on failure.
    pub fn join(&mut self, player_id: u64) -> i32 {
        let result = match &self.client {
            Some(client) => self.runtime.block_on(client.join(player_id)),
            None => Err(ClientError::NotConnected),
        };
        self.record(result).unwrap_or(0)
    }

    pub fn transform_player(&mut self, player_id: u64, x: i32, y: i32) {
        let result = match &self.client {
            Some(client) => {
                client.transform_player(player_id, x, y);
                Ok(())
            }
            None => Err(ClientError::NotConnected),
        };
        let _ = self.record(result);
    }

    /// Last-known positions of the other players; empty when not connected.
    pub fn players(&self) -> Vec<PlayerTransform> {
        self.client
            .as_ref()
            .map(LobbyClient::players)
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Shuts the connection down gracefully. Safe to call when not connected.
    pub fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            self.runtime.block_on(client.shutdown());
        }
    }

    fn record<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => self.last_error = Some(e.to_string()),
        }
        result
    }
}

async fn dial(transport: &str, address: &str) -> ClientResult<LobbyClient> {
    let transport: Transport = transport.parse()?;
    let config = ClientConfig {
        transport,
        ..ClientConfig::default()
    };

    let client = LobbyClient::connect(address, config).await?;
    match client.ping().await {
        Ok(()) => Ok(client),
        Err(e) => {
            client.shutdown().await;
            Err(e)
        }
    }
}
