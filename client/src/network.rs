//! Duplex protocol runtime on top of one connected UDP socket.
//!
//! Three tasks share the socket:
//! - the writer drains the outbound queue and performs timed writes
//! - the reader performs timed reads, applies relayed positions straight to
//!   the player cache and forwards every other command to the inbound queue
//! - the keepalive ticker keeps the server-side session from going idle
//!
//! Blocking calls (`ping`, `join`) push a command, then wait on the inbound
//! queue for the matching reply. Fire-and-forget calls only enqueue.

use crate::error::{ClientError, ClientResult};
use crate::players::PlayerCache;
use log::{debug, error, info, warn};
use shared::shutdown::{self, ShutdownListener, ShutdownTrigger};
use shared::{
    marshal_command, unmarshal_command, Command, CommandId, PlayerTransform, ProtocolError,
    IO_TIMEOUT, MAX_COMMAND_SIZE,
};
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};

/// Address family used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Whatever family the server address resolves to first
    #[default]
    Udp,
    Udp4,
    Udp6,
}

impl Transport {
    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Transport::Udp => true,
            Transport::Udp4 => addr.is_ipv4(),
            Transport::Udp6 => addr.is_ipv6(),
        }
    }

    fn local_addr_for(server: &SocketAddr) -> SocketAddr {
        if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        }
    }
}

impl FromStr for Transport {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp" => Ok(Transport::Udp),
            "udp4" => Ok(Transport::Udp4),
            "udp6" => Ok(Transport::Udp6),
            other => Err(ClientError::UnsupportedTransport(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: Transport,
    pub send_timeout: Duration,
    /// Deadline for each socket read and for awaiting a reply
    pub recv_timeout: Duration,
    /// Must stay below the server's idle threshold
    pub keepalive_interval: Duration,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Udp,
            send_timeout: IO_TIMEOUT,
            recv_timeout: IO_TIMEOUT,
            keepalive_interval: Duration::from_secs(2),
            outbound_capacity: 64,
            inbound_capacity: 16,
        }
    }
}

impl ClientConfig {
    fn validate(&self) -> ClientResult<()> {
        if self.outbound_capacity == 0 || self.inbound_capacity == 0 {
            return Err(ClientError::InvalidConfig("queue capacities must be non-zero"));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ClientError::InvalidConfig("keepalive_interval must be non-zero"));
        }
        if self.send_timeout.is_zero() || self.recv_timeout.is_zero() {
            return Err(ClientError::InvalidConfig("timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// A queued write, optionally reporting its outcome back to the caller.
#[derive(Debug)]
struct Outbound {
    command: Command,
    ack: Option<oneshot::Sender<io::Result<()>>>,
}

impl Outbound {
    fn fire_and_forget(command: Command) -> Self {
        Self { command, ack: None }
    }
}

pub struct LobbyClient {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
    // Held for a whole request/response exchange, which also serializes them
    inbound: Mutex<mpsc::Receiver<Command>>,
    players: Arc<PlayerCache>,
    shutdown: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
    config: ClientConfig,
}

impl LobbyClient {
    /// Resolves `server_addr`, dials it and starts the writer, reader and
    /// keepalive tasks on the current runtime.
    pub async fn connect(server_addr: &str, config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;

        let resolved = tokio::net::lookup_host(server_addr)
            .await
            .map_err(|_| ClientError::InvalidAddress(server_addr.to_string()))?
            .find(|addr| config.transport.accepts(addr))
            .ok_or_else(|| ClientError::InvalidAddress(server_addr.to_string()))?;

        let socket = UdpSocket::bind(Transport::local_addr_for(&resolved)).await?;
        socket.connect(resolved).await?;
        let socket = Arc::new(socket);
        info!(
            "Client {} dialed lobby server {}",
            socket.local_addr()?,
            resolved
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let players = Arc::new(PlayerCache::new());
        let (trigger, listener) = shutdown::channel();

        let writer = tokio::spawn(run_writer(
            Arc::clone(&socket),
            outbound_rx,
            listener.clone(),
            config.send_timeout,
        ));
        let reader = tokio::spawn(run_reader(
            Arc::clone(&socket),
            inbound_tx,
            outbound_tx.clone(),
            Arc::clone(&players),
            listener.clone(),
            config.recv_timeout,
        ));
        let keepalive = tokio::spawn(run_keepalive(
            outbound_tx.clone(),
            listener,
            config.keepalive_interval,
        ));

        Ok(LobbyClient {
            socket,
            server_addr: resolved,
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            players,
            shutdown: trigger,
            tasks: vec![writer, reader, keepalive],
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Round-trips a `Ping`. Blocks until the `Pong` or the read deadline.
    pub async fn ping(&self) -> ClientResult<()> {
        self.request(Command::ping(), CommandId::Pong, "pong")
            .await
            .map(|_| ())
    }

    /// Joins the lobby and returns the world seed it shares.
    pub async fn join(&self, player_id: u64) -> ClientResult<i32> {
        let reply = self
            .request(Command::join(player_id), CommandId::SetSeed, "seed")
            .await?;

        reply.seed().ok_or(ClientError::Protocol(ProtocolError::MalformedBody {
            command_id: reply.header.command_id,
            expected: 4,
            actual: reply.header.body_size as usize,
        }))
    }

    /// Queues a position update and returns immediately. Delivery is not
    /// confirmed and a full queue drops the update.
    pub fn transform_player(&self, player_id: u64, x: i32, y: i32) {
        let command = Command::transform_player(PlayerTransform::new(player_id, x, y));
        if let Err(e) = self.outbound.try_send(Outbound::fire_and_forget(command)) {
            debug!("Dropping position update for player {}: {}", player_id, e);
        }
    }

    /// Snapshot of every other player's last-known position.
    pub fn players(&self) -> Vec<PlayerTransform> {
        self.players.snapshot()
    }

    /// Stops intake, waits for every task to notice (in-flight I/O runs to its
    /// own deadline) and then releases the socket.
    pub async fn shutdown(mut self) {
        self.shutdown.trigger();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!("Client task panicked: {}", e);
            }
        }
        info!("Client for {} shut down", self.server_addr);
    }

    async fn request(
        &self,
        command: Command,
        want: CommandId,
        what: &'static str,
    ) -> ClientResult<Command> {
        let mut inbound = self.inbound.lock().await;

        // Late replies to an earlier, timed-out request
        while let Ok(stale) = inbound.try_recv() {
            debug!("Discarding stale {:?}", stale);
        }

        self.send(command).await?;

        match timeout(self.config.recv_timeout, inbound.recv()).await {
            Err(_) => Err(ClientError::Timeout(what)),
            Ok(None) => Err(ClientError::Closed),
            Ok(Some(reply)) if reply.header.command_id == want.as_u16() => Ok(reply),
            Ok(Some(reply)) => Err(ClientError::UnexpectedCommand {
                got: reply.header.command_id,
                want: want.as_u16(),
            }),
        }
    }

    /// Queues `command` and waits until the writer has put it on the wire.
    async fn send(&self, command: Command) -> ClientResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound
            .send(Outbound {
                command,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| ClientError::Closed)?;

        ack_rx.await.map_err(|_| ClientError::Closed)??;
        Ok(())
    }
}

impl Drop for LobbyClient {
    fn drop(&mut self) {
        // Tasks exit on their own once they see this
        self.shutdown.trigger();
    }
}

async fn run_writer(
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::Receiver<Outbound>,
    mut shutdown: ShutdownListener,
    send_timeout: Duration,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.triggered() => break,
            next = outbound.recv() => next,
        };
        let Some(Outbound { command, ack }) = next else {
            break;
        };

        let data = marshal_command(&command);
        let result = match timeout(send_timeout, socket.send(&data)).await {
            Ok(sent) => sent.map(|_| ()),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "write deadline elapsed",
            )),
        };

        if let Err(e) = &result {
            error!("Could not write {:?}: {}", command.id(), e);
        }
        if let Some(ack) = ack {
            let _ = ack.send(result);
        }
    }
    debug!("Writer stopped");
}

async fn run_reader(
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<Command>,
    outbound: mpsc::Sender<Outbound>,
    players: Arc<PlayerCache>,
    shutdown: ShutdownListener,
    recv_timeout: Duration,
) {
    let mut buffer = [0u8; MAX_COMMAND_SIZE];

    while !shutdown.is_triggered() {
        let len = match timeout(recv_timeout, socket.recv(&mut buffer)).await {
            Ok(Ok(len)) => len,
            Ok(Err(e)) => {
                // Connection refused shows up here while the server is down
                warn!("Could not read: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            Err(_) => continue,
        };

        let command = match unmarshal_command(&buffer[..len]) {
            Ok(command) => command,
            Err(e) => {
                warn!("Could not unmarshal {:?}: {}", &buffer[..len], e);
                continue;
            }
        };
        debug!("Received {:?}", command);

        match command.id() {
            Some(CommandId::ServerTransformPlayer) => {
                if let Some(transform) = command.transform() {
                    players.update(transform);
                }
            }
            Some(CommandId::PlayerDisconnected) => {
                if let Some(player_id) = command.player_id() {
                    info!("Player {} left the lobby", player_id);
                    players.remove(player_id);
                }
            }
            Some(CommandId::ServerPing) => {
                let reply = Outbound::fire_and_forget(Command::keep_alive());
                if let Err(e) = outbound.try_send(reply) {
                    debug!("Could not answer server ping: {}", e);
                }
            }
            _ => {
                if let Err(e) = inbound.try_send(command) {
                    warn!("Dropping {:?}, nobody is waiting for it: {}", command.id(), e);
                }
            }
        }
    }
    debug!("Reader stopped");
}

async fn run_keepalive(
    outbound: mpsc::Sender<Outbound>,
    mut shutdown: ShutdownListener,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => {
                if let Err(e) = outbound.try_send(Outbound::fire_and_forget(Command::keep_alive())) {
                    debug!("Skipping keepalive: {}", e);
                }
            }
        }
    }
    debug!("Keepalive stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A fake server socket plus a client dialed to it.
    async fn client_with_fake_server(config: ClientConfig) -> (LobbyClient, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let client = LobbyClient::connect(&addr, config).await.unwrap();
        (client, server)
    }

    async fn recv_from_client(server: &UdpSocket) -> (Command, SocketAddr) {
        let mut buf = [0u8; MAX_COMMAND_SIZE];
        let (len, from) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("client never wrote")
            .unwrap();
        (unmarshal_command(&buf[..len]).unwrap(), from)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    fn quick_config() -> ClientConfig {
        ClientConfig {
            recv_timeout: Duration::from_millis(200),
            keepalive_interval: Duration::from_secs(60),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_transport_parsing() {
        assert_eq!("udp".parse::<Transport>().unwrap(), Transport::Udp);
        assert_eq!("udp4".parse::<Transport>().unwrap(), Transport::Udp4);
        assert_eq!("udp6".parse::<Transport>().unwrap(), Transport::Udp6);
        assert!(matches!(
            "tcp".parse::<Transport>(),
            Err(ClientError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn test_transport_filter() {
        let v4: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let v6: SocketAddr = "[::1]:5000".parse().unwrap();
        assert!(Transport::Udp.accepts(&v4) && Transport::Udp.accepts(&v6));
        assert!(Transport::Udp4.accepts(&v4) && !Transport::Udp4.accepts(&v6));
        assert!(Transport::Udp6.accepts(&v6) && !Transport::Udp6.accepts(&v4));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_address() {
        let result = LobbyClient::connect("definitely not an address", ClientConfig::default()).await;
        assert!(matches!(result, Err(ClientError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_degenerate_config() {
        let configs = [
            ClientConfig {
                outbound_capacity: 0,
                ..ClientConfig::default()
            },
            ClientConfig {
                inbound_capacity: 0,
                ..ClientConfig::default()
            },
            ClientConfig {
                keepalive_interval: Duration::ZERO,
                ..ClientConfig::default()
            },
            ClientConfig {
                recv_timeout: Duration::ZERO,
                ..ClientConfig::default()
            },
        ];

        for config in configs {
            let result = LobbyClient::connect("127.0.0.1:5000", config).await;
            assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_wrong_family() {
        let config = ClientConfig {
            transport: Transport::Udp6,
            ..ClientConfig::default()
        };
        let result = LobbyClient::connect("127.0.0.1:5000", config).await;
        assert!(matches!(result, Err(ClientError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_ping_times_out_without_reply() {
        let (client, server) = client_with_fake_server(quick_config()).await;

        let result = client.ping().await;
        assert!(matches!(result, Err(ClientError::Timeout("pong"))));

        let (command, _) = recv_from_client(&server).await;
        assert_eq!(command.id(), Some(CommandId::ClientPing));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_sequencing_error() {
        let (client, server) = client_with_fake_server(quick_config()).await;

        let responder = tokio::spawn(async move {
            let (_, from) = recv_from_client(&server).await;
            server
                .send_to(&marshal_command(&Command::set_seed(5)), from)
                .await
                .unwrap();
            server
        });

        let result = client.ping().await;
        match result {
            Err(ClientError::UnexpectedCommand { got, want }) => {
                assert_eq!(got, CommandId::SetSeed.as_u16());
                assert_eq!(want, CommandId::Pong.as_u16());
            }
            other => panic!("Unexpected result: {:?}", other.err()),
        }

        responder.await.unwrap();
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_join_returns_seed_and_intercepts_transforms() {
        let (client, server) = client_with_fake_server(quick_config()).await;

        let responder = tokio::spawn(async move {
            let (command, from) = recv_from_client(&server).await;
            assert_eq!(command.player_id(), Some(9));

            let relayed = Command::relayed_transform(PlayerTransform::new(3, -1, 1));
            server.send_to(&marshal_command(&relayed), from).await.unwrap();
            server
                .send_to(&marshal_command(&Command::set_seed(-42)), from)
                .await
                .unwrap();
            server
        });

        assert_eq!(client.join(9).await.unwrap(), -42);
        // The relayed transform was routed to the cache, not the reply queue
        assert_eq!(client.players(), vec![PlayerTransform::new(3, -1, 1)]);

        responder.await.unwrap();
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_ping_answered_with_keepalive() {
        let (client, server) = client_with_fake_server(quick_config()).await;

        // Learn the client's address from a fire-and-forget write
        client.transform_player(1, 2, 3);
        let (command, from) = recv_from_client(&server).await;
        assert_eq!(command.transform(), Some(PlayerTransform::new(1, 2, 3)));

        server
            .send_to(&marshal_command(&Command::server_ping()), from)
            .await
            .unwrap();
        let (reply, _) = recv_from_client(&server).await;
        assert_eq!(reply.id(), Some(CommandId::KeepAlive));
        assert_eq!(reply.header.body_size, 0);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_notice_clears_player() {
        let (client, server) = client_with_fake_server(quick_config()).await;
        client.transform_player(1, 0, 0);
        let (_, from) = recv_from_client(&server).await;

        let relayed = Command::relayed_transform(PlayerTransform::new(5, 1, 1));
        server.send_to(&marshal_command(&relayed), from).await.unwrap();
        assert!(wait_until(|| client.players().len() == 1).await);

        server
            .send_to(&marshal_command(&Command::player_disconnected(5)), from)
            .await
            .unwrap();
        assert!(wait_until(|| client.players().is_empty()).await);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_keepalive_ticks() {
        let config = ClientConfig {
            keepalive_interval: Duration::from_millis(50),
            ..quick_config()
        };
        let (client, server) = client_with_fake_server(config).await;

        let (command, _) = recv_from_client(&server).await;
        assert_eq!(command.id(), Some(CommandId::KeepAlive));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_requests_fail_after_shutdown_signal() {
        let (client, _server) = client_with_fake_server(quick_config()).await;
        client.shutdown.trigger();

        // Give the writer a moment to observe the signal and drop its queue
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(client.ping().await, Err(ClientError::Closed)));
    }
}
