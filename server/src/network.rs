//! Server network layer: receive loop, per-datagram handlers and eviction

use crate::session::{SessionRegistry, EVICT_THRESHOLD, IDLE_THRESHOLD};
use log::{debug, error, info, warn};
use rand::Rng;
use shared::shutdown::ShutdownListener;
use shared::{
    marshal_command, unmarshal_command, Command, CommandId, PlayerTransform, IO_TIMEOUT,
    MAX_COMMAND_SIZE,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::{interval, timeout, MissedTickBehavior};

/// How the world seed is picked when a join arrives at an empty lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPolicy {
    /// A fresh random seed per empty-lobby epoch
    Random,
    /// The same seed for every epoch
    Fixed(i32),
}

impl SeedPolicy {
    fn establish(self) -> i32 {
        match self {
            SeedPolicy::Random => rand::thread_rng().gen(),
            SeedPolicy::Fixed(seed) => seed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub seed_policy: SeedPolicy,
    pub idle_threshold: Duration,
    pub evict_threshold: Duration,
    pub sweep_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Upper bound on concurrently running datagram handlers
    pub max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            seed_policy: SeedPolicy::Random,
            idle_threshold: IDLE_THRESHOLD,
            evict_threshold: EVICT_THRESHOLD,
            sweep_interval: Duration::from_secs(1),
            read_timeout: IO_TIMEOUT,
            write_timeout: IO_TIMEOUT,
            max_in_flight: 64,
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> io::Result<()> {
        let invalid = |msg: &str| Err(io::Error::new(io::ErrorKind::InvalidInput, msg.to_string()));

        if self.max_in_flight == 0 {
            return invalid("max_in_flight must be at least 1");
        }
        // run() reclaims every permit in one acquire_many call
        if u32::try_from(self.max_in_flight).is_err() {
            return invalid("max_in_flight must fit in a u32");
        }
        if self.sweep_interval.is_zero() {
            return invalid("sweep_interval must be non-zero");
        }
        if self.read_timeout.is_zero() || self.write_timeout.is_zero() {
            return invalid("read and write timeouts must be non-zero");
        }
        Ok(())
    }
}

/// Sessions plus the seed they share. Guarded as one unit so that "lobby is
/// empty, pick a new seed" and "register the joiner" happen atomically.
#[derive(Debug)]
struct Lobby {
    sessions: SessionRegistry,
    world_seed: i32,
}

struct Inner {
    socket: UdpSocket,
    lobby: RwLock<Lobby>,
    handlers: Arc<Semaphore>,
    config: ServerConfig,
}

/// Lobby server bound to one UDP socket.
///
/// Cheap to clone; every clone drives the same socket and session set.
#[derive(Clone)]
pub struct LobbyServer {
    inner: Arc<Inner>,
}

impl LobbyServer {
    pub async fn bind(addr: &str, config: ServerConfig) -> io::Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(addr).await?;
        info!("Lobby server listening on {}", socket.local_addr()?);

        let initial_seed = config.seed_policy.establish();
        Ok(LobbyServer {
            inner: Arc::new(Inner {
                socket,
                lobby: RwLock::new(Lobby {
                    sessions: SessionRegistry::new(),
                    world_seed: initial_seed,
                }),
                handlers: Arc::new(Semaphore::new(config.max_in_flight)),
                config,
            }),
        })
    }

    /// Useful when bound to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.socket.local_addr()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lobby.read().await.sessions.len()
    }

    pub async fn world_seed(&self) -> i32 {
        self.inner.lobby.read().await.world_seed
    }

    pub async fn has_session(&self, addr: SocketAddr) -> bool {
        self.inner.lobby.read().await.sessions.contains(&addr)
    }

    /// Runs the receive loop and the eviction sweep until `shutdown` fires.
    ///
    /// In-flight reads are left to hit their own deadline, and every
    /// handler spawned so far is waited for before this returns. The socket
    /// is closed on return unless another clone of this server is still alive.
    pub async fn run(self, shutdown: ShutdownListener) -> io::Result<()> {
        let evictor = {
            let inner = Arc::clone(&self.inner);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_eviction(inner, shutdown).await })
        };

        info!("Lobby server started");
        run_receiver(Arc::clone(&self.inner), shutdown).await;

        if let Err(e) = evictor.await {
            error!("Eviction task panicked: {}", e);
        }

        // Every permit back means every handler has finished
        let permits = u32::try_from(self.inner.config.max_in_flight).unwrap_or(u32::MAX);
        if let Ok(all) = self.inner.handlers.acquire_many(permits).await {
            drop(all);
        }

        match Arc::try_unwrap(self.inner) {
            Ok(inner) => {
                drop(inner);
                info!("Lobby server stopped, socket closed");
            }
            Err(_) => info!("Lobby server stopped, socket held by another handle"),
        }
        Ok(())
    }
}

async fn run_receiver(inner: Arc<Inner>, shutdown: ShutdownListener) {
    let mut buffer = [0u8; MAX_COMMAND_SIZE];

    while !shutdown.is_triggered() {
        let (len, addr) = match timeout(
            inner.config.read_timeout,
            inner.socket.recv_from(&mut buffer),
        )
        .await
        {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                // ICMP port-unreachable from a vanished peer lands here on some platforms
                warn!("Error receiving datagram: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            Err(_) => continue,
        };

        {
            let mut lobby = inner.lobby.write().await;
            lobby.sessions.touch(addr, Instant::now());
        }

        let command = match unmarshal_command(&buffer[..len]) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping {} byte datagram from {}: {}", len, addr, e);
                continue;
            }
        };
        debug!("Received {:?} from {}", command, addr);

        let permit = match Arc::clone(&inner.handlers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            handle_command(&inner, command, addr).await;
            // Release the socket handle before the permit run() waits on
            drop(inner);
            drop(permit);
        });
    }
}

async fn run_eviction(inner: Arc<Inner>, mut shutdown: ShutdownListener) {
    let mut ticker = interval(inner.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => evict_idle(&inner).await,
        }
    }
}

async fn evict_idle(inner: &Inner) {
    let (outcome, remaining) = {
        let mut lobby = inner.lobby.write().await;
        let outcome = lobby.sessions.sweep_evict(
            Instant::now(),
            inner.config.idle_threshold,
            inner.config.evict_threshold,
        );
        // evicted sessions are already gone from the registry
        let remaining = if outcome.evicted.is_empty() {
            Vec::new()
        } else {
            lobby.sessions.addrs()
        };
        (outcome, remaining)
    };

    for session in &outcome.ping_targets {
        debug!("Pinging idle session {} at {}", session.assigned_id, session.addr);
        if let Err(e) = send_command(inner, &Command::server_ping(), session.addr).await {
            error!("Failed to ping {}: {}", session.addr, e);
        }
    }

    for session in &outcome.evicted {
        let notice = Command::player_disconnected(session.player_id);
        broadcast(inner, &notice, &remaining).await;
    }
}

async fn handle_command(inner: &Inner, command: Command, addr: SocketAddr) {
    match command.id() {
        Some(CommandId::ClientPing) => handle_ping(inner, addr).await,
        Some(CommandId::Join) => {
            if let Some(player_id) = command.player_id() {
                handle_join(inner, player_id, addr).await;
            }
        }
        Some(CommandId::ClientTransformPlayer) => {
            if let Some(transform) = command.transform() {
                handle_transform(inner, transform, addr).await;
            }
        }
        // Liveness was already refreshed by the receive loop
        Some(CommandId::KeepAlive) => {}
        Some(other) => {
            warn!("Unexpected {:?} from {}", other, addr);
        }
        None => {
            warn!(
                "Unknown command id {} from {}",
                command.header.command_id, addr
            );
        }
    }
}

async fn handle_ping(inner: &Inner, addr: SocketAddr) {
    if let Err(e) = send_command(inner, &Command::pong(), addr).await {
        error!("Failed to send pong to {}: {}", addr, e);
    }
}

async fn handle_join(inner: &Inner, player_id: u64, addr: SocketAddr) {
    let seed = {
        let mut lobby = inner.lobby.write().await;
        if lobby.sessions.is_empty() {
            lobby.world_seed = inner.config.seed_policy.establish();
            info!("Lobby was empty, world seed is now {}", lobby.world_seed);
        }
        lobby
            .sessions
            .upsert_on_join(addr, player_id, Instant::now());
        lobby.world_seed
    };

    if let Err(e) = send_command(inner, &Command::set_seed(seed), addr).await {
        error!("Failed to send seed to {}: {}", addr, e);
    }
}

async fn handle_transform(inner: &Inner, transform: PlayerTransform, addr: SocketAddr) {
    let peers = {
        let lobby = inner.lobby.read().await;
        lobby.sessions.peers_except(addr)
    };

    let relayed = Command::relayed_transform(transform);
    broadcast(inner, &relayed, &peers).await;
}

/// Best-effort fan-out. Returns how many destinations failed.
async fn broadcast(inner: &Inner, command: &Command, peers: &[SocketAddr]) -> usize {
    let data = marshal_command(command);
    let mut failures = 0;

    for addr in peers {
        if let Err(e) = send_bytes(inner, &data, *addr).await {
            error!("Failed to send to {}: {}", addr, e);
            failures += 1;
        }
    }

    if failures > 0 {
        warn!(
            "Broadcast of {:?} reached {}/{} peers",
            command.id(),
            peers.len() - failures,
            peers.len()
        );
    }
    failures
}

async fn send_command(inner: &Inner, command: &Command, addr: SocketAddr) -> io::Result<()> {
    send_bytes(inner, &marshal_command(command), addr).await
}

async fn send_bytes(inner: &Inner, data: &[u8], addr: SocketAddr) -> io::Result<()> {
    match timeout(inner.config.write_timeout, inner.socket.send_to(data, addr)).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write deadline elapsed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::shutdown;

    fn fast_config() -> ServerConfig {
        ServerConfig {
            read_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        }
    }

    async fn recv_command(socket: &UdpSocket) -> Command {
        let mut buf = [0u8; MAX_COMMAND_SIZE];
        let len = timeout(Duration::from_secs(1), socket.recv(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        unmarshal_command(&buf[..len]).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.idle_threshold, Duration::from_secs(5));
        assert_eq!(config.evict_threshold, Duration::from_secs(10));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.read_timeout, Duration::from_secs(1));
        assert_eq!(config.seed_policy, SeedPolicy::Random);
        assert!(config.max_in_flight > 0);
    }

    #[test]
    fn test_fixed_seed_policy() {
        assert_eq!(SeedPolicy::Fixed(111).establish(), 111);
        assert_eq!(SeedPolicy::Fixed(-7).establish(), -7);
    }

    #[tokio::test]
    async fn test_zero_in_flight_rejected() {
        let config = ServerConfig {
            max_in_flight: 0,
            ..ServerConfig::default()
        };
        let result = LobbyServer::bind("127.0.0.1:0", config).await;
        assert_eq!(result.err().unwrap().kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_rejected() {
        let config = ServerConfig {
            sweep_interval: Duration::ZERO,
            ..ServerConfig::default()
        };
        let result = LobbyServer::bind("127.0.0.1:0", config).await;
        assert_eq!(result.err().unwrap().kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_zero_timeouts_rejected() {
        for config in [
            ServerConfig {
                read_timeout: Duration::ZERO,
                ..ServerConfig::default()
            },
            ServerConfig {
                write_timeout: Duration::ZERO,
                ..ServerConfig::default()
            },
        ] {
            let result = LobbyServer::bind("127.0.0.1:0", config).await;
            assert_eq!(result.err().unwrap().kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[tokio::test]
    async fn test_oversized_in_flight_rejected() {
        let config = ServerConfig {
            max_in_flight: u32::MAX as usize + 1,
            ..ServerConfig::default()
        };
        let result = LobbyServer::bind("127.0.0.1:0", config).await;
        assert_eq!(result.err().unwrap().kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_run_releases_socket() {
        let server = LobbyServer::bind("127.0.0.1:0", fast_config())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        // One datagram so a handler task has come and gone
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.connect(addr).await.unwrap();
        peer.send(&marshal_command(&Command::ping())).await.unwrap();

        let (trigger, listener) = shutdown::channel();
        let handle = tokio::spawn(server.run(listener));
        assert_eq!(recv_command(&peer).await.id(), Some(CommandId::Pong));

        trigger.trigger();
        handle.await.unwrap().unwrap();

        // The port is free again once the last handle is gone
        UdpSocket::bind(addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_join_then_transform_relay() {
        let server = LobbyServer::bind("127.0.0.1:0", fast_config())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let (trigger, listener) = shutdown::channel();
        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.run(listener).await })
        };

        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(server_addr).await.unwrap();
        b.connect(server_addr).await.unwrap();

        a.send(&marshal_command(&Command::join(1))).await.unwrap();
        let seed_a = recv_command(&a).await.seed().unwrap();
        b.send(&marshal_command(&Command::join(2))).await.unwrap();
        let seed_b = recv_command(&b).await.seed().unwrap();
        assert_eq!(seed_a, seed_b);
        assert_eq!(server.session_count().await, 2);

        let transform = PlayerTransform::new(1, 24, 13);
        a.send(&marshal_command(&Command::transform_player(transform)))
            .await
            .unwrap();
        let relayed = recv_command(&b).await;
        assert_eq!(relayed.id(), Some(CommandId::ServerTransformPlayer));
        assert_eq!(relayed.transform(), Some(transform));

        trigger.trigger();
        handle.await.unwrap().unwrap();
    }
}
