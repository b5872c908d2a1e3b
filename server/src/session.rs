//! Session bookkeeping for the lobby server
//!
//! This module owns the only piece of server state that more than one task
//! mutates:
//! - Session lifecycle (join, refresh, two-stage eviction)
//! - Unique session id assignment
//! - Peer address lookup for fan-out
//!
//! The registry itself is a plain data structure. The server wraps it in a
//! lock and every operation here runs under that lock, so a sweep never
//! observes a half-applied join.

use log::{debug, info};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Idle time after which a session is probed with a server ping.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(5);

/// Total idle time after which a probed session is dropped.
pub const EVICT_THRESHOLD: Duration = Duration::from_secs(10);

/// Server-side liveness record for one peer.
///
/// The address is only a lookup key. `player_id` is whatever the peer
/// claimed in its join and is never derived from the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub addr: SocketAddr,
    /// Last time any datagram arrived from `addr`
    pub last_seen: Instant,
    /// Unique id assigned by this server on first join
    pub assigned_id: u64,
    /// Player id the peer joined with
    pub player_id: u64,
    /// Set once the session has been pinged for being idle
    pub ping_pending: bool,
}

impl Session {
    pub fn new(addr: SocketAddr, assigned_id: u64, player_id: u64, now: Instant) -> Self {
        Self {
            addr,
            last_seen: now,
            assigned_id,
            player_id,
            ping_pending: false,
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// Generates xid-like ids: unix seconds in the high half, a counter seeded
/// from a random value in the low half.
#[derive(Debug)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(rand::thread_rng().gen()),
        }
    }

    pub fn next_id(&self) -> u64 {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_secs();
        // wrapping is fine, only the low 32 bits are kept
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        (timestamp << 32) | (count & 0xFFFF_FFFF)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one liveness sweep.
#[derive(Debug, Default, Clone)]
pub struct SweepOutcome {
    /// Sessions that just went idle and should be pinged
    pub ping_targets: Vec<Session>,
    /// Sessions removed from the registry
    pub evicted: Vec<Session>,
}

/// All sessions known to the server, keyed by peer address.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SocketAddr, Session>,
    ids: IdGenerator,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` or refreshes it if it already joined.
    ///
    /// Returns the session's assigned id, which stays stable across
    /// repeated joins from the same address.
    pub fn upsert_on_join(&mut self, key: SocketAddr, player_id: u64, now: Instant) -> u64 {
        if let Some(session) = self.sessions.get_mut(&key) {
            session.last_seen = now;
            session.ping_pending = false;
            session.player_id = player_id;
            debug!("Session {} from {} rejoined", session.assigned_id, key);
            return session.assigned_id;
        }

        let assigned_id = self.ids.next_id();
        info!(
            "Session {} joined from {} as player {}",
            assigned_id, key, player_id
        );
        self.sessions
            .insert(key, Session::new(key, assigned_id, player_id, now));
        assigned_id
    }

    /// Refreshes liveness for a known session. Unknown keys are ignored.
    pub fn touch(&mut self, key: SocketAddr, now: Instant) {
        if let Some(session) = self.sessions.get_mut(&key) {
            session.last_seen = now;
            session.ping_pending = false;
        }
    }

    /// Two-stage liveness check.
    ///
    /// Sessions idle for at least `idle_threshold` become ping-pending and are
    /// returned once as ping targets. Ping-pending sessions idle for at least
    /// `evict_threshold` are removed. A session that crosses both thresholds
    /// between two sweeps is reported in both lists.
    pub fn sweep_evict(
        &mut self,
        now: Instant,
        idle_threshold: Duration,
        evict_threshold: Duration,
    ) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for session in self.sessions.values_mut() {
            if session.ping_pending || session.idle_for(now) < idle_threshold {
                continue;
            }
            session.ping_pending = true;
            outcome.ping_targets.push(session.clone());
        }

        let expired: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|s| s.ping_pending && s.idle_for(now) >= evict_threshold)
            .map(|s| s.addr)
            .collect();

        for key in expired {
            if let Some(session) = self.sessions.remove(&key) {
                info!(
                    "Session {} ({}) evicted after {:?} idle",
                    session.assigned_id,
                    key,
                    session.idle_for(now)
                );
                outcome.evicted.push(session);
            }
        }

        outcome
    }

    /// Addresses of every session except `key`.
    pub fn peers_except(&self, key: SocketAddr) -> Vec<SocketAddr> {
        self.sessions
            .keys()
            .filter(|addr| **addr != key)
            .copied()
            .collect()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.sessions.keys().copied().collect()
    }

    pub fn get(&self, key: &SocketAddr) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub fn contains(&self, key: &SocketAddr) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_join_creates_session() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();

        let id = registry.upsert_on_join(test_addr(), 7, now);

        assert_eq!(registry.len(), 1);
        let session = registry.get(&test_addr()).unwrap();
        assert_eq!(session.assigned_id, id);
        assert_eq!(session.player_id, 7);
        assert_eq!(session.last_seen, now);
        assert!(!session.ping_pending);
    }

    #[test]
    fn test_rejoin_keeps_assigned_id() {
        let mut registry = SessionRegistry::new();
        let start = Instant::now();

        let first = registry.upsert_on_join(test_addr(), 1, start);
        let later = start + Duration::from_secs(3);
        let second = registry.upsert_on_join(test_addr(), 2, later);

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&test_addr()).unwrap().last_seen, later);
        assert_eq!(registry.get(&test_addr()).unwrap().player_id, 2);
    }

    #[test]
    fn test_distinct_peers_get_distinct_ids() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();

        let a = registry.upsert_on_join(test_addr(), 1, now);
        let b = registry.upsert_on_join(test_addr2(), 1, now);

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_touch_unknown_is_noop() {
        let mut registry = SessionRegistry::new();
        registry.touch(test_addr(), Instant::now());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_touch_refreshes_and_clears_pending() {
        let mut registry = SessionRegistry::new();
        let start = Instant::now();
        registry.upsert_on_join(test_addr(), 1, start);

        let probe = start + Duration::from_secs(6);
        let outcome = registry.sweep_evict(probe, IDLE_THRESHOLD, EVICT_THRESHOLD);
        assert_eq!(outcome.ping_targets.len(), 1);
        assert!(registry.get(&test_addr()).unwrap().ping_pending);

        registry.touch(test_addr(), probe);
        let session = registry.get(&test_addr()).unwrap();
        assert!(!session.ping_pending);
        assert_eq!(session.last_seen, probe);

        // Fresh again, so nothing happens until the idle window elapses anew
        let outcome = registry.sweep_evict(
            probe + Duration::from_secs(9),
            IDLE_THRESHOLD,
            EVICT_THRESHOLD,
        );
        assert_eq!(outcome.ping_targets.len(), 1);
        assert!(outcome.evicted.is_empty());
    }

    #[test]
    fn test_two_stage_eviction() {
        let mut registry = SessionRegistry::new();
        let start = Instant::now();
        registry.upsert_on_join(test_addr(), 1, start);

        // Still fresh
        let outcome = registry.sweep_evict(
            start + Duration::from_millis(4_900),
            IDLE_THRESHOLD,
            EVICT_THRESHOLD,
        );
        assert!(outcome.ping_targets.is_empty());
        assert!(outcome.evicted.is_empty());

        // Idle: pinged exactly once
        let outcome = registry.sweep_evict(
            start + Duration::from_secs(5),
            IDLE_THRESHOLD,
            EVICT_THRESHOLD,
        );
        assert_eq!(outcome.ping_targets.len(), 1);
        assert!(outcome.evicted.is_empty());

        let outcome = registry.sweep_evict(
            start + Duration::from_secs(6),
            IDLE_THRESHOLD,
            EVICT_THRESHOLD,
        );
        assert!(outcome.ping_targets.is_empty());
        assert!(outcome.evicted.is_empty());

        // Just short of the eviction window
        let outcome = registry.sweep_evict(
            start + Duration::from_millis(9_900),
            IDLE_THRESHOLD,
            EVICT_THRESHOLD,
        );
        assert!(outcome.evicted.is_empty());
        assert_eq!(registry.len(), 1);

        let outcome = registry.sweep_evict(
            start + Duration::from_secs(10),
            IDLE_THRESHOLD,
            EVICT_THRESHOLD,
        );
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].addr, test_addr());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_long_silence_pings_and_evicts_in_one_sweep() {
        let mut registry = SessionRegistry::new();
        let start = Instant::now();
        registry.upsert_on_join(test_addr(), 1, start);

        let outcome = registry.sweep_evict(
            start + Duration::from_secs(30),
            IDLE_THRESHOLD,
            EVICT_THRESHOLD,
        );
        assert_eq!(outcome.ping_targets.len(), 1);
        assert_eq!(outcome.evicted.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_only_touches_idle_sessions() {
        let mut registry = SessionRegistry::new();
        let start = Instant::now();
        registry.upsert_on_join(test_addr(), 1, start);
        registry.upsert_on_join(test_addr2(), 2, start + Duration::from_secs(8));

        let outcome = registry.sweep_evict(
            start + Duration::from_secs(11),
            IDLE_THRESHOLD,
            EVICT_THRESHOLD,
        );

        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].player_id, 1);
        assert!(registry.contains(&test_addr2()));
        assert!(!registry.get(&test_addr2()).unwrap().ping_pending);
    }

    #[test]
    fn test_peers_except() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();
        registry.upsert_on_join(test_addr(), 1, now);
        registry.upsert_on_join(test_addr2(), 2, now);

        assert_eq!(registry.peers_except(test_addr()), vec![test_addr2()]);

        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(registry.peers_except(unknown).len(), 2);
    }

    #[test]
    fn test_id_generator_layout() {
        let ids = IdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();

        assert_ne!(a, b);
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(now_secs - (a >> 32) <= 1);
    }
}
