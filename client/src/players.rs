//! Last-known positions of the other players in the lobby.

use parking_lot::Mutex;
use shared::PlayerTransform;
use std::collections::HashMap;

/// Written by the reader task, snapshotted by host code on any thread.
///
/// Updates are last-write-wins; the protocol carries no sequence numbers,
/// so a late datagram can overwrite a newer position.
#[derive(Debug, Default)]
pub struct PlayerCache {
    players: Mutex<HashMap<u64, PlayerTransform>>,
}

impl PlayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, transform: PlayerTransform) {
        self.players.lock().insert(transform.id, transform);
    }

    pub fn remove(&self, player_id: u64) -> Option<PlayerTransform> {
        self.players.lock().remove(&player_id)
    }

    /// Point-in-time copy, in no particular order.
    pub fn snapshot(&self) -> Vec<PlayerTransform> {
        self.players.lock().values().copied().collect()
    }

    pub fn get(&self, player_id: u64) -> Option<PlayerTransform> {
        self.players.lock().get(&player_id).copied()
    }

    pub fn len(&self) -> usize {
        self.players.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.lock().is_empty()
    }
}
