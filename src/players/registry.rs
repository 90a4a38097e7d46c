//! Insertion-ordered directory of logged-in players.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::player::{Player, PlayerId};
use super::{read_lock, write_lock};
use crate::error::{constants, ProtocolError, Result};

/// Live players behind one reader-writer lock.
///
/// Every access goes through the lock: readers see either the list before a
/// join/leave or the list after it, never a half-applied change.
pub struct PlayerRegistry {
    players: RwLock<Vec<Arc<Player>>>,
    next_id: AtomicU32,
    capacity: usize,
}

impl PlayerRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            players: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate an id for a player about to join
    pub fn next_id(&self) -> PlayerId {
        PlayerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add `player` at the end of the list
    ///
    /// # Errors
    /// `InvalidState` if the registry is at capacity or the name (ignoring
    /// ASCII case) is already present
    pub fn join(&self, player: Arc<Player>) -> Result<()> {
        let mut players = write_lock(&self.players);
        if players.len() >= self.capacity {
            return Err(ProtocolError::InvalidState(constants::ERR_SERVER_FULL));
        }
        if players
            .iter()
            .any(|p| p.username().eq_ignore_ascii_case(player.username()))
        {
            return Err(ProtocolError::InvalidState(constants::ERR_DUPLICATE_PLAYER));
        }
        players.try_reserve(1)?;
        info!(player = %player.username(), id = %player.id(), online = players.len() + 1, "Player joined");
        players.push(player);
        Ok(())
    }

    /// Remove the player with `id`, keeping the order of the rest
    pub fn leave(&self, id: PlayerId) -> Option<Arc<Player>> {
        let mut players = write_lock(&self.players);
        let index = players.iter().position(|p| p.id() == id)?;
        let player = players.remove(index);
        info!(player = %player.username(), id = %id, online = players.len(), "Player left");
        Some(player)
    }

    pub fn len(&self) -> usize {
        read_lock(&self.players).len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.players).is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.find_by_name(name).is_some()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Player>> {
        read_lock(&self.players)
            .iter()
            .find(|p| p.username().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Copy of the current list, in join order
    pub fn snapshot(&self) -> Vec<Arc<Player>> {
        read_lock(&self.players).clone()
    }

    /// Run `f` over the list while holding the read lock
    pub fn with_players<R>(&self, f: impl FnOnce(&[Arc<Player>]) -> R) -> R {
        let players = read_lock(&self.players);
        debug!(count = players.len(), "Registry read");
        f(&players)
    }
}
