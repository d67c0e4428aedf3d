//! Known remote players, keyed by identity

use std::collections::HashMap;

use crate::ws::protocol::{Player, PlayerId};

/// Last known snapshot of every observed participant.
///
/// Writes are last-write-wins in arrival order; message timestamps are not
/// compared, so a late frame can replace a newer position.
#[derive(Debug, Default)]
pub struct PlayerStore {
    players: HashMap<PlayerId, Player>,
}

impl PlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns true when the identity was not known yet
    pub fn upsert(&mut self, player: Player) -> bool {
        self.players.insert(player.id.clone(), player).is_none()
    }

    /// Remove a player; unknown identities are a no-op
    pub fn remove(&mut self, id: &PlayerId) -> Option<Player> {
        self.players.remove(id)
    }

    pub fn get(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
