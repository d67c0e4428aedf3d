//! Persistent player records (create-or-update on announce, delete on leave)

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::ws::protocol::{Player, PlayerId};

/// Player persistence collaborator
pub trait PlayerRepository: Send + Sync {
    fn create_or_update(&self, player: &Player);
    fn delete(&self, id: &PlayerId);
}

/// Stored record with the time it was last written
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub player: Player,
    pub updated_at: DateTime<Utc>,
}

/// Process-local repository
#[derive(Default)]
pub struct MemoryPlayerRepository {
    records: DashMap<PlayerId, PlayerRecord>,
}

impl MemoryPlayerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &PlayerId) -> Option<PlayerRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PlayerRepository for MemoryPlayerRepository {
    fn create_or_update(&self, player: &Player) {
        debug!(player_id = %player.id, "Persisting player record");
        self.records.insert(
            player.id.clone(),
            PlayerRecord {
                player: player.clone(),
                updated_at: Utc::now(),
            },
        );
    }

    fn delete(&self, id: &PlayerId) {
        if self.records.remove(id).is_some() {
            debug!(player_id = %id, "Deleted player record");
        }
    }
}
