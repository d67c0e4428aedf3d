//! Local session state: lives, score, identity

use crate::ws::protocol::PlayerId;

use super::combat::MAX_LIVES;

/// Whether a game session is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Inactive,
    Active,
}

/// Local player's life substate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Alive,
    /// Dead, waiting for the respawn cool-down
    Dead,
}

/// Local score; only ever increases within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GameScore {
    /// Shots that landed
    pub hits: u32,
    /// Eliminations
    pub kills: u32,
}

/// Local player state for one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub life: LifeState,
    pub current_lives: u32,
    pub player_id: Option<PlayerId>,
    pub score: GameScore,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Inactive,
            life: LifeState::Alive,
            current_lives: MAX_LIVES,
            player_id: None,
            score: GameScore::default(),
        }
    }

    /// Fresh state for a session played as `player_id`
    pub fn begin(&mut self, player_id: PlayerId) {
        *self = Self {
            phase: SessionPhase::Active,
            player_id: Some(player_id),
            ..Self::new()
        };
    }

    /// Back to the inactive defaults
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn is_alive(&self) -> bool {
        self.life == LifeState::Alive
    }

    pub fn is_local(&self, id: &PlayerId) -> bool {
        self.player_id.as_ref() == Some(id)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
