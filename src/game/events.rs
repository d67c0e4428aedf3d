//! Local notifications raised for UI, haptics and other collaborators

use crate::ws::protocol::PlayerId;

/// One notification per occurrence; no ordering guarantee across kinds
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    SessionStarted { player_id: PlayerId },
    /// No valid position fix after every attempt
    SessionStartFailed { attempts: u32 },
    SessionEnded,

    PlayerWasHit { shooter_id: PlayerId, shot_id: String },
    PlayerDied,
    PlayerRespawned,

    /// A peer reported our shot as a miss
    ShootConfirmed {
        shot_id: Option<String>,
        distance: f64,
        deviation: f64,
    },
    PlayerHitTarget { damage: u32 },
    PlayerKilledTarget { target_id: PlayerId },

    ConnectionLost { error: Option<String> },
}
