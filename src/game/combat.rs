//! Combat rules - lives, damage, and the hit/miss verdict

use chrono::{DateTime, Utc};

use crate::ws::protocol::{GameMessage, Heading, Payload, PlayerId, Position};

use super::geometry::ShotResolution;

/// Lives at session start and after every respawn
pub const MAX_LIVES: u32 = 10;

/// Damage dealt by one geometric hit
pub const SHOT_DAMAGE: u32 = 1;

/// A shot reported by a peer
#[derive(Debug, Clone, PartialEq)]
pub struct ShotEvent {
    pub shooter: PlayerId,
    pub position: Position,
    pub heading: Heading,
    pub shot_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ShotEvent {
    /// Extract the shot from a `shoot` message
    pub fn from_message(msg: &GameMessage) -> Option<Self> {
        match &msg.payload {
            Payload::Shoot { shot_id } => Some(Self {
                shooter: msg.player_id.clone(),
                position: msg.player.location,
                heading: msg.player.heading,
                shot_id: shot_id.clone(),
                timestamp: msg.timestamp,
            }),
            _ => None,
        }
    }
}

/// Verdict for a shot evaluated against the local player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShotVerdict {
    Hit(ShotResolution),
    Miss(ShotResolution),
}

impl ShotVerdict {
    pub fn resolution(&self) -> &ShotResolution {
        match self {
            Self::Hit(r) | Self::Miss(r) => r,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Combat system for damage and verdicts
pub struct CombatSystem;

impl CombatSystem {
    /// Hit tolerance radius for a shooter-reported accuracy
    pub fn precision(accuracy: f64) -> f64 {
        accuracy / 2.0
    }

    /// Hit when the miss distance is within half the shooter's accuracy.
    /// NaN deviations compare false and count as misses.
    pub fn judge(resolution: ShotResolution, shooter_accuracy: f64) -> ShotVerdict {
        if resolution.deviation.abs() <= Self::precision(shooter_accuracy) {
            ShotVerdict::Hit(resolution)
        } else {
            ShotVerdict::Miss(resolution)
        }
    }

    /// Apply damage to lives, returns (new_lives, is_dead)
    pub fn apply_damage(current_lives: u32, damage: u32) -> (u32, bool) {
        let new_lives = current_lives.saturating_sub(damage);
        (new_lives, new_lives == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolution(deviation: f64) -> ShotResolution {
        ShotResolution {
            real_distance: 100.0,
            azimuth: 0.0,
            degree_diff: 0.0,
            deviation,
        }
    }

    #[test]
    fn test_judge_uses_half_accuracy() {
        assert!(CombatSystem::judge(resolution(5.0), 10.0).is_hit());
        assert!(CombatSystem::judge(resolution(-5.0), 10.0).is_hit());
        assert!(!CombatSystem::judge(resolution(5.01), 10.0).is_hit());
    }

    #[test]
    fn test_zero_deviation_hits_with_zero_accuracy() {
        assert!(CombatSystem::judge(resolution(0.0), 0.0).is_hit());
        assert!(!CombatSystem::judge(resolution(0.0), -1.0).is_hit());
    }

    #[test]
    fn test_nan_deviation_is_a_miss() {
        assert!(!CombatSystem::judge(resolution(f64::NAN), 1000.0).is_hit());
    }

    #[test]
    fn test_apply_damage_floors_at_zero() {
        assert_eq!(CombatSystem::apply_damage(10, 1), (9, false));
        assert_eq!(CombatSystem::apply_damage(1, 1), (0, true));
        assert_eq!(CombatSystem::apply_damage(3, 7), (0, true));
        assert_eq!(CombatSystem::apply_damage(0, 0), (0, true));
    }
}
