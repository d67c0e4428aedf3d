//! Relay protocol message definitions
//! These are the wire types exchanged between peers through the relay

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable per-device player identifier (wallet address or generated UUID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// GPS fix snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// Meters
    pub altitude: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Self::default()
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Coordinates a receiver can reason about
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// True heading in degrees, always in [0, 360), including when decoded
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Heading(f64);

impl Heading {
    /// Normalizes into [0, 360)
    pub fn from_degrees(degrees: f64) -> Self {
        Self(degrees.rem_euclid(360.0))
    }

    pub fn degrees(self) -> f64 {
        self.0
    }
}

impl From<f64> for Heading {
    fn from(degrees: f64) -> Self {
        Self::from_degrees(degrees)
    }
}

impl From<Heading> for f64 {
    fn from(heading: Heading) -> Self {
        heading.0
    }
}

/// Player snapshot carried by every message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub location: Position,
    pub heading: Heading,
}

/// Message kinds as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Join,
    Shoot,
    ShootConfirmed,
    HitConfirmed,
    Hit,
    Kill,
    Leave,
    #[serde(rename = "announced", alias = "announce")]
    Announce,
}

/// Flat payload as sent by peers; which fields are present depends on the kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub player: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_player_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
}

/// Envelope as sent by peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub player_id: PlayerId,
    pub data: MessageData,
    pub timestamp: DateTime<Utc>,
    /// Relay/sender override; names the shooter on confirmation replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
}

/// Kind-specific payload, carrying only what that kind needs
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Peer entered the game
    Join { push_token: Option<String> },

    /// Peer fired a shot
    Shoot { shot_id: String },

    /// Target evaluated a shot as a miss
    ShootConfirmed {
        shot_id: Option<String>,
        target_id: Option<PlayerId>,
        distance: f64,
        deviation: f64,
    },

    /// Target took a hit and is still alive
    HitConfirmed {
        shot_id: Option<String>,
        target_id: PlayerId,
        damage: u32,
    },

    /// Direct damage against a target
    Hit { target_id: PlayerId, damage: u32 },

    /// Target took the hit that eliminated it
    Kill {
        shot_id: Option<String>,
        target_id: PlayerId,
        damage: u32,
    },

    /// Peer left the game
    Leave,

    /// Periodic presence broadcast
    Announce,
}

impl Payload {
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Join { .. } => MessageType::Join,
            Self::Shoot { .. } => MessageType::Shoot,
            Self::ShootConfirmed { .. } => MessageType::ShootConfirmed,
            Self::HitConfirmed { .. } => MessageType::HitConfirmed,
            Self::Hit { .. } => MessageType::Hit,
            Self::Kill { .. } => MessageType::Kill,
            Self::Leave => MessageType::Leave,
            Self::Announce => MessageType::Announce,
        }
    }
}

/// Validated message, the only form the engine handles
#[derive(Debug, Clone, PartialEq)]
pub struct GameMessage {
    pub player_id: PlayerId,
    pub timestamp: DateTime<Utc>,
    pub sender_id: Option<PlayerId>,
    pub player: Player,
    pub payload: Payload,
}

impl GameMessage {
    /// Create a message stamped with the current time
    pub fn new(player_id: PlayerId, player: Player, payload: Payload) -> Self {
        Self {
            player_id,
            timestamp: Utc::now(),
            sender_id: None,
            player,
            payload,
        }
    }

    pub fn with_sender(mut self, sender_id: PlayerId) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn kind(&self) -> MessageType {
        self.payload.kind()
    }

    /// Parse and validate a relay frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let wire: WireMessage = serde_json::from_str(text)?;
        Self::try_from(wire)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&WireMessage::from(self.clone()))?)
    }
}

impl TryFrom<WireMessage> for GameMessage {
    type Error = ProtocolError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        if wire.player_id.as_str().is_empty() {
            return Err(ProtocolError::Invalid {
                kind: wire.kind,
                field: "playerId",
            });
        }

        let kind = wire.kind;
        let data = wire.data;
        let missing = |field| ProtocolError::MissingField { kind, field };
        let damage = || match data.damage {
            None => Ok(0),
            Some(d) => u32::try_from(d).map_err(|_| ProtocolError::Invalid {
                kind,
                field: "damage",
            }),
        };

        let payload = match kind {
            MessageType::Join => Payload::Join {
                push_token: wire.push_token,
            },
            MessageType::Shoot => Payload::Shoot {
                shot_id: data.shot_id.clone().ok_or_else(|| missing("shotId"))?,
            },
            MessageType::ShootConfirmed => Payload::ShootConfirmed {
                shot_id: data.shot_id.clone(),
                target_id: data.hit_player_id.clone(),
                distance: data.distance.ok_or_else(|| missing("distance"))?,
                deviation: data.deviation.ok_or_else(|| missing("deviation"))?,
            },
            MessageType::HitConfirmed => Payload::HitConfirmed {
                shot_id: data.shot_id.clone(),
                target_id: data.hit_player_id.clone().ok_or_else(|| missing("hitPlayerId"))?,
                damage: damage()?,
            },
            MessageType::Hit => Payload::Hit {
                target_id: data.hit_player_id.clone().ok_or_else(|| missing("hitPlayerId"))?,
                damage: damage()?,
            },
            MessageType::Kill => Payload::Kill {
                shot_id: data.shot_id.clone(),
                target_id: data.hit_player_id.clone().ok_or_else(|| missing("hitPlayerId"))?,
                damage: damage()?,
            },
            MessageType::Leave => Payload::Leave,
            MessageType::Announce => Payload::Announce,
        };

        Ok(Self {
            player_id: wire.player_id,
            timestamp: wire.timestamp,
            sender_id: wire.sender_id,
            player: data.player,
            payload,
        })
    }
}

impl From<GameMessage> for WireMessage {
    fn from(msg: GameMessage) -> Self {
        let kind = msg.kind();
        let mut data = MessageData {
            player: msg.player,
            shot_id: None,
            hit_player_id: None,
            damage: None,
            distance: None,
            deviation: None,
        };
        let mut push_token = None;

        let as_wire_damage = |d: u32| Some(i32::try_from(d).unwrap_or(i32::MAX));

        match msg.payload {
            Payload::Join { push_token: token } => push_token = token,
            Payload::Shoot { shot_id } => {
                data.shot_id = Some(shot_id);
                data.damage = Some(0);
            }
            Payload::ShootConfirmed {
                shot_id,
                target_id,
                distance,
                deviation,
            } => {
                data.shot_id = shot_id;
                data.hit_player_id = target_id;
                data.damage = Some(0);
                data.distance = Some(distance);
                data.deviation = Some(deviation);
            }
            Payload::HitConfirmed {
                shot_id,
                target_id,
                damage,
            }
            | Payload::Kill {
                shot_id,
                target_id,
                damage,
            } => {
                data.shot_id = shot_id;
                data.hit_player_id = Some(target_id);
                data.damage = as_wire_damage(damage);
            }
            Payload::Hit { target_id, damage } => {
                data.hit_player_id = Some(target_id);
                data.damage = as_wire_damage(damage);
            }
            Payload::Leave | Payload::Announce => {}
        }

        Self {
            kind,
            player_id: msg.player_id,
            data,
            timestamp: msg.timestamp,
            sender_id: msg.sender_id,
            push_token,
        }
    }
}

/// Protocol errors; the offending frame is dropped
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind:?} message is missing {field}")]
    MissingField {
        kind: MessageType,
        field: &'static str,
    },

    #[error("{kind:?} message has invalid {field}")]
    Invalid {
        kind: MessageType,
        field: &'static str,
    },
}
