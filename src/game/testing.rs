//! Recording fakes for the session collaborators

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::presence::Presence;
use crate::sensor::LatestFix;
use crate::store::{IdentityStore, MemoryPlayerRepository, StoreError};
use crate::ws::protocol::{GameMessage, Heading, Payload, Player, PlayerId, Position};
use crate::ws::transport::Transport;

use super::combat::ShotEvent;
use super::{Collaborators, GameEvent, HitEngine, SessionCommand};

pub const LOCAL: &str = "local-player";
pub const SHOOTER: &str = "remote-shooter";
pub const RESPAWN_DELAY: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<GameMessage>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<GameMessage> {
        self.sent.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn send(&self, message: GameMessage) {
        self.sent.lock().push(message);
    }
}

#[derive(Default)]
pub struct RecordingPresence {
    upserts: Mutex<Vec<PlayerId>>,
    heartbeats: Mutex<Vec<PlayerId>>,
    beating: Mutex<Option<PlayerId>>,
}

impl RecordingPresence {
    pub fn upserts(&self) -> Vec<PlayerId> {
        self.upserts.lock().clone()
    }

    /// Every identity a heartbeat was started for, in order
    pub fn heartbeats(&self) -> Vec<PlayerId> {
        self.heartbeats.lock().clone()
    }

    pub fn beating(&self) -> Option<PlayerId> {
        self.beating.lock().clone()
    }
}

impl Presence for RecordingPresence {
    fn start_heartbeat(&self, player_id: &PlayerId) {
        self.heartbeats.lock().push(player_id.clone());
        *self.beating.lock() = Some(player_id.clone());
    }

    fn stop_heartbeat(&self) {
        *self.beating.lock() = None;
    }

    fn upsert_player(&self, player: &Player) {
        self.upserts.lock().push(player.id.clone());
    }
}

/// In-memory identity store; `broken()` fails every call
#[derive(Default)]
pub struct MemoryIdentity {
    stored: Mutex<Option<String>>,
    broken: bool,
}

impl MemoryIdentity {
    pub fn with(id: &str) -> Self {
        Self {
            stored: Mutex::new(Some(id.to_string())),
            broken: false,
        }
    }

    pub fn broken() -> Self {
        Self {
            stored: Mutex::new(None),
            broken: true,
        }
    }

    pub fn stored(&self) -> Option<String> {
        self.stored.lock().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.broken {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "keychain locked").into());
        }
        Ok(())
    }
}

impl IdentityStore for MemoryIdentity {
    fn read_identity(&self) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.stored.lock().clone())
    }

    fn save_identity(&self, id: &str) -> Result<(), StoreError> {
        self.check()?;
        *self.stored.lock() = Some(id.to_string());
        Ok(())
    }
}

/// Concrete fakes plus the `Collaborators` view over them
pub struct Fakes {
    pub sensor: Arc<LatestFix>,
    pub transport: Arc<RecordingTransport>,
    pub presence: Arc<RecordingPresence>,
    pub repository: Arc<MemoryPlayerRepository>,
    pub identity: Arc<MemoryIdentity>,
}

impl Fakes {
    pub fn new(identity: MemoryIdentity) -> Self {
        Self {
            sensor: Arc::new(LatestFix::new()),
            transport: Arc::new(RecordingTransport::default()),
            presence: Arc::new(RecordingPresence::default()),
            repository: Arc::new(MemoryPlayerRepository::new()),
            identity: Arc::new(identity),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            sensor: self.sensor.clone(),
            transport: self.transport.clone(),
            presence: self.presence.clone(),
            repository: self.repository.clone(),
            identity: self.identity.clone(),
        }
    }
}

/// A bare engine driven directly, without the session loop
pub struct Harness {
    pub engine: HitEngine,
    pub sensor: Arc<LatestFix>,
    pub transport: Arc<RecordingTransport>,
    pub presence: Arc<RecordingPresence>,
    pub repository: Arc<MemoryPlayerRepository>,
    events: broadcast::Receiver<GameEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    // keeps the weak sender held by the engine upgradable
    _commands_tx: mpsc::Sender<SessionCommand>,
}

impl Harness {
    /// Local player at `local` with no session started
    pub fn inactive(local: Position) -> Self {
        let fakes = Fakes::new(MemoryIdentity::default());
        fakes.sensor.update_position(local);

        let (events_tx, events) = broadcast::channel(64);
        let (commands_tx, commands) = mpsc::channel(8);
        let engine = HitEngine::new(
            &fakes.collaborators(),
            events_tx,
            commands_tx.downgrade(),
            RESPAWN_DELAY,
            Some("push-token".into()),
        );

        Self {
            engine,
            sensor: fakes.sensor,
            transport: fakes.transport,
            presence: fakes.presence,
            repository: fakes.repository,
            events,
            commands,
            _commands_tx: commands_tx,
        }
    }

    /// Local player at `local` playing as `LOCAL`
    pub fn active(local: Position) -> Self {
        let mut harness = Self::inactive(local);
        harness.engine.begin(PlayerId::from(LOCAL));
        harness
    }

    pub fn set_lives(&mut self, lives: u32) {
        self.engine.state_mut().current_lives = lives;
    }

    /// Shot from `SHOOTER` fired at `from` along `heading`
    pub fn shot(&self, from: Position, heading: f64) -> ShotEvent {
        ShotEvent {
            shooter: PlayerId::from(SHOOTER),
            position: from,
            heading: Heading::from_degrees(heading),
            shot_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn next_event(&mut self) -> Option<GameEvent> {
        self.events.try_recv().ok()
    }

    pub fn try_command(&mut self) -> Option<SessionCommand> {
        self.commands.try_recv().ok()
    }
}

/// Relay message from `from`, standing at the origin facing east
pub fn message(from: &str, payload: Payload) -> GameMessage {
    remote_message(from, Position::new(0.0, 0.0).with_accuracy(10.0), 90.0, payload)
}

pub fn remote_message(from: &str, location: Position, heading: f64, payload: Payload) -> GameMessage {
    let id = PlayerId::from(from);
    GameMessage::new(
        id.clone(),
        Player {
            id,
            location,
            heading: Heading::from_degrees(heading),
        },
        payload,
    )
}
