//! Game engine modules

pub mod combat;
pub mod engine;
pub mod events;
pub mod geometry;
pub mod respawn;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::HitEngine;
pub use events::GameEvent;
pub use session::{GameSession, SessionHandle, SessionSnapshot, StartPolicy};

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::presence::Presence;
use crate::sensor::SensorSource;
use crate::store::{IdentityStore, PlayerRepository};
use crate::ws::protocol::{Heading, PlayerId, Position};
use crate::ws::transport::Transport;

/// External collaborators a session is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub sensor: Arc<dyn SensorSource>,
    pub transport: Arc<dyn Transport>,
    pub presence: Arc<dyn Presence>,
    pub repository: Arc<dyn PlayerRepository>,
    pub identity: Arc<dyn IdentityStore>,
}

/// Commands processed by the session loop, in arrival order
#[derive(Debug)]
pub enum SessionCommand {
    Start {
        policy: StartPolicy,
    },
    /// Deferred start attempt; `chain` ties it to the start request that queued it
    RetryStart {
        policy: StartPolicy,
        remaining: u32,
        chain: u64,
    },
    End,
    Shoot {
        position: Position,
        heading: Heading,
    },
    IdentityChanged(PlayerId),
    RespawnElapsed {
        generation: u64,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
}
