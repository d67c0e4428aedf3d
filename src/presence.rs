//! Presence - heartbeat announcements and the roster of recently seen players

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::sensor::{local_snapshot, SensorSource};
use crate::ws::protocol::{GameMessage, Payload, Player, PlayerId};
use crate::ws::transport::Transport;

/// Presence/heartbeat collaborator
pub trait Presence: Send + Sync {
    fn start_heartbeat(&self, player_id: &PlayerId);
    fn stop_heartbeat(&self);
    fn upsert_player(&self, player: &Player);
}

/// Heartbeat that broadcasts an `announce` with the local snapshot on a fixed cadence
pub struct AnnouncePresence {
    transport: Arc<dyn Transport>,
    sensor: Arc<dyn SensorSource>,
    every: Duration,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    last_seen: DashMap<PlayerId, DateTime<Utc>>,
}

impl AnnouncePresence {
    pub fn new(transport: Arc<dyn Transport>, sensor: Arc<dyn SensorSource>, every: Duration) -> Self {
        Self {
            transport,
            sensor,
            every,
            heartbeat: Mutex::new(None),
            last_seen: DashMap::new(),
        }
    }

    pub fn last_seen(&self, id: &PlayerId) -> Option<DateTime<Utc>> {
        self.last_seen.get(id).map(|t| *t.value())
    }

    /// Players seen within `window`
    pub fn active_count(&self, window: chrono::Duration) -> usize {
        let cutoff = Utc::now() - window;
        self.last_seen.iter().filter(|e| *e.value() >= cutoff).count()
    }

    pub fn is_beating(&self) -> bool {
        self.heartbeat
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Presence for AnnouncePresence {
    fn start_heartbeat(&self, player_id: &PlayerId) {
        let mut slot = self.heartbeat.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        info!(player_id = %player_id, every_secs = self.every.as_secs(), "Starting heartbeat");

        let transport = self.transport.clone();
        let sensor = self.sensor.clone();
        let player_id = player_id.clone();
        let every = self.every;
        // first beat one period out; the link is not up yet and `join` covers arrival
        let first = Instant::now() + every;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let player = local_snapshot(&player_id, sensor.as_ref());
                transport.send(GameMessage::new(player_id.clone(), player, Payload::Announce));
            }
        }));
    }

    fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat.lock().take() {
            info!("Stopping heartbeat");
            task.abort();
        }
    }

    fn upsert_player(&self, player: &Player) {
        debug!(player_id = %player.id, "Presence update");
        self.last_seen.insert(player.id.clone(), Utc::now());
    }
}

impl Drop for AnnouncePresence {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.get_mut().take() {
            task.abort();
        }
    }
}
