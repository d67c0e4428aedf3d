//! Hit-detection engine
//!
//! Evaluates incoming shots against the local fix, applies relayed outcomes to
//! the local session state, and answers shooters with confirmation messages.
//! All methods take `&mut self` and are only called from the session loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::presence::Presence;
use crate::sensor::{local_snapshot, SensorSource};
use crate::store::{PlayerRepository, PlayerStore};
use crate::ws::protocol::{GameMessage, Heading, Payload, Player, PlayerId, Position};
use crate::ws::transport::{Transport, TransportEvent};

use super::combat::{CombatSystem, ShotEvent, ShotVerdict, MAX_LIVES, SHOT_DAMAGE};
use super::events::GameEvent;
use super::geometry::resolve_shot;
use super::respawn::RespawnTimer;
use super::state::{LifeState, SessionState};
use super::{Collaborators, SessionCommand};

/// The hit-detection engine and the state it owns
pub struct HitEngine {
    state: SessionState,
    players: PlayerStore,
    respawn: RespawnTimer,
    push_token: Option<String>,

    sensor: Arc<dyn SensorSource>,
    transport: Arc<dyn Transport>,
    presence: Arc<dyn Presence>,
    repository: Arc<dyn PlayerRepository>,

    events: broadcast::Sender<GameEvent>,
    commands: mpsc::WeakSender<SessionCommand>,
}

impl HitEngine {
    pub fn new(
        collaborators: &Collaborators,
        events: broadcast::Sender<GameEvent>,
        commands: mpsc::WeakSender<SessionCommand>,
        respawn_delay: Duration,
        push_token: Option<String>,
    ) -> Self {
        Self {
            state: SessionState::new(),
            players: PlayerStore::new(),
            respawn: RespawnTimer::new(respawn_delay),
            push_token,
            sensor: collaborators.sensor.clone(),
            transport: collaborators.transport.clone(),
            presence: collaborators.presence.clone(),
            repository: collaborators.repository.clone(),
            events,
            commands,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn players(&self) -> &PlayerStore {
        &self.players
    }

    pub fn respawn_pending(&self) -> bool {
        self.respawn.is_pending()
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Reset lives and score and play as `player_id`
    pub fn begin(&mut self, player_id: PlayerId) {
        self.respawn.reset();
        self.state.begin(player_id);
    }

    /// Drop identity, lives and score; any pending respawn is discarded
    pub fn finish(&mut self) {
        self.respawn.reset();
        self.state.clear();
    }

    /// Swap the local identity mid-session
    pub fn set_identity(&mut self, player_id: PlayerId) {
        self.state.player_id = Some(player_id);
    }

    /// Local snapshot for outgoing messages
    pub fn local_player(&self, id: &PlayerId) -> Player {
        local_snapshot(id, self.sensor.as_ref())
    }

    /// Broadcast a shot fired by the local player. Returns the shot id when sent.
    pub fn shoot(&mut self, position: Position, heading: Heading) -> Option<String> {
        let player_id = self.state.player_id.clone()?;
        if self.state.current_lives == 0 {
            debug!(player_id = %player_id, "Out of lives, shot ignored");
            return None;
        }

        let shot_id = Uuid::new_v4().to_string();
        let player = Player {
            id: player_id.clone(),
            location: position,
            heading,
        };

        info!(player_id = %player_id, shot_id = %shot_id, heading = heading.degrees(), "Shot fired");
        self.transport.send(GameMessage::new(
            player_id,
            player,
            Payload::Shoot {
                shot_id: shot_id.clone(),
            },
        ));
        Some(shot_id)
    }

    /// Transport callback surface
    pub fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected { error } => {
                warn!(error = ?error, "Connection lost");
                self.emit(GameEvent::ConnectionLost { error });
            }
            TransportEvent::Message(msg) => self.apply_incoming_outcome(msg),
        }
    }

    fn on_connected(&mut self) {
        let Some(player_id) = self.state.player_id.clone() else {
            return;
        };

        info!(player_id = %player_id, "Joining game");
        let player = self.local_player(&player_id);
        self.transport.send(GameMessage::new(
            player_id,
            player,
            Payload::Join {
                push_token: self.push_token.clone(),
            },
        ));
    }

    /// Decide whether a peer's shot struck the local player.
    ///
    /// Returns `None`, with no message sent and no state touched, when the shot
    /// is our own, there is no local fix, or the local player cannot be hit.
    pub fn evaluate_incoming_shot(&mut self, shot: &ShotEvent) -> Option<ShotVerdict> {
        let local_id = self.state.player_id.clone()?;
        if shot.shooter == local_id {
            return None;
        }
        if self.state.current_lives == 0 || !self.state.is_alive() {
            debug!(shot_id = %shot.shot_id, "Not targetable, shot ignored");
            return None;
        }
        let Some(target) = self.sensor.current_position() else {
            debug!(shot_id = %shot.shot_id, "No local fix, shot ignored");
            return None;
        };

        let resolution = resolve_shot(&shot.position, shot.heading, &target);
        let verdict = CombatSystem::judge(resolution, shot.position.accuracy);
        let local = self.local_player(&local_id);

        match verdict {
            ShotVerdict::Hit(_) => {
                let (lives, killed) =
                    CombatSystem::apply_damage(self.state.current_lives, SHOT_DAMAGE);
                self.state.current_lives = lives;

                info!(
                    shooter_id = %shot.shooter,
                    shot_id = %shot.shot_id,
                    deviation = resolution.deviation,
                    lives,
                    "Hit by shot"
                );

                let payload = if killed {
                    Payload::Kill {
                        shot_id: Some(shot.shot_id.clone()),
                        target_id: local_id.clone(),
                        damage: SHOT_DAMAGE,
                    }
                } else {
                    Payload::HitConfirmed {
                        shot_id: Some(shot.shot_id.clone()),
                        target_id: local_id.clone(),
                        damage: SHOT_DAMAGE,
                    }
                };
                self.transport.send(
                    GameMessage::new(local_id, local, payload).with_sender(shot.shooter.clone()),
                );
                self.emit(GameEvent::PlayerWasHit {
                    shooter_id: shot.shooter.clone(),
                    shot_id: shot.shot_id.clone(),
                });
            }
            ShotVerdict::Miss(_) => {
                debug!(
                    shooter_id = %shot.shooter,
                    shot_id = %shot.shot_id,
                    distance = resolution.real_distance,
                    deviation = resolution.deviation,
                    "Shot missed"
                );
                self.transport.send(
                    GameMessage::new(
                        local_id.clone(),
                        local,
                        Payload::ShootConfirmed {
                            shot_id: Some(shot.shot_id.clone()),
                            target_id: Some(local_id),
                            distance: resolution.real_distance,
                            deviation: resolution.deviation,
                        },
                    )
                    .with_sender(shot.shooter.clone()),
                );
            }
        }

        self.check_death();
        Some(verdict)
    }

    /// Apply a relayed message to local state
    pub fn apply_incoming_outcome(&mut self, msg: GameMessage) {
        debug!(kind = ?msg.kind(), player_id = %msg.player_id, "Relay message");

        match &msg.payload {
            Payload::Join { .. } => {
                self.presence.upsert_player(&msg.player);
                if self.players.upsert(msg.player) {
                    info!(player_id = %msg.player_id, known = self.players.len(), "Player joined");
                }
            }
            Payload::Announce => {
                self.repository.create_or_update(&msg.player);
                self.players.upsert(msg.player);
            }
            Payload::Shoot { .. } => {
                if let Some(shot) = ShotEvent::from_message(&msg) {
                    self.evaluate_incoming_shot(&shot);
                }
                self.presence.upsert_player(&msg.player);
                self.players.upsert(msg.player);
            }
            Payload::ShootConfirmed {
                shot_id,
                distance,
                deviation,
                ..
            } => {
                self.emit(GameEvent::ShootConfirmed {
                    shot_id: shot_id.clone(),
                    distance: *distance,
                    deviation: *deviation,
                });
            }
            Payload::HitConfirmed { damage, .. } => {
                if self.sent_for_us(&msg) {
                    self.state.score.hits += 1;
                    info!(target_id = %msg.player_id, hits = self.state.score.hits, "Target hit");
                    self.emit(GameEvent::PlayerHitTarget { damage: *damage });
                }
            }
            Payload::Kill { target_id, .. } => {
                if self.sent_for_us(&msg) {
                    self.state.score.kills += 1;
                    info!(target_id = %target_id, kills = self.state.score.kills, "Target eliminated");
                    self.emit(GameEvent::PlayerKilledTarget {
                        target_id: target_id.clone(),
                    });
                }
            }
            Payload::Hit { target_id, damage } => {
                if self.state.is_local(target_id) {
                    let (lives, _) = CombatSystem::apply_damage(self.state.current_lives, *damage);
                    self.state.current_lives = lives;
                    info!(damage, lives, "Took direct damage");
                    self.check_death();
                }
            }
            Payload::Leave => {
                if self.players.remove(&msg.player_id).is_some() {
                    info!(player_id = %msg.player_id, "Player left");
                }
                self.repository.delete(&msg.player_id);
            }
        }
    }

    /// Respawn timer elapsed; stale generations are ignored
    pub fn on_respawn_elapsed(&mut self, generation: u64) {
        if !self.respawn.fire(generation) {
            debug!(generation, "Stale respawn ignored");
            return;
        }

        self.state.current_lives = MAX_LIVES;
        self.state.life = LifeState::Alive;
        info!(lives = MAX_LIVES, "Respawned");
        self.emit(GameEvent::PlayerRespawned);
    }

    /// Alive -> Dead once lives hit zero; a second death while dead is ignored
    fn check_death(&mut self) {
        if self.state.current_lives > 0 || !self.state.is_alive() {
            return;
        }

        self.state.life = LifeState::Dead;
        info!(respawn_in_secs = self.respawn.delay().as_secs(), "Player died");
        self.emit(GameEvent::PlayerDied);

        if self.respawn.schedule(self.commands.clone()).is_none() {
            warn!("Respawn already pending");
        }
    }

    fn sent_for_us(&self, msg: &GameMessage) -> bool {
        msg.sender_id
            .as_ref()
            .is_some_and(|sender| self.state.is_local(sender))
    }

    fn emit(&self, event: GameEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
