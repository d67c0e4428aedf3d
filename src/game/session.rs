//! Game session controller
//!
//! `GameSession` is the single owner of session and player state. Everything
//! that can mutate it arrives through one of two queues: commands from
//! `SessionHandle`s (and from its own timers), and events from the transport.
//! The loop drains both in arrival order, so no state is ever shared.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::ws::protocol::{GameMessage, Heading, Payload, PlayerId, Position};
use crate::ws::transport::TransportEvent;

use super::engine::HitEngine;
use super::events::GameEvent;
use super::state::SessionState;
use super::{Collaborators, SessionCommand};

const COMMAND_QUEUE: usize = 256;
const EVENT_CAPACITY: usize = 256;

/// How long to wait for a valid position fix before giving up on a start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPolicy {
    /// Retries after the first attempt
    pub attempts: u32,
    /// Delay before each retry
    pub delay: Duration,
}

impl StartPolicy {
    /// The longer policy used when the caller expects a slow first fix
    pub fn extended() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

impl Default for StartPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Session-level settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub respawn_delay: Duration,
    pub start_policy: StartPolicy,
    pub wallet_address: Option<String>,
    pub push_token: Option<String>,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            respawn_delay: config.respawn_delay,
            start_policy: config.start_policy,
            wallet_address: config.wallet_address.clone(),
            push_token: config.push_token.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            respawn_delay: Duration::from_secs(60),
            start_policy: StartPolicy::default(),
            wallet_address: None,
            push_token: None,
        }
    }
}

/// Point-in-time view of the session, answered by the loop
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub known_players: usize,
    pub respawn_pending: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session loop has stopped")]
    Closed,
}

/// The session actor
pub struct GameSession {
    engine: HitEngine,
    collaborators: Collaborators,
    settings: SessionSettings,
    commands: mpsc::Receiver<SessionCommand>,
    commands_tx: mpsc::WeakSender<SessionCommand>,
    transport_events: mpsc::Receiver<TransportEvent>,
    events: broadcast::Sender<GameEvent>,
    start_chain: u64,
}

impl GameSession {
    /// Build the session and a handle to drive it. The loop stops once every
    /// handle is dropped.
    pub fn new(
        collaborators: Collaborators,
        transport_events: mpsc::Receiver<TransportEvent>,
        settings: SessionSettings,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let settings_policy = settings.start_policy;

        let engine = HitEngine::new(
            &collaborators,
            events.clone(),
            commands_tx.downgrade(),
            settings.respawn_delay,
            settings.push_token.clone(),
        );

        let session = Self {
            engine,
            collaborators,
            commands_tx: commands_tx.downgrade(),
            commands,
            transport_events,
            events: events.clone(),
            settings,
            start_chain: 0,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            events,
            start_policy: settings_policy,
        };

        (session, handle)
    }

    /// Run the session loop
    pub async fn run(mut self) {
        info!("Session loop started");

        loop {
            // transport first: a command never overtakes an event queued before it
            tokio::select! {
                biased;

                Some(event) = self.transport_events.recv() => {
                    self.engine.on_transport_event(event);
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
            }
        }

        self.end();
        info!("Session loop stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { policy } => self.start(policy),
            SessionCommand::RetryStart {
                policy,
                remaining,
                chain,
            } => self.try_start(policy, remaining, chain),
            SessionCommand::End => self.end(),
            SessionCommand::Shoot { position, heading } => {
                self.engine.shoot(position, heading);
            }
            SessionCommand::IdentityChanged(player_id) => self.identity_changed(player_id),
            SessionCommand::RespawnElapsed { generation } => {
                self.engine.on_respawn_elapsed(generation)
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    state: self.engine.state().clone(),
                    known_players: self.engine.players().len(),
                    respawn_pending: self.engine.respawn_pending(),
                });
            }
        }
    }

    fn start(&mut self, policy: StartPolicy) {
        if self.engine.state().is_active() {
            debug!("Session already active");
            return;
        }

        // a new request supersedes any retries still queued
        self.start_chain += 1;
        info!(attempts = policy.attempts, delay_ms = policy.delay.as_millis() as u64, "Starting session");
        self.try_start(policy, policy.attempts, self.start_chain);
    }

    fn try_start(&mut self, policy: StartPolicy, remaining: u32, chain: u64) {
        if chain != self.start_chain || self.engine.state().is_active() {
            debug!(chain, "Stale start attempt ignored");
            return;
        }

        let has_fix = self
            .collaborators
            .sensor
            .current_position()
            .is_some_and(|p| p.is_valid());

        if has_fix {
            self.begin();
        } else if remaining > 0 {
            warn!(remaining, "No valid position fix, retrying");
            self.schedule_retry(policy, remaining - 1, chain);
        } else {
            let attempts = policy.attempts.saturating_add(1);
            warn!(attempts, "No valid position fix, session not started");
            self.emit(GameEvent::SessionStartFailed { attempts });
        }
    }

    fn schedule_retry(&self, policy: StartPolicy, remaining: u32, chain: u64) {
        let commands = self.commands_tx.clone();
        tokio::spawn(async move {
            sleep(policy.delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx
                    .send(SessionCommand::RetryStart {
                        policy,
                        remaining,
                        chain,
                    })
                    .await;
            }
        });
    }

    fn begin(&mut self) {
        let player_id = self.resolve_identity();

        self.engine.begin(player_id.clone());
        self.collaborators.transport.connect();
        self.collaborators.presence.start_heartbeat(&player_id);

        info!(player_id = %player_id, "Session started");
        self.emit(GameEvent::SessionStarted { player_id });
    }

    /// Wallet address first, then the persisted identity, then a fresh UUID
    fn resolve_identity(&self) -> PlayerId {
        if let Some(wallet) = &self.settings.wallet_address {
            return PlayerId::new(wallet.clone());
        }

        let store = &self.collaborators.identity;
        match store.read_identity() {
            Ok(Some(id)) => return PlayerId::new(id),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read identity"),
        }

        let minted = Uuid::new_v4().to_string();
        if let Err(e) = store.save_identity(&minted) {
            warn!(error = %e, "Failed to persist identity");
        }
        info!(player_id = %minted, "Generated new identity");
        PlayerId::new(minted)
    }

    fn end(&mut self) {
        self.start_chain += 1;

        let Some(player_id) = self.engine.state().player_id.clone() else {
            return;
        };

        let player = self.engine.local_player(&player_id);
        self.collaborators
            .transport
            .send(GameMessage::new(player_id.clone(), player, Payload::Leave));
        self.collaborators.transport.disconnect();
        self.collaborators.presence.stop_heartbeat();
        self.engine.finish();

        info!(player_id = %player_id, "Session ended");
        self.emit(GameEvent::SessionEnded);
    }

    fn identity_changed(&mut self, player_id: PlayerId) {
        self.settings.wallet_address = Some(player_id.to_string());

        if !self.engine.state().is_active() {
            debug!(player_id = %player_id, "Identity changed while inactive");
            return;
        }
        if self.engine.state().is_local(&player_id) {
            return;
        }

        info!(player_id = %player_id, "Identity changed, reconnecting");
        self.engine.set_identity(player_id.clone());
        self.collaborators.transport.disconnect();
        self.collaborators.transport.connect();
        self.collaborators.presence.start_heartbeat(&player_id);
    }

    fn emit(&self, event: GameEvent) {
        let _ = self.events.send(event);
    }
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<GameEvent>,
    start_policy: StartPolicy,
}

impl SessionHandle {
    /// Start with the configured policy (3 retries, 2 s apart unless overridden)
    pub async fn start_session(&self) -> Result<(), SessionError> {
        self.start_session_with(self.start_policy).await
    }

    /// Start with the extended policy (5 retries, 3 s apart)
    pub async fn start_session_extended(&self) -> Result<(), SessionError> {
        self.start_session_with(StartPolicy::extended()).await
    }

    pub async fn start_session_with(&self, policy: StartPolicy) -> Result<(), SessionError> {
        self.send(SessionCommand::Start { policy }).await
    }

    pub async fn end_session(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::End).await
    }

    pub async fn shoot(&self, position: Position, heading: Heading) -> Result<(), SessionError> {
        self.send(SessionCommand::Shoot { position, heading }).await
    }

    /// External wallet/identity-change signal
    pub async fn identity_changed(&self, player_id: PlayerId) -> Result<(), SessionError> {
        self.send(SessionCommand::IdentityChanged(player_id)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::MAX_LIVES;
    use crate::game::testing::{remote_message, Fakes, MemoryIdentity, SHOOTER};
    use crate::ws::protocol::MessageType;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    struct Rig {
        fakes: Fakes,
        handle: SessionHandle,
        events: broadcast::Receiver<GameEvent>,
        transport_tx: mpsc::Sender<TransportEvent>,
    }

    fn rig_with(identity: MemoryIdentity, settings: SessionSettings) -> Rig {
        let fakes = Fakes::new(identity);
        let (transport_tx, transport_rx) = mpsc::channel(64);
        let (session, handle) = GameSession::new(fakes.collaborators(), transport_rx, settings);
        let events = handle.subscribe();
        tokio::spawn(session.run());

        Rig {
            fakes,
            handle,
            events,
            transport_tx,
        }
    }

    fn rig() -> Rig {
        rig_with(MemoryIdentity::default(), SessionSettings::default())
    }

    async fn started(rig: &mut Rig) -> PlayerId {
        rig.fakes.sensor.update_position(Position::new(0.0, 0.0).with_accuracy(5.0));
        rig.handle.start_session().await.unwrap();
        match rig.events.recv().await.unwrap() {
            GameEvent::SessionStarted { player_id } => player_id,
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_fix() {
        let mut rig = rig();
        let player_id = started(&mut rig).await;

        let snap = rig.handle.snapshot().await.unwrap();
        assert!(snap.state.is_active());
        assert_eq!(snap.state.current_lives, MAX_LIVES);
        assert_eq!(snap.state.player_id.as_ref(), Some(&player_id));

        assert_eq!(rig.fakes.transport.connects(), 1);
        assert_eq!(rig.fakes.presence.beating(), Some(player_id.clone()));
        // minted identity is persisted
        assert_eq!(rig.fakes.identity.stored(), Some(player_id.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_fix_gives_up() {
        let mut rig = rig();
        let began = Instant::now();

        rig.handle.start_session().await.unwrap();
        assert_eq!(
            rig.events.recv().await.unwrap(),
            GameEvent::SessionStartFailed { attempts: 4 }
        );
        assert!(began.elapsed() >= Duration::from_secs(6));
        assert!(began.elapsed() < Duration::from_secs(7));

        let snap = rig.handle.snapshot().await.unwrap();
        assert!(!snap.state.is_active());
        assert_eq!(rig.fakes.transport.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extended_policy_waits_longer() {
        let mut rig = rig();
        let began = Instant::now();

        rig.handle.start_session_extended().await.unwrap();
        assert_eq!(
            rig.events.recv().await.unwrap(),
            GameEvent::SessionStartFailed { attempts: 6 }
        );
        assert!(began.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_arriving_during_retries_starts() {
        let mut rig = rig();
        rig.handle.start_session().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        rig.fakes.sensor.update_position(Position::new(1.0, 1.0));

        assert!(matches!(
            rig.events.recv().await.unwrap(),
            GameEvent::SessionStarted { .. }
        ));
        assert!(rig.handle.snapshot().await.unwrap().state.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_fix_is_not_enough() {
        let mut rig = rig();
        rig.fakes.sensor.update_position(Position::new(120.0, 0.0));

        rig.handle
            .start_session_with(StartPolicy {
                attempts: 0,
                delay: Duration::from_secs(1),
            })
            .await
            .unwrap();
        assert_eq!(
            rig.events.recv().await.unwrap(),
            GameEvent::SessionStartFailed { attempts: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_cancels_pending_retries() {
        let mut rig = rig();
        rig.handle.start_session().await.unwrap();
        rig.handle.end_session().await.unwrap();

        rig.fakes.sensor.update_position(Position::new(1.0, 1.0));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!rig.handle.snapshot().await.unwrap().state.is_active());
        assert_eq!(rig.events.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_is_idempotent() {
        let mut rig = rig();
        let player_id = started(&mut rig).await;

        rig.handle.end_session().await.unwrap();
        rig.handle.end_session().await.unwrap();
        let snap = rig.handle.snapshot().await.unwrap();

        assert_eq!(rig.events.recv().await.unwrap(), GameEvent::SessionEnded);
        assert_eq!(rig.events.try_recv(), Err(TryRecvError::Empty));

        assert!(!snap.state.is_active());
        assert_eq!(snap.state.player_id, None);
        assert_eq!(snap.state.current_lives, MAX_LIVES);
        assert_eq!(rig.fakes.transport.disconnects(), 1);
        assert_eq!(rig.fakes.presence.beating(), None);

        let sent = rig.fakes.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), MessageType::Leave);
        assert_eq!(sent[0].player_id, player_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_identity_wins() {
        let settings = SessionSettings {
            wallet_address: Some("0xabc".into()),
            ..SessionSettings::default()
        };
        let mut rig = rig_with(MemoryIdentity::with("persisted"), settings);

        assert_eq!(started(&mut rig).await, PlayerId::from("0xabc"));
        assert_eq!(rig.fakes.identity.stored().as_deref(), Some("persisted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisted_identity_is_reused() {
        let mut rig = rig_with(MemoryIdentity::with("persisted"), SessionSettings::default());
        assert_eq!(started(&mut rig).await, PlayerId::from("persisted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_identity_store_still_starts() {
        let mut rig = rig_with(MemoryIdentity::broken(), SessionSettings::default());
        let player_id = started(&mut rig).await;
        assert!(Uuid::parse_str(player_id.as_str()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_reconnects() {
        let mut rig = rig();
        started(&mut rig).await;

        let wallet = PlayerId::from("0xwallet");
        rig.handle.identity_changed(wallet.clone()).await.unwrap();
        let snap = rig.handle.snapshot().await.unwrap();

        assert_eq!(snap.state.player_id, Some(wallet.clone()));
        assert_eq!(rig.fakes.transport.disconnects(), 1);
        assert_eq!(rig.fakes.transport.connects(), 2);
        assert_eq!(rig.fakes.presence.beating(), Some(wallet.clone()));
        assert_eq!(rig.fakes.presence.heartbeats().len(), 2);

        // the reconnect joins under the new identity
        rig.transport_tx.send(TransportEvent::Connected).await.unwrap();
        rig.handle.snapshot().await.unwrap();
        let join = rig.fakes.transport.sent().pop().unwrap();
        assert_eq!(join.kind(), MessageType::Join);
        assert_eq!(join.player_id, wallet);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_while_inactive_applies_next_start() {
        let mut rig = rig();
        rig.handle
            .identity_changed(PlayerId::from("0xlater"))
            .await
            .unwrap();
        assert_eq!(rig.fakes.transport.connects(), 0);

        assert_eq!(started(&mut rig).await, PlayerId::from("0xlater"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relayed_shot_hits_through_loop() {
        let mut rig = rig();
        let local = started(&mut rig).await;

        let shot = remote_message(
            SHOOTER,
            Position::new(0.0, 0.0).with_accuracy(10.0),
            0.0,
            Payload::Shoot {
                shot_id: "s-1".into(),
            },
        );
        rig.transport_tx
            .send(TransportEvent::Message(shot))
            .await
            .unwrap();

        let snap = rig.handle.snapshot().await.unwrap();
        assert_eq!(snap.state.current_lives, MAX_LIVES - 1);
        assert_eq!(snap.known_players, 1);

        let reply = rig.fakes.transport.sent().pop().unwrap();
        assert_eq!(reply.kind(), MessageType::HitConfirmed);
        assert_eq!(reply.player_id, local);
        assert_eq!(reply.sender_id, Some(PlayerId::from(SHOOTER)));
        assert_eq!(
            rig.events.recv().await.unwrap(),
            GameEvent::PlayerWasHit {
                shooter_id: PlayerId::from(SHOOTER),
                shot_id: "s-1".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_and_respawn_through_loop() {
        let mut rig = rig();
        let local = started(&mut rig).await;
        let began = Instant::now();

        let hit = remote_message(
            SHOOTER,
            Position::default(),
            0.0,
            Payload::Hit {
                target_id: local.clone(),
                damage: MAX_LIVES,
            },
        );
        rig.transport_tx
            .send(TransportEvent::Message(hit))
            .await
            .unwrap();

        assert_eq!(rig.events.recv().await.unwrap(), GameEvent::PlayerDied);
        let snap = rig.handle.snapshot().await.unwrap();
        assert_eq!(snap.state.current_lives, 0);
        assert!(snap.respawn_pending);

        assert_eq!(rig.events.recv().await.unwrap(), GameEvent::PlayerRespawned);
        assert!(began.elapsed() >= Duration::from_secs(60));

        let snap = rig.handle.snapshot().await.unwrap();
        assert_eq!(snap.state.current_lives, MAX_LIVES);
        assert!(snap.state.is_alive());
        assert!(!snap.respawn_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_while_dead_discards_respawn() {
        let mut rig = rig();
        let local = started(&mut rig).await;

        let hit = remote_message(
            SHOOTER,
            Position::default(),
            0.0,
            Payload::Hit {
                target_id: local,
                damage: MAX_LIVES,
            },
        );
        rig.transport_tx
            .send(TransportEvent::Message(hit))
            .await
            .unwrap();
        assert_eq!(rig.events.recv().await.unwrap(), GameEvent::PlayerDied);

        rig.handle.end_session().await.unwrap();
        assert_eq!(rig.events.recv().await.unwrap(), GameEvent::SessionEnded);

        tokio::time::sleep(Duration::from_secs(120)).await;
        rig.handle.snapshot().await.unwrap();
        assert_eq!(rig.events.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shoot_through_handle() {
        let mut rig = rig();
        let local = started(&mut rig).await;

        rig.handle
            .shoot(Position::new(5.0, 6.0), Heading::from_degrees(180.0))
            .await
            .unwrap();
        rig.handle.snapshot().await.unwrap();

        let shot = rig.fakes.transport.sent().pop().unwrap();
        assert_eq!(shot.kind(), MessageType::Shoot);
        assert_eq!(shot.player_id, local);
        assert_eq!(shot.player.heading.degrees(), 180.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_reported_not_retried() {
        let mut rig = rig();
        started(&mut rig).await;

        rig.transport_tx
            .send(TransportEvent::Disconnected { error: None })
            .await
            .unwrap();
        assert_eq!(
            rig.events.recv().await.unwrap(),
            GameEvent::ConnectionLost { error: None }
        );
        rig.handle.snapshot().await.unwrap();
        assert_eq!(rig.fakes.transport.connects(), 1);
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_loop() {
        let fakes = Fakes::new(MemoryIdentity::default());
        let (_transport_tx, transport_rx) = mpsc::channel(8);
        let (session, handle) =
            GameSession::new(fakes.collaborators(), transport_rx, SessionSettings::default());

        let task = tokio::spawn(session.run());
        assert_ok!(handle.snapshot().await);

        task.abort();
        let _ = task.await;
        assert_err!(handle.start_session().await);
        assert_err!(handle.snapshot().await);
    }
}
