//! Wiring of the concrete collaborators into a session

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::game::session::SessionSettings;
use crate::game::{Collaborators, GameSession, SessionHandle};
use crate::presence::AnnouncePresence;
use crate::sensor::{spawn_static_feed, LatestFix};
use crate::store::{FileIdentityStore, MemoryPlayerRepository};
use crate::ws::transport::WsTransport;

const TRANSPORT_QUEUE: usize = 256;
const FIX_REFRESH: Duration = Duration::from_secs(1);

/// Everything a running client holds on to
#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub sensor: Arc<LatestFix>,
    pub transport: Arc<WsTransport>,
    pub presence: Arc<AnnouncePresence>,
    pub repository: Arc<MemoryPlayerRepository>,
    pub session: SessionHandle,
}

impl App {
    /// Build the collaborators and the session actor. The caller runs the
    /// returned `GameSession`.
    pub fn new(config: Config) -> (Self, GameSession) {
        let config = Arc::new(config);

        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_QUEUE);
        let transport = Arc::new(WsTransport::new(
            config.relay_url.clone(),
            config.inbound_rate_limit,
            transport_tx,
        ));

        let sensor = Arc::new(LatestFix::new());
        let presence = Arc::new(AnnouncePresence::new(
            transport.clone(),
            sensor.clone(),
            config.heartbeat_interval,
        ));
        let repository = Arc::new(MemoryPlayerRepository::new());
        let identity = Arc::new(FileIdentityStore::new(config.identity_path.clone()));

        let collaborators = Collaborators {
            sensor: sensor.clone(),
            transport: transport.clone(),
            presence: presence.clone(),
            repository: repository.clone(),
            identity,
        };
        let (session, handle) = GameSession::new(
            collaborators,
            transport_rx,
            SessionSettings::from_config(&config),
        );

        let app = Self {
            config,
            sensor,
            transport,
            presence,
            repository,
            session: handle,
        };
        (app, session)
    }

    /// Feed the configured static fix, if any, into the sensor
    pub fn spawn_fix_feed(&self) -> Option<JoinHandle<()>> {
        let fix = self.config.fix.clone()?;
        Some(spawn_static_feed(self.sensor.clone(), fix, FIX_REFRESH))
    }
}
