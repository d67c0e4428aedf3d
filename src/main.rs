//! Geoshot field client
//!
//! Headless client that plays one device against a relay. Commands are read
//! from stdin:
//! - `start` / `start-extended`
//! - `shoot`
//! - `end`
//! - `wallet <address>`
//! - `status`

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geoshot::game::{GameEvent, SessionHandle};
use geoshot::sensor::SensorSource;
use geoshot::ws::PlayerId;
use geoshot::{App, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    info!("Starting Geoshot field client");
    info!("Relay: {}", config.relay_url);
    if config.fix.is_none() {
        warn!("No FIX_LATITUDE/FIX_LONGITUDE set, sessions will not start");
    }

    let (app, session) = App::new(config);
    let session_task = tokio::spawn(session.run());
    let _feed = app.spawn_fix_feed();

    let events = app.session.subscribe();
    tokio::spawn(log_events(events));

    tokio::select! {
        result = command_loop(&app) => result?,
        _ = shutdown_signal() => {}
    }

    app.session.end_session().await?;
    drop(app);
    let _ = session_task.await;

    info!("Client shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn command_loop(app: &App) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("start"), _) => app.session.start_session().await?,
            (Some("start-extended"), _) => app.session.start_session_extended().await?,
            (Some("shoot"), _) => shoot(app).await?,
            (Some("end"), _) => app.session.end_session().await?,
            (Some("wallet"), Some(address)) => {
                app.session
                    .identity_changed(PlayerId::new(address))
                    .await?
            }
            (Some("status"), _) => status(&app.session).await?,
            (Some(other), _) => warn!(command = other, "Unknown command"),
            (None, _) => {}
        }
    }

    info!("stdin closed");
    Ok(())
}

/// Fire along the current compass heading from the current fix
async fn shoot(app: &App) -> anyhow::Result<()> {
    let (Some(position), heading) = (
        app.sensor.current_position(),
        app.sensor.current_heading().unwrap_or_default(),
    ) else {
        warn!("No position fix, cannot shoot");
        return Ok(());
    };

    app.session.shoot(position, heading).await?;
    Ok(())
}

async fn status(session: &SessionHandle) -> anyhow::Result<()> {
    let snap = session.snapshot().await?;
    info!(
        active = snap.state.is_active(),
        player_id = ?snap.state.player_id,
        lives = snap.state.current_lives,
        alive = snap.state.is_alive(),
        hits = snap.state.score.hits,
        kills = snap.state.score.kills,
        known_players = snap.known_players,
        respawn_pending = snap.respawn_pending,
        "Status"
    );
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<GameEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(event) => info!(event = ?event, "Game event"),
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, ending session");
        }
        _ = terminate => {
            info!("Received terminate signal, ending session");
        }
    }
}
