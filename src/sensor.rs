//! Position/heading sensor source

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

use crate::config::FixConfig;
use crate::ws::protocol::{Heading, Player, PlayerId, Position};

/// Meters per degree of latitude (mean)
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Sensor source collaborator
pub trait SensorSource: Send + Sync {
    fn current_position(&self) -> Option<Position>;
    fn current_heading(&self) -> Option<Heading>;
}

/// Latest reading pushed by the platform's location/compass updates
#[derive(Debug, Default)]
pub struct LatestFix {
    position: RwLock<Option<Position>>,
    heading: RwLock<Option<Heading>>,
}

impl LatestFix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_position(&self, position: Position) {
        *self.position.write() = Some(position);
    }

    pub fn update_heading(&self, heading: Heading) {
        *self.heading.write() = Some(heading);
    }

    /// Drop the fix, e.g. when location permission is revoked
    pub fn clear(&self) {
        *self.position.write() = None;
        *self.heading.write() = None;
    }
}

impl SensorSource for LatestFix {
    fn current_position(&self) -> Option<Position> {
        *self.position.read()
    }

    fn current_heading(&self) -> Option<Heading> {
        *self.heading.read()
    }
}

/// Snapshot of the local player for outgoing messages; missing readings become zeros
pub fn local_snapshot(id: &PlayerId, sensor: &dyn SensorSource) -> Player {
    Player {
        id: id.clone(),
        location: sensor.current_position().unwrap_or_default(),
        heading: sensor.current_heading().unwrap_or_default(),
    }
}

/// Feed a configured fix into `target` on a fixed cadence, with optional GPS noise
pub fn spawn_static_feed(target: Arc<LatestFix>, fix: FixConfig, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            let position = jittered(&fix, &mut rand::thread_rng());
            debug!(
                latitude = position.latitude,
                longitude = position.longitude,
                "Sensor update"
            );
            target.update_position(position);
            target.update_heading(Heading::from_degrees(fix.heading));
        }
    })
}

fn jittered(fix: &FixConfig, rng: &mut impl Rng) -> Position {
    let (north_m, east_m) = if fix.jitter_m > 0.0 {
        (
            rng.gen_range(-fix.jitter_m..=fix.jitter_m),
            rng.gen_range(-fix.jitter_m..=fix.jitter_m),
        )
    } else {
        (0.0, 0.0)
    };

    let lon_scale = fix.latitude.to_radians().cos().max(1e-6);
    Position {
        latitude: fix.latitude + north_m / METERS_PER_DEGREE,
        longitude: fix.longitude + east_m / (METERS_PER_DEGREE * lon_scale),
        altitude: fix.altitude,
        accuracy: fix.accuracy,
    }
}
