//! Shot geometry - turns two GPS fixes and a compass heading into a miss distance
//!
//! The north-south and east-west legs are measured as geodesic distances along
//! the shooter's meridian and parallel rather than through a planar projection.

use std::cmp::Ordering;

use geo::{Distance, Geodesic, Point};

use crate::ws::protocol::{Heading, Position};

/// Outcome of resolving a shot against a target position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotResolution {
    /// Geodesic distance shooter -> target (meters)
    pub real_distance: f64,
    /// Bearing shooter -> target (degrees)
    pub azimuth: f64,
    /// Angle between the shooter's heading and the azimuth (degrees)
    pub degree_diff: f64,
    /// Perpendicular miss distance (meters)
    pub deviation: f64,
}

/// Resolve a shot fired from `shooter` along `heading` against `target`
pub fn resolve_shot(shooter: &Position, heading: Heading, target: &Position) -> ShotResolution {
    let real_distance = geodesic_distance(
        shooter.latitude,
        shooter.longitude,
        target.latitude,
        target.longitude,
    );
    let azimuth = azimuth(shooter, target);
    let degree_diff = angular_difference(heading.degrees(), azimuth);

    ShotResolution {
        real_distance,
        azimuth,
        degree_diff,
        deviation: deviation(real_distance, degree_diff),
    }
}

/// Geodesic (WGS84) distance in meters
pub fn geodesic_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Geodesic::distance(Point::new(lon1, lat1), Point::new(lon2, lat2))
}

/// Quadrant-based bearing from shooter to target.
///
/// A target sharing the shooter's latitude or longitude exactly falls in no
/// quadrant and keeps an azimuth of 0.
pub fn azimuth(shooter: &Position, target: &Position) -> f64 {
    let lat_diff = geodesic_distance(
        shooter.latitude,
        shooter.longitude,
        target.latitude,
        shooter.longitude,
    );
    let lon_diff = geodesic_distance(
        shooter.latitude,
        shooter.longitude,
        shooter.latitude,
        target.longitude,
    );
    let orientation = lon_diff.atan2(lat_diff).to_degrees();

    let north_south = target.latitude.partial_cmp(&shooter.latitude);
    let east_west = target.longitude.partial_cmp(&shooter.longitude);

    match (north_south, east_west) {
        // south-west
        (Some(Ordering::Less), Some(Ordering::Less)) => orientation,
        // north-west
        (Some(Ordering::Greater), Some(Ordering::Less)) => 180.0 - orientation,
        // north-east
        (Some(Ordering::Greater), Some(Ordering::Greater)) => 180.0 + orientation,
        // south-east
        (Some(Ordering::Less), Some(Ordering::Greater)) => 360.0 - orientation,
        _ => 0.0,
    }
}

/// Difference between heading and azimuth, going the short way across north
pub fn angular_difference(heading: f64, azimuth: f64) -> f64 {
    if heading < 90.0 && azimuth > 270.0 {
        (360.0 - azimuth) + heading
    } else if heading > 270.0 && azimuth < 90.0 {
        (360.0 - heading) + azimuth
    } else {
        (heading - azimuth).abs()
    }
}

/// Miss distance implied by an angular error over `real_distance`
pub fn deviation(real_distance: f64, degree_diff: f64) -> f64 {
    real_distance * degree_diff.to_radians().tan()
}
