//! Geoshot engine - geolocation hit detection and player state sync
//!
//! Peers report where they stand and which way they face; each device decides
//! for itself whether an incoming shot struck its own player and tells the
//! shooter through the relay.

pub mod app;
pub mod config;
pub mod game;
pub mod presence;
pub mod sensor;
pub mod store;
pub mod util;
pub mod ws;

pub use app::App;
pub use config::Config;
