//! Configuration module - environment variable parsing

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::game::session::StartPolicy;
use crate::util::rate_limit::INBOUND_RATE_LIMIT;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Relay WebSocket URL
    pub relay_url: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Cool-down between death and respawn
    pub respawn_delay: Duration,
    /// Position fix retry policy used by `start`
    pub start_policy: StartPolicy,
    /// Interval between presence announcements
    pub heartbeat_interval: Duration,
    /// Max inbound relay messages per second
    pub inbound_rate_limit: u32,

    /// File holding the generated player identity
    pub identity_path: PathBuf,
    /// Wallet address, preferred over the generated identity
    pub wallet_address: Option<String>,
    /// Push-notification token sent with `join`
    pub push_token: Option<String>,

    /// Fixed position for the field client (no fix when unset)
    pub fix: Option<FixConfig>,
}

/// Static position fix for headless runs
#[derive(Clone, Debug, PartialEq)]
pub struct FixConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
    pub heading: f64,
    /// Random horizontal noise applied per read, in meters
    pub jitter_m: f64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let start_policy = StartPolicy {
            attempts: parse_or("START_RETRY_ATTEMPTS", StartPolicy::default().attempts)?,
            delay: Duration::from_millis(parse_or("START_RETRY_DELAY_MS", 2000)?),
        };

        Ok(Self {
            relay_url: env::var("RELAY_URL").unwrap_or_else(|_| "ws://127.0.0.1:3000".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            respawn_delay: Duration::from_secs(parse_or("RESPAWN_DELAY_SECS", 60)?),
            start_policy,
            heartbeat_interval: Duration::from_secs(parse_or("HEARTBEAT_INTERVAL_SECS", 30)?),
            inbound_rate_limit: parse_or("INBOUND_RATE_LIMIT", INBOUND_RATE_LIMIT)?,

            identity_path: env::var("IDENTITY_PATH")
                .unwrap_or_else(|_| ".geoshot-identity".to_string())
                .into(),
            wallet_address: non_empty("WALLET_ADDRESS"),
            push_token: non_empty("PUSH_TOKEN"),

            fix: FixConfig::from_env()?,
        })
    }
}

impl FixConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let (Some(latitude), Some(longitude)) = (
            parse_opt::<f64>("FIX_LATITUDE")?,
            parse_opt::<f64>("FIX_LONGITUDE")?,
        ) else {
            return Ok(None);
        };

        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ConfigError::Invalid("FIX_LATITUDE"));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ConfigError::Invalid("FIX_LONGITUDE"));
        }

        Ok(Some(Self {
            latitude,
            longitude,
            altitude: parse_or("FIX_ALTITUDE", 0.0)?,
            accuracy: parse_or("FIX_ACCURACY", 10.0)?,
            heading: parse_or("FIX_HEADING", 0.0)?,
            jitter_m: parse_or("FIX_JITTER_M", 0.0)?,
        }))
    }
}

fn non_empty(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_opt<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match non_empty(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(name)),
        None => Ok(None),
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_opt(name)?.unwrap_or(default))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
