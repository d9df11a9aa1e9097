// src/config.rs
use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When unset the in-memory store is used.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Deadline for every individual store call.
    pub store_timeout: Duration,
    pub feed_capacity: usize,
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("PORT", 3030),
            database_url: var("DATABASE_URL"),
            db_max_connections: try_load("DB_MAX_CONNECTIONS", 5),
            store_timeout: Duration::from_millis(try_load("STORE_TIMEOUT_MS", 2000)),
            feed_capacity: try_load("FEED_CAPACITY", 256),
            cors_origin: var("CORS_ORIGIN"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3030,
            database_url: None,
            db_max_connections: 5,
            store_timeout: Duration::from_millis(2000),
            feed_capacity: 256,
            cors_origin: None,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };

    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}
