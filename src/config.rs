// src/config.rs

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use dotenvy::dotenv;
use url::Url;

use crate::error::AppError;

/// Seconds between reconciliation polls while the countdown runs.
pub const TIMER_POLL_INTERVAL_SECS: u64 = 60;

/// Seconds the countdown holds at 00:00 before the limit is declared.
pub const TIMER_GRACE_PERIOD_SECS: i64 = 5;

/// Fraction of the time limit below which the remaining time is "low".
pub const LOW_TIME_RATIO: f64 = 0.20;

/// Fraction of the time limit below which the remaining time is "critically low".
pub const CRITICALLY_LOW_TIME_RATIO: f64 = 0.05;

/// Default heartbeat period when the attempt does not provide one.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub lms_base_url: Url,
    pub lms_auth_token: Option<String>,
    pub listen_addr: SocketAddr,
    pub allowed_origins: Vec<String>,
    pub rust_log: String,
    pub poll_interval_secs: u64,
    pub grace_period_secs: i64,

    /// Upper bound for a worker ping; defaults to the ping interval.
    pub ping_timeout_secs: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let lms_base_url = env::var("LMS_BASE_URL")
            .map_err(|_| AppError::InternalServerError("LMS_BASE_URL must be set".to_string()))?;
        let lms_base_url = Url::parse(&lms_base_url)?;

        let lms_auth_token = env::var("LMS_AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let listen_addr = env::var("GATE_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| AppError::InternalServerError(format!("GATE_LISTEN_ADDR: {}", e)))?;

        let allowed_origins = env::var("GATE_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            lms_base_url,
            lms_auth_token,
            listen_addr,
            allowed_origins,
            rust_log,
            poll_interval_secs: parse_var("POLL_INTERVAL_SECS", TIMER_POLL_INTERVAL_SECS)?,
            grace_period_secs: parse_var("GRACE_PERIOD_SECS", TIMER_GRACE_PERIOD_SECS)?,
            ping_timeout_secs: env::var("PING_TIMEOUT_SECS")
                .ok()
                .map(|v| {
                    v.parse::<u64>().map_err(|e| {
                        AppError::InternalServerError(format!("PING_TIMEOUT_SECS: {}", e))
                    })
                })
                .transpose()?,
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| AppError::InternalServerError(format!("{}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
