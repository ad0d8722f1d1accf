use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub jwt_secret: String,
    pub room_ttl_seconds: u64,
    pub sync_interval_ms: u64,
    pub free_trial_seconds: u64,
    pub grace_period_seconds: u64,
    pub disconnect_debounce_ms: u64,
    pub account_service_url: Option<String>,
    pub history_service_url: Option<String>,
    pub push_service_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("NOOK_JWT_SECRET")
            .context("NOOK_JWT_SECRET must be set; refusing to start without a signing secret")?;

        Ok(Self {
            port: env::var("NOOK_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            jwt_secret,
            room_ttl_seconds: env::var("ROOM_TTL_SECONDS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(86_400), // 24h
            sync_interval_ms: env::var("SYNC_INTERVAL_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(1_500),
            free_trial_seconds: env::var("FREE_TRIAL_SECONDS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(86_400),
            grace_period_seconds: env::var("GRACE_PERIOD_SECONDS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(60),
            disconnect_debounce_ms: env::var("DISCONNECT_DEBOUNCE_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(500),
            account_service_url: env::var("ACCOUNT_SERVICE_URL").ok(),
            history_service_url: env::var("HISTORY_SERVICE_URL").ok(),
            push_service_url: env::var("PUSH_SERVICE_URL").ok(),
        })
    }

    pub fn free_trial_ms(&self) -> i64 {
        self.free_trial_seconds as i64 * 1_000
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://localhost:6379".to_string(),
            jwt_secret: "dev-secret".to_string(),
            room_ttl_seconds: 86_400,
            sync_interval_ms: 1_500,
            free_trial_seconds: 86_400,
            grace_period_seconds: 60,
            disconnect_debounce_ms: 500,
            account_service_url: None,
            history_service_url: None,
            push_service_url: None,
        }
    }
}
