use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    /// Absent => in-memory community store and no durable rate-limit tier.
    pub database_url: Option<String>,
    /// Absent => no fast rate-limit tier.
    pub redis_url: Option<String>,
    /// Absent => heuristic-only moderation, no AI escalation.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub ai_timeout_ms: u64,
    pub admin_token: Option<String>,
    pub test_bypass_token: Option<String>,
    pub submission_window_secs: u64,
    pub reaction_dedupe_secs: u64,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        Ok(Self {
            http_addr,
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            gemini_model: env_or("GEMINI_MODEL", "gemini-1.5-flash"),
            ai_timeout_ms: env_or_parse("AI_TIMEOUT_MS", "4000")?,
            admin_token: std::env::var("ADMIN_TOKEN").ok(),
            test_bypass_token: std::env::var("TEST_BYPASS_TOKEN").ok(),
            // One story per (ip, device) per 6 hours.
            submission_window_secs: env_or_parse("SUBMISSION_WINDOW_SECS", "21600")?,
            // Reaction dedupe is effectively permanent.
            reaction_dedupe_secs: env_or_parse("REACTION_DEDUPE_SECS", "31536000")?,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}
