pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use std::sync::Arc;
use std::time::Duration;

use crate::app::community::CommunityStore;
use crate::app::moderation::ModerationEngine;
use crate::app::rate_limiter::RateLimiter;
use crate::infra::{cache::RedisCache, db::Db};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CommunityStore>,
    pub rate_limiter: RateLimiter,
    pub moderation: ModerationEngine,
    /// Kept for health reporting; None when running store-in-memory.
    pub db: Option<Db>,
    pub cache: Option<RedisCache>,
    pub admin_token: Option<String>,
    pub test_bypass_token: Option<String>,
    pub submission_window: Duration,
    pub reaction_window: Duration,
}
