use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::post::ReactionType;
use crate::infra::cache::RedisCache;
use crate::infra::db::Db;

/// Memory map pruning kicks in once the fallback tier grows past this.
const MEMORY_PRUNE_THRESHOLD: usize = 4096;

/// Cool-down tracking across three storage tiers: redis (fast, best
/// effort), postgres (authoritative), and an in-process map as the last
/// resort when the durable store is down. The chain prefers availability
/// over strictness: a submission is never failed because a store is
/// unreachable, even though the memory tier does not survive restarts or
/// span instances.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Option<RedisCache>,
    db: Option<Db>,
    memory: Arc<Mutex<HashMap<String, OffsetDateTime>>>,
}

impl RateLimiter {
    pub fn new(cache: Option<RedisCache>, db: Option<Db>) -> Self {
        Self {
            cache,
            db,
            memory: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Identity key for story submissions: one per (ip, device) pair. The
    /// caller passes the ip with any port already stripped.
    pub fn submission_key(ip: &str, device: &str) -> String {
        hash_key(&format!("post:{}:{}", ip, device))
    }

    /// Identity key for reaction dedupe: one per (post, emoji, device).
    pub fn reaction_key(post_id: Uuid, reaction: ReactionType, device: &str) -> String {
        hash_key(&format!(
            "reaction:{}:{}:{}",
            post_id,
            reaction.as_db(),
            device
        ))
    }

    /// Check the key and, if free, reserve it for `window` in one step.
    /// Returns true when the caller is limited. Infallible by design: tier
    /// errors degrade down the chain instead of failing the request.
    pub async fn check_and_reserve(&self, key: &str, window: Duration) -> bool {
        if let Some(cache) = &self.cache {
            match reserve_cache(cache, key, window).await {
                Ok(true) => {} // reserved; fall through to the authoritative tier
                Ok(false) => return true,
                Err(err) => {
                    tracing::debug!(error = ?err, "rate limit cache tier unavailable");
                }
            }
        }

        if let Some(db) = &self.db {
            match reserve_db(db, key, window).await {
                Ok(reserved) => return !reserved,
                Err(err) => {
                    tracing::warn!(error = ?err, "rate limit store degraded to memory fallback");
                }
            }
        }

        !self.reserve_memory(key, window)
    }

    /// Give a reservation back, e.g. when the action it guarded was never
    /// recorded. Best effort on every tier, like the reserve path.
    pub async fn release(&self, key: &str) {
        if let Some(cache) = &self.cache {
            if let Err(err) = release_cache(cache, key).await {
                tracing::debug!(error = ?err, "rate limit cache tier unavailable on release");
            }
        }
        if let Some(db) = &self.db {
            if let Err(err) = release_db(db, key).await {
                tracing::warn!(error = ?err, "failed to release rate limit entry");
            }
        }
        self.memory
            .lock()
            .expect("rate limit map poisoned")
            .remove(key);
    }

    fn reserve_memory(&self, key: &str, window: Duration) -> bool {
        let now = OffsetDateTime::now_utc();
        let mut map = self.memory.lock().expect("rate limit map poisoned");

        if let Some(expires_at) = map.get(key) {
            if *expires_at > now {
                return false;
            }
        }

        if map.len() > MEMORY_PRUNE_THRESHOLD {
            map.retain(|_, expires_at| *expires_at > now);
        }

        map.insert(key.to_string(), now + window);
        true
    }
}

fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// SET NX EX: atomic "reserve if absent". Ok(false) means the key is held.
async fn reserve_cache(cache: &RedisCache, key: &str, window: Duration) -> Result<bool> {
    let mut conn = cache.client().get_multiplexed_async_connection().await?;
    let outcome: Option<String> = redis::cmd("SET")
        .arg(format!("ratelimit:{}", key))
        .arg(1)
        .arg("NX")
        .arg("EX")
        .arg(window.as_secs().max(1))
        .query_async(&mut conn)
        .await?;
    Ok(outcome.is_some())
}

async fn release_cache(cache: &RedisCache, key: &str) -> Result<()> {
    let mut conn = cache.client().get_multiplexed_async_connection().await?;
    redis::cmd("DEL")
        .arg(format!("ratelimit:{}", key))
        .query_async::<_, ()>(&mut conn)
        .await?;
    Ok(())
}

async fn release_db(db: &Db, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM rate_limit_entries WHERE key = $1")
        .bind(key)
        .execute(db.pool())
        .await?;
    Ok(())
}

/// Upsert that only succeeds when no live entry exists; expired rows are
/// reclaimed in the same statement, so reads self-filter without a sweep.
async fn reserve_db(db: &Db, key: &str, window: Duration) -> Result<bool> {
    let expires_at = OffsetDateTime::now_utc() + window;
    let result = sqlx::query(
        "INSERT INTO rate_limit_entries (key, expires_at) VALUES ($1, $2) \
         ON CONFLICT (key) DO UPDATE SET expires_at = EXCLUDED.expires_at \
         WHERE rate_limit_entries.expires_at < NOW()",
    )
    .bind(key)
    .bind(expires_at)
    .execute(db.pool())
    .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_only() -> RateLimiter {
        RateLimiter::new(None, None)
    }

    #[tokio::test]
    async fn first_reserve_is_not_limited() {
        let limiter = memory_only();
        assert!(!limiter.check_and_reserve("k1", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn second_reserve_inside_window_is_limited() {
        let limiter = memory_only();
        let window = Duration::from_secs(60);
        assert!(!limiter.check_and_reserve("k1", window).await);
        assert!(limiter.check_and_reserve("k1", window).await);
    }

    #[tokio::test]
    async fn expired_entry_frees_the_key() {
        let limiter = memory_only();
        let window = Duration::from_millis(20);
        assert!(!limiter.check_and_reserve("k1", window).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!limiter.check_and_reserve("k1", window).await);
    }

    #[tokio::test]
    async fn released_key_can_be_reserved_again() {
        let limiter = memory_only();
        let window = Duration::from_secs(60);
        assert!(!limiter.check_and_reserve("k1", window).await);
        limiter.release("k1").await;
        assert!(!limiter.check_and_reserve("k1", window).await);
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let limiter = memory_only();
        let window = Duration::from_secs(60);
        assert!(!limiter.check_and_reserve("k1", window).await);
        assert!(!limiter.check_and_reserve("k2", window).await);
    }

    #[test]
    fn submission_keys_differ_per_identity() {
        let a = RateLimiter::submission_key("203.0.113.9", "device-a");
        let b = RateLimiter::submission_key("203.0.113.9", "device-b");
        let c = RateLimiter::submission_key("203.0.113.10", "device-a");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, RateLimiter::submission_key("203.0.113.9", "device-a"));
    }

    #[test]
    fn reaction_keys_differ_per_emoji() {
        let post = Uuid::new_v4();
        let heart = RateLimiter::reaction_key(post, ReactionType::Heart, "device-a");
        let laugh = RateLimiter::reaction_key(post, ReactionType::Laugh, "device-a");
        assert_ne!(heart, laugh);
    }
}
