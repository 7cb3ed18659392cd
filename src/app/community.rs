use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::language::Language;
use crate::domain::moderation::{Decision, ModerationVerdict};
use crate::domain::post::{CommunityPost, PendingPost, ReactionType};
use crate::infra::db::Db;

/// Everything the store needs to materialize a post row; the verdict's
/// fields are denormalized onto the row.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub text: String,
    pub author: Option<String>,
    pub language: Language,
    pub is_test: bool,
    pub verdict: ModerationVerdict,
}

/// Persistence seam for approved posts, the pending queue and reaction
/// tallies. The orchestration layer depends only on this trait, so the
/// postgres store and the in-memory store (used when no DATABASE_URL is
/// configured, and by the test suite) are interchangeable.
#[async_trait]
pub trait CommunityStore: Send + Sync {
    /// Approved posts newest-first, each with its reaction tallies merged in.
    async fn get_feed(&self) -> Result<Vec<CommunityPost>>;
    async fn create_approved(&self, post: NewPost) -> Result<CommunityPost>;
    async fn create_pending(&self, post: NewPost) -> Result<PendingPost>;
    async fn list_pending(&self) -> Result<Vec<PendingPost>>;
    /// Promote a pending row into an approved post, deleting the pending
    /// row in the same transaction. `edited_text` replaces the story text
    /// when a moderator supplied an edit.
    async fn approve_pending(
        &self,
        post_id: Uuid,
        edited_text: Option<String>,
    ) -> Result<Option<CommunityPost>>;
    async fn reject_pending(&self, post_id: Uuid) -> Result<bool>;
    /// Atomic upsert-increment on the (post, type) tally. Returns the
    /// updated tallies, or None when the post does not exist.
    async fn add_reaction(
        &self,
        post_id: Uuid,
        reaction: ReactionType,
    ) -> Result<Option<HashMap<String, i64>>>;
    async fn get_reactions(&self, post_id: Uuid) -> Result<HashMap<String, i64>>;
    /// Clear the featured flag everywhere, then set it on the target, as
    /// one serialized mutation. False when the target does not exist.
    async fn set_featured(&self, post_id: Uuid) -> Result<bool>;
}

/// Strip the tier prefix off flags ("mild:pagol" -> "pagol",
/// "ai:severe:khanki" -> "khanki") for the moderator-facing flagged-terms
/// list. Terms themselves never contain a colon.
fn flagged_terms(flags: &[String]) -> Vec<String> {
    flags
        .iter()
        .filter_map(|flag| flag.rsplit_once(':').map(|(_, term)| term.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgCommunityStore {
    db: Db,
}

impl PgCommunityStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

const POST_COLUMNS: &str = "id, text, author, language, featured, likes, is_test, \
     moderation_flags, moderation_reason, moderation_used_ai, \
     moderation_severity, moderation_decision, created_at, updated_at";

const PENDING_COLUMNS: &str = "id, post_id, text, author, language, is_test, flagged_terms, \
     moderation_flags, moderation_reason, moderation_used_ai, \
     moderation_severity, created_at";

fn post_from_row(row: &sqlx::postgres::PgRow) -> Result<CommunityPost> {
    let language: String = row.get("language");
    let language = Language::from_db(&language)
        .ok_or_else(|| anyhow::anyhow!("unknown post language: {}", language))?;
    let decision: String = row.get("moderation_decision");
    let decision = Decision::from_db(&decision)
        .ok_or_else(|| anyhow::anyhow!("unknown moderation decision: {}", decision))?;

    Ok(CommunityPost {
        id: row.get("id"),
        text: row.get("text"),
        author: row.get("author"),
        language,
        featured: row.get("featured"),
        likes: row.get("likes"),
        is_test: row.get("is_test"),
        reactions: HashMap::new(),
        moderation_flags: row.get("moderation_flags"),
        moderation_reason: row.get("moderation_reason"),
        moderation_used_ai: row.get("moderation_used_ai"),
        moderation_severity: row.get("moderation_severity"),
        moderation_decision: decision,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn pending_from_row(row: &sqlx::postgres::PgRow) -> Result<PendingPost> {
    let language: String = row.get("language");
    let language = Language::from_db(&language)
        .ok_or_else(|| anyhow::anyhow!("unknown post language: {}", language))?;

    Ok(PendingPost {
        id: row.get("id"),
        post_id: row.get("post_id"),
        text: row.get("text"),
        author: row.get("author"),
        language,
        is_test: row.get("is_test"),
        flagged_terms: row.get("flagged_terms"),
        moderation_flags: row.get("moderation_flags"),
        moderation_reason: row.get("moderation_reason"),
        moderation_used_ai: row.get("moderation_used_ai"),
        moderation_severity: row.get("moderation_severity"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl CommunityStore for PgCommunityStore {
    async fn get_feed(&self) -> Result<Vec<CommunityPost>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM community_posts ORDER BY created_at DESC, id DESC",
            POST_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await?;

        let mut posts = Vec::with_capacity(rows.len());
        for row in &rows {
            posts.push(post_from_row(row)?);
        }

        let tally_rows = sqlx::query(
            "SELECT post_id, reaction_type, count FROM community_reactions",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut tallies: HashMap<Uuid, HashMap<String, i64>> = HashMap::new();
        for row in &tally_rows {
            let post_id: Uuid = row.get("post_id");
            let reaction_type: String = row.get("reaction_type");
            let count: i64 = row.get("count");
            tallies.entry(post_id).or_default().insert(reaction_type, count);
        }

        for post in &mut posts {
            if let Some(reactions) = tallies.remove(&post.id) {
                post.reactions = reactions;
            }
        }

        Ok(posts)
    }

    async fn create_approved(&self, post: NewPost) -> Result<CommunityPost> {
        let row = sqlx::query(&format!(
            "INSERT INTO community_posts \
             (id, text, author, language, featured, likes, is_test, \
              moderation_flags, moderation_reason, moderation_used_ai, \
              moderation_severity, moderation_decision) \
             VALUES ($1, $2, $3, $4, FALSE, 0, $5, $6, $7, $8, $9, $10) \
             RETURNING {}",
            POST_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&post.text)
        .bind(&post.author)
        .bind(post.language.as_db())
        .bind(post.is_test)
        .bind(&post.verdict.flags)
        .bind(&post.verdict.reason)
        .bind(post.verdict.used_ai)
        .bind(post.verdict.severity)
        .bind(Decision::Approve.as_db())
        .fetch_one(self.db.pool())
        .await?;

        post_from_row(&row)
    }

    async fn create_pending(&self, post: NewPost) -> Result<PendingPost> {
        let row = sqlx::query(&format!(
            "INSERT INTO community_pending_posts \
             (id, post_id, text, author, language, is_test, flagged_terms, \
              moderation_flags, moderation_reason, moderation_used_ai, \
              moderation_severity) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {}",
            PENDING_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(Uuid::new_v4())
        .bind(&post.text)
        .bind(&post.author)
        .bind(post.language.as_db())
        .bind(post.is_test)
        .bind(flagged_terms(&post.verdict.flags))
        .bind(&post.verdict.flags)
        .bind(&post.verdict.reason)
        .bind(post.verdict.used_ai)
        .bind(post.verdict.severity)
        .fetch_one(self.db.pool())
        .await?;

        pending_from_row(&row)
    }

    async fn list_pending(&self) -> Result<Vec<PendingPost>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM community_pending_posts ORDER BY created_at DESC, id DESC",
            PENDING_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in &rows {
            pending.push(pending_from_row(row)?);
        }
        Ok(pending)
    }

    async fn approve_pending(
        &self,
        post_id: Uuid,
        edited_text: Option<String>,
    ) -> Result<Option<CommunityPost>> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM community_pending_posts WHERE post_id = $1 FOR UPDATE",
            PENDING_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let pending = pending_from_row(&row)?;
        let text = edited_text.unwrap_or(pending.text);

        let inserted = sqlx::query(&format!(
            "INSERT INTO community_posts \
             (id, text, author, language, featured, likes, is_test, \
              moderation_flags, moderation_reason, moderation_used_ai, \
              moderation_severity, moderation_decision) \
             VALUES ($1, $2, $3, $4, FALSE, 0, $5, $6, $7, $8, $9, $10) \
             RETURNING {}",
            POST_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&text)
        .bind(&pending.author)
        .bind(pending.language.as_db())
        .bind(pending.is_test)
        .bind(&pending.moderation_flags)
        .bind(&pending.moderation_reason)
        .bind(pending.moderation_used_ai)
        .bind(pending.moderation_severity)
        .bind(Decision::Approve.as_db())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM community_pending_posts WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(post_from_row(&inserted)?))
    }

    async fn reject_pending(&self, post_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM community_pending_posts WHERE post_id = $1")
            .bind(post_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_reaction(
        &self,
        post_id: Uuid,
        reaction: ReactionType,
    ) -> Result<Option<HashMap<String, i64>>> {
        let mut tx = self.db.pool().begin().await?;

        let exists = sqlx::query("SELECT 1 FROM community_posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            "INSERT INTO community_reactions (post_id, reaction_type, count) \
             VALUES ($1, $2, 1) \
             ON CONFLICT (post_id, reaction_type) \
             DO UPDATE SET count = community_reactions.count + 1, updated_at = NOW()",
        )
        .bind(post_id)
        .bind(reaction.as_db())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE community_posts SET likes = likes + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query(
            "SELECT reaction_type, count FROM community_reactions WHERE post_id = $1",
        )
        .bind(post_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut tallies = HashMap::new();
        for row in &rows {
            tallies.insert(row.get::<String, _>("reaction_type"), row.get::<i64, _>("count"));
        }
        Ok(Some(tallies))
    }

    async fn get_reactions(&self, post_id: Uuid) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT reaction_type, count FROM community_reactions WHERE post_id = $1",
        )
        .bind(post_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut tallies = HashMap::new();
        for row in &rows {
            tallies.insert(row.get::<String, _>("reaction_type"), row.get::<i64, _>("count"));
        }
        Ok(tallies)
    }

    async fn set_featured(&self, post_id: Uuid) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("UPDATE community_posts SET featured = FALSE WHERE featured")
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "UPDATE community_posts SET featured = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    posts: Vec<CommunityPost>,
    pending: Vec<PendingPost>,
}

/// Backing store when no database is configured, and the store the test
/// suite runs against. Single mutex: post volumes here are tiny.
#[derive(Default)]
pub struct MemoryCommunityStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryCommunityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn materialize_post(
    text: String,
    author: Option<String>,
    language: Language,
    is_test: bool,
    flags: Vec<String>,
    reason: String,
    used_ai: bool,
    severity: i32,
) -> CommunityPost {
    let now = OffsetDateTime::now_utc();
    CommunityPost {
        id: Uuid::new_v4(),
        text,
        author,
        language,
        featured: false,
        likes: 0,
        is_test,
        reactions: HashMap::new(),
        moderation_flags: flags,
        moderation_reason: reason,
        moderation_used_ai: used_ai,
        moderation_severity: severity,
        moderation_decision: Decision::Approve,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl CommunityStore for MemoryCommunityStore {
    async fn get_feed(&self) -> Result<Vec<CommunityPost>> {
        let inner = self.inner.lock().expect("community store poisoned");
        // Reverse insertion order, then a stable sort by timestamp, keeps
        // newest-first even when timestamps collide within one millisecond.
        let mut posts: Vec<CommunityPost> = inner.posts.iter().rev().cloned().collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn create_approved(&self, post: NewPost) -> Result<CommunityPost> {
        let created = materialize_post(
            post.text,
            post.author,
            post.language,
            post.is_test,
            post.verdict.flags,
            post.verdict.reason,
            post.verdict.used_ai,
            post.verdict.severity,
        );
        let mut inner = self.inner.lock().expect("community store poisoned");
        inner.posts.push(created.clone());
        Ok(created)
    }

    async fn create_pending(&self, post: NewPost) -> Result<PendingPost> {
        let created = PendingPost {
            id: Uuid::new_v4(),
            post_id: Uuid::new_v4(),
            text: post.text,
            author: post.author,
            language: post.language,
            is_test: post.is_test,
            flagged_terms: flagged_terms(&post.verdict.flags),
            moderation_flags: post.verdict.flags,
            moderation_reason: post.verdict.reason,
            moderation_used_ai: post.verdict.used_ai,
            moderation_severity: post.verdict.severity,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut inner = self.inner.lock().expect("community store poisoned");
        inner.pending.push(created.clone());
        Ok(created)
    }

    async fn list_pending(&self) -> Result<Vec<PendingPost>> {
        let inner = self.inner.lock().expect("community store poisoned");
        Ok(inner.pending.iter().rev().cloned().collect())
    }

    async fn approve_pending(
        &self,
        post_id: Uuid,
        edited_text: Option<String>,
    ) -> Result<Option<CommunityPost>> {
        let mut inner = self.inner.lock().expect("community store poisoned");
        let Some(index) = inner.pending.iter().position(|p| p.post_id == post_id) else {
            return Ok(None);
        };
        let pending = inner.pending.remove(index);
        let created = materialize_post(
            edited_text.unwrap_or(pending.text),
            pending.author,
            pending.language,
            pending.is_test,
            pending.moderation_flags,
            pending.moderation_reason,
            pending.moderation_used_ai,
            pending.moderation_severity,
        );
        inner.posts.push(created.clone());
        Ok(Some(created))
    }

    async fn reject_pending(&self, post_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().expect("community store poisoned");
        let before = inner.pending.len();
        inner.pending.retain(|p| p.post_id != post_id);
        Ok(inner.pending.len() < before)
    }

    async fn add_reaction(
        &self,
        post_id: Uuid,
        reaction: ReactionType,
    ) -> Result<Option<HashMap<String, i64>>> {
        let mut inner = self.inner.lock().expect("community store poisoned");
        let Some(post) = inner.posts.iter_mut().find(|p| p.id == post_id) else {
            return Ok(None);
        };
        *post.reactions.entry(reaction.as_db().to_string()).or_insert(0) += 1;
        post.likes += 1;
        post.updated_at = OffsetDateTime::now_utc();
        Ok(Some(post.reactions.clone()))
    }

    async fn get_reactions(&self, post_id: Uuid) -> Result<HashMap<String, i64>> {
        let inner = self.inner.lock().expect("community store poisoned");
        Ok(inner
            .posts
            .iter()
            .find(|p| p.id == post_id)
            .map(|p| p.reactions.clone())
            .unwrap_or_default())
    }

    async fn set_featured(&self, post_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().expect("community store poisoned");
        if !inner.posts.iter().any(|p| p.id == post_id) {
            return Ok(false);
        }
        for post in &mut inner.posts {
            post.featured = post.id == post_id;
        }
        Ok(true)
    }
}
