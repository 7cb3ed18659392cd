use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::language::Language;
use crate::domain::moderation::Decision;

/// An approved story as served to the public feed. Immutable after
/// creation except for `likes`, `featured` and the reaction tallies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPost {
    pub id: Uuid,
    pub text: String,
    pub author: Option<String>,
    pub language: Language,
    pub featured: bool,
    pub likes: i64,
    pub is_test: bool,
    /// Per-type reaction counts, merged in at read time.
    #[serde(default)]
    pub reactions: HashMap<String, i64>,
    pub moderation_flags: Vec<String>,
    pub moderation_reason: String,
    pub moderation_used_ai: bool,
    pub moderation_severity: i32,
    pub moderation_decision: Decision,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A story parked in the moderation queue. `post_id` is the tracking id
/// handed back to the submitting client; the eventual approved row gets
/// its own fresh id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPost {
    pub id: Uuid,
    pub post_id: Uuid,
    pub text: String,
    pub author: Option<String>,
    pub language: Language,
    pub is_test: bool,
    pub flagged_terms: Vec<String>,
    pub moderation_flags: Vec<String>,
    pub moderation_reason: String,
    pub moderation_used_ai: bool,
    pub moderation_severity: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionType {
    Heart,
    Laugh,
    Thumbs,
}

impl ReactionType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "heart" => Some(Self::Heart),
            "laugh" => Some(Self::Laugh),
            "thumbs" => Some(Self::Thumbs),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Heart => "heart",
            Self::Laugh => "laugh",
            Self::Thumbs => "thumbs",
        }
    }
}
