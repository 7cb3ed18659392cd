use serde::{Deserialize, Serialize};

/// Final outcome of analyzing a submitted story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Pending,
    Reject,
}

impl Decision {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "approve" => Some(Self::Approve),
            "pending" => Some(Self::Pending),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Pending => "pending",
            Self::Reject => "reject",
        }
    }
}

/// Intent classification reported by the AI escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Playful,
    Neutral,
    Hateful,
    Sexual,
    Spam,
}

impl Intent {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "playful" => Some(Self::Playful),
            "neutral" => Some(Self::Neutral),
            "hateful" => Some(Self::Hateful),
            "sexual" => Some(Self::Sexual),
            "spam" => Some(Self::Spam),
            _ => None,
        }
    }
}

/// Produced once per submission; its fields are denormalized onto the
/// stored post row rather than persisted on their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationVerdict {
    pub decision: Decision,
    pub reason: String,
    pub flags: Vec<String>,
    pub severity: i32,
    pub used_ai: bool,
    pub latency_ms: u64,
}

impl ModerationVerdict {
    /// True if the heuristic scan matched a hard-disallowed term. Such a
    /// verdict may never be softened by the AI escalation step.
    pub fn has_hard_flag(&self) -> bool {
        self.flags.iter().any(|flag| flag.starts_with("hard:"))
    }
}
