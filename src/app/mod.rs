pub mod community;
pub mod escalation;
pub mod heuristics;
pub mod moderation;
pub mod rate_limiter;
pub mod submission;
