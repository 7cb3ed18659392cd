pub mod language;
pub mod moderation;
pub mod post;
