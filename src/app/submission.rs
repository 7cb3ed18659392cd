use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use crate::app::community::{CommunityStore, NewPost};
use crate::app::moderation::ModerationEngine;
use crate::app::rate_limiter::RateLimiter;
use crate::domain::language::{detect_script, Language};
use crate::domain::moderation::{Decision, ModerationVerdict};
use crate::domain::post::{CommunityPost, PendingPost, ReactionType};

/// Ties the rate limiter, moderation engine and community store into the
/// two public operations: submit a story, react to a post. Constructed per
/// request from the shared state, like every other service here.
pub struct SubmissionService {
    store: Arc<dyn CommunityStore>,
    rate_limiter: RateLimiter,
    moderation: ModerationEngine,
    submission_window: Duration,
    reaction_window: Duration,
}

#[derive(Debug, Clone)]
pub struct SubmitInput {
    pub name: Option<String>,
    pub is_anonymous: bool,
    pub lang: Option<String>,
    pub text: String,
    pub ip: String,
    pub device: String,
    pub bypass: bool,
}

pub enum SubmitOutcome {
    Published(CommunityPost),
    PendingReview(PendingPost),
    RateLimited,
    Rejected { message: String },
}

pub enum ReactOutcome {
    Updated {
        reactions: HashMap<String, i64>,
    },
    /// This device already used this emoji on this post; tallies unchanged.
    Duplicate {
        reactions: HashMap<String, i64>,
    },
    NotFound,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn CommunityStore>,
        rate_limiter: RateLimiter,
        moderation: ModerationEngine,
        submission_window: Duration,
        reaction_window: Duration,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            moderation,
            submission_window,
            reaction_window,
        }
    }

    pub async fn submit(&self, input: SubmitInput) -> Result<SubmitOutcome> {
        let author = if input.is_anonymous {
            None
        } else {
            input
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        };
        let language = input
            .lang
            .as_deref()
            .and_then(Language::from_db)
            .unwrap_or_else(|| detect_script(&input.text));

        if input.bypass {
            // Automated test traffic: skip the limiter and moderation, but
            // tag the row so it can be told apart from real submissions.
            let post = self
                .store
                .create_approved(NewPost {
                    text: input.text,
                    author,
                    language,
                    is_test: true,
                    verdict: bypass_verdict(),
                })
                .await?;
            tracing::info!(post_id = %post.id, "test-bypass story published");
            return Ok(SubmitOutcome::Published(post));
        }

        // Reserve the slot before moderation runs, so a slow AI call cannot
        // be exploited as a retry amplifier.
        let key = RateLimiter::submission_key(&input.ip, &input.device);
        if self
            .rate_limiter
            .check_and_reserve(&key, self.submission_window)
            .await
        {
            tracing::debug!(device = %input.device, "submission rate limited");
            return Ok(SubmitOutcome::RateLimited);
        }

        let verdict = self.moderation.analyze(&input.text).await;
        tracing::info!(
            decision = verdict.decision.as_db(),
            severity = verdict.severity,
            used_ai = verdict.used_ai,
            latency_ms = verdict.latency_ms,
            "story analyzed"
        );

        match verdict.decision {
            Decision::Approve => {
                let post = self
                    .store
                    .create_approved(NewPost {
                        text: input.text,
                        author,
                        language,
                        is_test: false,
                        verdict,
                    })
                    .await?;
                Ok(SubmitOutcome::Published(post))
            }
            Decision::Pending => {
                let pending = self
                    .store
                    .create_pending(NewPost {
                        text: input.text,
                        author,
                        language,
                        is_test: false,
                        verdict,
                    })
                    .await?;
                Ok(SubmitOutcome::PendingReview(pending))
            }
            // Nothing is persisted for a reject.
            Decision::Reject => Ok(SubmitOutcome::Rejected {
                message: "Your story can't be posted as written. Please soften it and try again."
                    .to_string(),
            }),
        }
    }

    pub async fn react(
        &self,
        post_id: Uuid,
        reaction: ReactionType,
        device: &str,
    ) -> Result<ReactOutcome> {
        let key = RateLimiter::reaction_key(post_id, reaction, device);
        if self
            .rate_limiter
            .check_and_reserve(&key, self.reaction_window)
            .await
        {
            let reactions = self.store.get_reactions(post_id).await?;
            return Ok(ReactOutcome::Duplicate { reactions });
        }

        // The dedupe window is effectively permanent, so a reservation must
        // not outlive a reaction that was never recorded: hand it back when
        // the post is missing or the store errors out.
        match self.store.add_reaction(post_id, reaction).await {
            Ok(Some(reactions)) => Ok(ReactOutcome::Updated { reactions }),
            Ok(None) => {
                self.rate_limiter.release(&key).await;
                Ok(ReactOutcome::NotFound)
            }
            Err(err) => {
                self.rate_limiter.release(&key).await;
                Err(err)
            }
        }
    }

    /// Dry-run moderation check: analyzes without reserving a rate-limit
    /// slot or persisting anything.
    pub async fn preview(&self, text: &str, bypass: bool) -> ModerationVerdict {
        if bypass {
            return bypass_verdict();
        }
        self.moderation.analyze(text).await
    }
}

fn bypass_verdict() -> ModerationVerdict {
    ModerationVerdict {
        decision: Decision::Approve,
        reason: "test bypass".to_string(),
        flags: vec![],
        severity: 0,
        used_ai: false,
        latency_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::community::MemoryCommunityStore;

    fn service() -> SubmissionService {
        SubmissionService::new(
            Arc::new(MemoryCommunityStore::new()),
            RateLimiter::new(None, None),
            ModerationEngine::heuristic_only(),
            Duration::from_secs(6 * 60 * 60),
            Duration::from_secs(365 * 24 * 60 * 60),
        )
    }

    fn input(device: &str, text: &str) -> SubmitInput {
        SubmitInput {
            name: Some("Rumi".to_string()),
            is_anonymous: false,
            lang: None,
            text: text.to_string(),
            ip: "203.0.113.7".to_string(),
            device: device.to_string(),
            bypass: false,
        }
    }

    #[tokio::test]
    async fn second_submission_in_window_is_limited() {
        let service = service();
        let first = service.submit(input("dev-1", "ekta bhalo golpo")).await.unwrap();
        assert!(matches!(first, SubmitOutcome::Published(_)));

        let second = service.submit(input("dev-1", "arekta bhalo golpo")).await.unwrap();
        assert!(matches!(second, SubmitOutcome::RateLimited));
    }

    #[tokio::test]
    async fn different_device_is_not_limited() {
        let service = service();
        service.submit(input("dev-1", "ekta bhalo golpo")).await.unwrap();
        let other = service.submit(input("dev-2", "arekta bhalo golpo")).await.unwrap();
        assert!(matches!(other, SubmitOutcome::Published(_)));
    }

    #[tokio::test]
    async fn rejected_story_is_not_persisted_and_burns_the_slot() {
        let service = service();
        let outcome = service.submit(input("dev-1", "dekho porn video")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Rejected { .. }));
        assert!(service.store.get_feed().await.unwrap().is_empty());
        assert!(service.store.list_pending().await.unwrap().is_empty());

        // The slot was reserved before moderation ran.
        let retry = service.submit(input("dev-1", "ekdom clean golpo")).await.unwrap();
        assert!(matches!(retry, SubmitOutcome::RateLimited));
    }

    #[tokio::test]
    async fn bypass_skips_limiter_and_tags_post() {
        let service = service();
        for _ in 0..3 {
            let mut submission = input("dev-1", "ekta bhalo golpo");
            submission.bypass = true;
            let outcome = service.submit(submission).await.unwrap();
            let SubmitOutcome::Published(post) = outcome else {
                panic!("bypass submission should publish");
            };
            assert!(post.is_test);
        }
    }

    #[tokio::test]
    async fn anonymous_submission_drops_the_name() {
        let service = service();
        let mut submission = input("dev-1", "ekta bhalo golpo");
        submission.is_anonymous = true;
        let SubmitOutcome::Published(post) = service.submit(submission).await.unwrap() else {
            panic!("should publish");
        };
        assert!(post.author.is_none());
    }

    #[tokio::test]
    async fn duplicate_reaction_is_a_noop() {
        let service = service();
        let SubmitOutcome::Published(post) =
            service.submit(input("dev-1", "ekta bhalo golpo")).await.unwrap()
        else {
            panic!("should publish");
        };

        let first = service
            .react(post.id, ReactionType::Heart, "dev-9")
            .await
            .unwrap();
        let ReactOutcome::Updated { reactions } = first else {
            panic!("first reaction should count");
        };
        assert_eq!(reactions.get("heart"), Some(&1));

        let second = service
            .react(post.id, ReactionType::Heart, "dev-9")
            .await
            .unwrap();
        let ReactOutcome::Duplicate { reactions } = second else {
            panic!("second reaction should dedupe");
        };
        assert_eq!(reactions.get("heart"), Some(&1));
    }

    #[tokio::test]
    async fn distinct_emoji_types_both_count() {
        let service = service();
        let SubmitOutcome::Published(post) =
            service.submit(input("dev-1", "ekta bhalo golpo")).await.unwrap()
        else {
            panic!("should publish");
        };

        service.react(post.id, ReactionType::Heart, "dev-9").await.unwrap();
        let outcome = service
            .react(post.id, ReactionType::Laugh, "dev-9")
            .await
            .unwrap();
        let ReactOutcome::Updated { reactions } = outcome else {
            panic!("different emoji should count");
        };
        assert_eq!(reactions.get("heart"), Some(&1));
        assert_eq!(reactions.get("laugh"), Some(&1));
    }

    #[tokio::test]
    async fn reacting_to_unknown_post_is_not_found() {
        let service = service();
        let outcome = service
            .react(Uuid::new_v4(), ReactionType::Heart, "dev-9")
            .await
            .unwrap();
        assert!(matches!(outcome, ReactOutcome::NotFound));
    }

    #[tokio::test]
    async fn unrecorded_reaction_does_not_consume_the_dedupe_slot() {
        let service = service();
        let missing = Uuid::new_v4();

        // A miss must not look like a duplicate on retry.
        let first = service
            .react(missing, ReactionType::Heart, "dev-9")
            .await
            .unwrap();
        assert!(matches!(first, ReactOutcome::NotFound));
        let retry = service
            .react(missing, ReactionType::Heart, "dev-9")
            .await
            .unwrap();
        assert!(matches!(retry, ReactOutcome::NotFound));
    }

    #[tokio::test]
    async fn preview_does_not_reserve_the_slot() {
        let service = service();
        let verdict = service.preview("ekdom clean golpo", false).await;
        assert_eq!(verdict.decision, Decision::Approve);

        let outcome = service.submit(input("dev-1", "ekdom clean golpo")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Published(_)));
    }
}
