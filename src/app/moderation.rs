use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::app::escalation::{AiJudgment, Escalator};
use crate::app::heuristics;
use crate::domain::moderation::{Decision, Intent, ModerationVerdict};

/// Sole moderation entry point for the rest of the system. Heuristics run
/// first; ambiguous (`pending`) results are escalated to the AI when one is
/// configured. Never returns an error: every internal failure degrades to
/// the heuristic verdict.
#[derive(Clone)]
pub struct ModerationEngine {
    escalator: Option<Arc<dyn Escalator>>,
    ai_timeout: Duration,
}

impl ModerationEngine {
    pub fn new(escalator: Option<Arc<dyn Escalator>>, ai_timeout: Duration) -> Self {
        Self {
            escalator,
            ai_timeout,
        }
    }

    pub fn heuristic_only() -> Self {
        Self::new(None, Duration::from_millis(0))
    }

    pub async fn analyze(&self, text: &str) -> ModerationVerdict {
        let started = Instant::now();
        let report = heuristics::scan(text);

        let mut verdict = ModerationVerdict {
            decision: report.decision,
            reason: report.reason,
            flags: report.flags,
            severity: report.severity,
            used_ai: false,
            latency_ms: 0,
        };

        // Approve needs no second opinion (saves quota); reject is terminal
        // and a hard match must never be argued back open by the model.
        if verdict.decision == Decision::Pending {
            if let Some(escalator) = &self.escalator {
                match tokio::time::timeout(self.ai_timeout, escalator.classify(text)).await {
                    Ok(Ok(judgment)) => merge_judgment(&mut verdict, judgment),
                    Ok(Err(err)) => {
                        tracing::warn!(error = ?err, "ai escalation failed, keeping heuristic verdict");
                    }
                    Err(_) => {
                        tracing::warn!(
                            timeout_ms = self.ai_timeout.as_millis() as u64,
                            "ai escalation timed out, keeping heuristic verdict"
                        );
                    }
                }
            }
        }

        verdict.latency_ms = started.elapsed().as_millis() as u64;
        verdict
    }
}

/// Fold the AI's judgment into the heuristic verdict, then apply the safety
/// overrides that no model output may bypass.
fn merge_judgment(verdict: &mut ModerationVerdict, judgment: AiJudgment) {
    let had_hard_flag = verdict.has_hard_flag();

    verdict.used_ai = true;
    verdict.decision = judgment.decision;
    verdict.reason = format!("ai classified intent as {:?}", judgment.intent).to_lowercase();
    for term in &judgment.severe_terms {
        verdict.flags.push(format!("ai:severe:{}", term));
    }
    for term in &judgment.mild_terms {
        verdict.flags.push(format!("ai:mild:{}", term));
    }

    if judgment.intent == Intent::Hateful {
        verdict.decision = Decision::Reject;
        verdict.reason = "hateful intent".to_string();
    }
    if judgment.intent == Intent::Sexual && verdict.decision == Decision::Approve {
        // The model may never unilaterally approve sexual content.
        verdict.decision = Decision::Pending;
        verdict.reason = "sexual content needs human review".to_string();
    }
    if had_hard_flag {
        verdict.decision = Decision::Reject;
        verdict.reason = "contains disallowed content".to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEscalator {
        judgment: AiJudgment,
        calls: AtomicUsize,
    }

    impl StubEscalator {
        fn new(intent: Intent, decision: Decision) -> Arc<Self> {
            Arc::new(Self {
                judgment: AiJudgment {
                    intent,
                    decision,
                    mild_terms: vec![],
                    severe_terms: vec![],
                },
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Escalator for StubEscalator {
        async fn classify(&self, _text: &str) -> Result<AiJudgment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.judgment.clone())
        }
    }

    struct FailingEscalator;

    #[async_trait]
    impl Escalator for FailingEscalator {
        async fn classify(&self, _text: &str) -> Result<AiJudgment> {
            Err(anyhow!("network down"))
        }
    }

    struct SlowEscalator;

    #[async_trait]
    impl Escalator for SlowEscalator {
        async fn classify(&self, _text: &str) -> Result<AiJudgment> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(AiJudgment {
                intent: Intent::Playful,
                decision: Decision::Approve,
                mild_terms: vec![],
                severe_terms: vec![],
            })
        }
    }

    fn engine(escalator: Arc<dyn Escalator>) -> ModerationEngine {
        ModerationEngine::new(Some(escalator), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn ai_can_approve_playful_slang() {
        let stub = StubEscalator::new(Intent::Playful, Decision::Approve);
        let verdict = engine(stub.clone()).analyze("tui pagol naki").await;
        assert_eq!(verdict.decision, Decision::Approve);
        assert!(verdict.used_ai);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clean_text_never_escalates() {
        let stub = StubEscalator::new(Intent::Playful, Decision::Approve);
        let verdict = engine(stub.clone()).analyze("ekdom bhalo golpo").await;
        assert_eq!(verdict.decision, Decision::Approve);
        assert!(!verdict.used_ai);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hard_term_never_escalates() {
        let stub = StubEscalator::new(Intent::Playful, Decision::Approve);
        let verdict = engine(stub.clone()).analyze("dekho porn link").await;
        assert_eq!(verdict.decision, Decision::Reject);
        assert!(!verdict.used_ai);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hateful_intent_forces_reject() {
        let stub = StubEscalator::new(Intent::Hateful, Decision::Approve);
        let verdict = engine(stub).analyze("shala ki korli").await;
        assert_eq!(verdict.decision, Decision::Reject);
        assert!(verdict.used_ai);
    }

    #[tokio::test]
    async fn sexual_approve_downgrades_to_pending() {
        let stub = StubEscalator::new(Intent::Sexual, Decision::Approve);
        let verdict = engine(stub).analyze("shala ki korli").await;
        assert_eq!(verdict.decision, Decision::Pending);
    }

    #[tokio::test]
    async fn sexual_reject_stays_rejected() {
        let stub = StubEscalator::new(Intent::Sexual, Decision::Reject);
        let verdict = engine(stub).analyze("shala ki korli").await;
        assert_eq!(verdict.decision, Decision::Reject);
    }

    #[tokio::test]
    async fn ai_failure_keeps_heuristic_verdict() {
        let verdict = engine(Arc::new(FailingEscalator))
            .analyze("shala ki korli")
            .await;
        assert_eq!(verdict.decision, Decision::Pending);
        assert!(!verdict.used_ai);
    }

    #[tokio::test]
    async fn ai_timeout_keeps_heuristic_verdict() {
        let verdict = engine(Arc::new(SlowEscalator))
            .analyze("tui pagol naki")
            .await;
        assert_eq!(verdict.decision, Decision::Pending);
        assert!(!verdict.used_ai);
    }

    #[tokio::test]
    async fn no_escalator_means_heuristic_only() {
        let engine = ModerationEngine::heuristic_only();
        let verdict = engine.analyze("tui pagol naki").await;
        assert_eq!(verdict.decision, Decision::Pending);
        assert!(!verdict.used_ai);
    }
}
