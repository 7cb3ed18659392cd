use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::moderation::{Decision, Intent};

/// Second-opinion classification for stories the heuristic scan parked in
/// review. Capability-gated: when no API credential is configured the
/// moderation engine simply never constructs an escalator.
#[async_trait]
pub trait Escalator: Send + Sync {
    async fn classify(&self, text: &str) -> Result<AiJudgment>;
}

#[derive(Debug, Clone)]
pub struct AiJudgment {
    pub intent: Intent,
    pub decision: Decision,
    pub mild_terms: Vec<String>,
    pub severe_terms: Vec<String>,
}

pub struct GeminiEscalator {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

impl GeminiEscalator {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    fn build_prompt(text: &str) -> String {
        format!(
            "You are moderating short comedy stories submitted by a Bengali-speaking \
             audience, written in Bangla, English or romanized Banglish. Playful teasing \
             and mild slang are part of the culture and are acceptable. Classify the \
             intent of the story below and list any slang you noticed.\n\
             Respond with strict JSON only, no prose, no markdown, in this exact shape:\n\
             {{\"intent\": \"playful|neutral|hateful|sexual|spam\", \
             \"decision\": \"approve|pending|reject\", \
             \"mild_terms\": [], \"severe_terms\": []}}\n\n\
             Story:\n{}",
            text
        )
    }
}

#[async_trait]
impl Escalator for GeminiEscalator {
    async fn classify(&self, text: &str) -> Result<AiJudgment> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_BASE_URL, self.model, self.api_key
        );

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Self::build_prompt(text),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("gemini returned status {}", response.status()));
        }

        let body: GenerateResponse = response.json().await?;
        let raw = body
            .candidates
            .first()
            .and_then(|candidate| candidate.content.parts.first())
            .map(|part| part.text.as_str())
            .ok_or_else(|| anyhow!("empty gemini response"))?;

        parse_judgment(raw)
    }
}

/// Parse the model's reply defensively: strip markdown code fences, then
/// require the exact field shape. Any deviation is an error, which the
/// caller treats as "AI unavailable" and answers heuristically.
pub fn parse_judgment(raw: &str) -> Result<AiJudgment> {
    let trimmed = strip_code_fences(raw);
    let parsed: RawJudgment = serde_json::from_str(trimmed)
        .map_err(|err| anyhow!("unparseable judgment: {}", err))?;

    let intent = Intent::parse(&parsed.intent)
        .ok_or_else(|| anyhow!("unknown intent: {}", parsed.intent))?;
    let decision = Decision::from_db(&parsed.decision)
        .ok_or_else(|| anyhow!("unknown decision: {}", parsed.decision))?;

    Ok(AiJudgment {
        intent,
        decision,
        mild_terms: parsed.mild_terms,
        severe_terms: parsed.severe_terms,
    })
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[derive(Deserialize)]
struct RawJudgment {
    intent: String,
    decision: String,
    #[serde(default)]
    mild_terms: Vec<String>,
    #[serde(default)]
    severe_terms: Vec<String>,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let judgment = parse_judgment(
            r#"{"intent": "playful", "decision": "approve", "mild_terms": ["pagol"], "severe_terms": []}"#,
        )
        .unwrap();
        assert_eq!(judgment.intent, Intent::Playful);
        assert_eq!(judgment.decision, Decision::Approve);
        assert_eq!(judgment.mild_terms, vec!["pagol"]);
    }

    #[test]
    fn parses_code_fenced_json() {
        let raw = "```json\n{\"intent\": \"neutral\", \"decision\": \"approve\"}\n```";
        let judgment = parse_judgment(raw).unwrap();
        assert_eq!(judgment.intent, Intent::Neutral);
        assert!(judgment.severe_terms.is_empty());
    }

    #[test]
    fn missing_term_lists_default_empty() {
        let judgment =
            parse_judgment(r#"{"intent": "spam", "decision": "reject"}"#).unwrap();
        assert!(judgment.mild_terms.is_empty());
        assert!(judgment.severe_terms.is_empty());
    }

    #[test]
    fn prose_is_an_error() {
        assert!(parse_judgment("This story seems fine to me.").is_err());
    }

    #[test]
    fn unknown_intent_is_an_error() {
        assert!(
            parse_judgment(r#"{"intent": "sarcastic", "decision": "approve"}"#).is_err()
        );
    }

    #[test]
    fn unknown_decision_is_an_error() {
        assert!(
            parse_judgment(r#"{"intent": "neutral", "decision": "maybe"}"#).is_err()
        );
    }
}
