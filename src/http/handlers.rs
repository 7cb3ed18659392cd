use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::app::submission::{ReactOutcome, SubmissionService, SubmitInput, SubmitOutcome};
use crate::domain::moderation::Decision;
use crate::domain::post::{CommunityPost, PendingPost, ReactionType};
use crate::http::{AdminToken, AppError};
use crate::AppState;

const DEVICE_HEADER: &str = "x-device-id";
const TEST_BYPASS_HEADER: &str = "x-test-bypass";
const MAX_STORY_CHARS: usize = 1000;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

fn submission_service(state: &AppState) -> SubmissionService {
    SubmissionService::new(
        state.store.clone(),
        state.rate_limiter.clone(),
        state.moderation.clone(),
        state.submission_window,
        state.reaction_window,
    )
}

/// Client-supplied device fingerprint; best-effort only, never trusted as
/// more than a rate-limit identity component.
fn device_id(headers: &HeaderMap) -> String {
    headers
        .get(DEVICE_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn is_test_bypass(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.test_bypass_token else {
        return false;
    };
    headers
        .get(TEST_BYPASS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|provided| provided == expected)
        .unwrap_or(false)
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = match &state.db {
        Some(db) => db.ping().await.is_ok(),
        None => true,
    };
    let cache = match &state.cache {
        Some(cache) => cache.ping().await.is_ok(),
        None => true,
    };
    let status = if db && cache { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

/// Public feed. Always 200: a store outage degrades to an empty feed
/// rather than an error page in the client.
pub async fn get_feed(State(state): State<AppState>) -> Json<Vec<CommunityPost>> {
    match state.store.get_feed().await {
        Ok(posts) => Json(posts),
        Err(err) => {
            tracing::error!(error = ?err, "failed to load community feed");
            Json(vec![])
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitStoryRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    pub lang: Option<String>,
    pub text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitStoryResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    post_id: Option<Uuid>,
    message: String,
}

pub async fn submit_story(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<SubmitStoryRequest>,
) -> Result<Json<SubmitStoryResponse>, AppError> {
    let text = payload.text.trim().to_string();
    if text.is_empty() {
        return Err(AppError::bad_request("text is required"));
    }
    if text.chars().count() > MAX_STORY_CHARS {
        return Err(AppError::bad_request(
            "story must be at most 1000 characters",
        ));
    }

    let input = SubmitInput {
        name: payload.name,
        is_anonymous: payload.is_anonymous,
        lang: payload.lang,
        text,
        // Port stripped: only the address identifies the submitter.
        ip: addr.ip().to_string(),
        device: device_id(&headers),
        bypass: is_test_bypass(&state, &headers),
    };

    let outcome = submission_service(&state)
        .submit(input)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to submit story");
            AppError::internal("failed to submit story")
        })?;

    match outcome {
        SubmitOutcome::Published(post) => Ok(Json(SubmitStoryResponse {
            status: "published",
            post_id: Some(post.id),
            message: "Your story is live!".to_string(),
        })),
        SubmitOutcome::PendingReview(pending) => Ok(Json(SubmitStoryResponse {
            status: "pending_review",
            post_id: Some(pending.post_id),
            message: "Your story is in the review queue and will appear once approved."
                .to_string(),
        })),
        SubmitOutcome::RateLimited => Err(AppError::rate_limited(
            "You can share one story every 6 hours. Please try again later.",
        )),
        SubmitOutcome::Rejected { message } => Ok(Json(SubmitStoryResponse {
            status: "rejected",
            post_id: None,
            message,
        })),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub post_id: Option<String>,
    #[serde(rename = "type")]
    pub reaction_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionResponse {
    ok: bool,
    post_id: Uuid,
    reactions: std::collections::HashMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub async fn add_reaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ReactionRequest>,
) -> Result<Json<ReactionResponse>, AppError> {
    let post_id = payload
        .post_id
        .as_deref()
        .ok_or_else(|| AppError::bad_request("postId is required"))?;
    let post_id =
        Uuid::parse_str(post_id).map_err(|_| AppError::bad_request("invalid postId"))?;
    let reaction = payload
        .reaction_type
        .as_deref()
        .and_then(ReactionType::parse)
        .ok_or_else(|| AppError::bad_request("invalid reaction type"))?;

    let outcome = submission_service(&state)
        .react(post_id, reaction, &device_id(&headers))
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %post_id, "failed to record reaction");
            AppError::internal("failed to record reaction")
        })?;

    match outcome {
        ReactOutcome::Updated { reactions } => Ok(Json(ReactionResponse {
            ok: true,
            post_id,
            reactions,
            message: None,
        })),
        ReactOutcome::Duplicate { reactions } => Ok(Json(ReactionResponse {
            ok: false,
            post_id,
            reactions,
            message: Some("You already reacted with this emoji.".to_string()),
        })),
        ReactOutcome::NotFound => Err(AppError::not_found("post not found")),
    }
}

#[derive(Deserialize)]
pub struct PreviewRequest {
    pub text: String,
}

/// Dry-run moderation check for the submission form; persists nothing and
/// does not touch the rate limiter.
pub async fn moderate_preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PreviewRequest>,
) -> Result<Json<Value>, AppError> {
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(AppError::bad_request("text is required"));
    }

    let verdict = submission_service(&state)
        .preview(text, is_test_bypass(&state, &headers))
        .await;

    if verdict.decision == Decision::Approve {
        Ok(Json(json!({ "status": "ok" })))
    } else {
        Ok(Json(json!({
            "status": "review_suggested",
            "reason": verdict.reason,
            "flags": verdict.flags,
        })))
    }
}

// ---------------------------------------------------------------------------
// Admin: pending queue + featured pick
// ---------------------------------------------------------------------------

pub async fn list_pending(
    _admin: AdminToken,
    State(state): State<AppState>,
) -> Result<Json<Vec<PendingPost>>, AppError> {
    let pending = state.store.list_pending().await.map_err(|err| {
        tracing::error!(error = ?err, "failed to list pending queue");
        AppError::internal("failed to list pending queue")
    })?;
    Ok(Json(pending))
}

#[derive(Deserialize)]
pub struct ApprovePendingRequest {
    pub text: Option<String>,
}

pub async fn approve_pending(
    _admin: AdminToken,
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    body: Option<Json<ApprovePendingRequest>>,
) -> Result<Json<CommunityPost>, AppError> {
    let edited_text = body
        .and_then(|Json(payload)| payload.text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let post = state
        .store
        .approve_pending(post_id, edited_text)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %post_id, "failed to approve pending story");
            AppError::internal("failed to approve pending story")
        })?;

    match post {
        Some(post) => {
            tracing::info!(pending_id = %post_id, post_id = %post.id, "pending story approved");
            Ok(Json(post))
        }
        None => Err(AppError::not_found("pending story not found")),
    }
}

pub async fn reject_pending(
    _admin: AdminToken,
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let removed = state.store.reject_pending(post_id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %post_id, "failed to reject pending story");
        AppError::internal("failed to reject pending story")
    })?;

    if removed {
        tracing::info!(pending_id = %post_id, "pending story rejected");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("pending story not found"))
    }
}

pub async fn feature_post(
    _admin: AdminToken,
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let updated = state.store.set_featured(post_id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %post_id, "failed to feature post");
        AppError::internal("failed to feature post")
    })?;

    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("post not found"))
    }
}
