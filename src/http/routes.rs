use axum::{routing::get, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn community() -> Router<AppState> {
    Router::new()
        .route("/api/community/feed", get(handlers::get_feed))
        .route("/api/submit-story", post(handlers::submit_story))
        .route("/api/reaction", post(handlers::add_reaction))
        .route("/api/moderate-preview", post(handlers::moderate_preview))
}

pub fn admin() -> Router<AppState> {
    Router::new()
        .route(
            "/api/admin/community/pending",
            get(handlers::list_pending),
        )
        .route(
            "/api/admin/community/pending/:post_id/approve",
            post(handlers::approve_pending),
        )
        .route(
            "/api/admin/community/pending/:post_id/reject",
            post(handlers::reject_pending),
        )
        .route(
            "/api/admin/community/posts/:id/feature",
            post(handlers::feature_post),
        )
}
