use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adda::app::community::{CommunityStore, MemoryCommunityStore, PgCommunityStore};
use adda::app::escalation::{Escalator, GeminiEscalator};
use adda::app::moderation::ModerationEngine;
use adda::app::rate_limiter::RateLimiter;
use adda::config::AppConfig;
use adda::infra::{cache::RedisCache, db::Db};
use adda::{http, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    // Every backing service is optional: the server always comes up and
    // degrades to in-memory storage and heuristic-only moderation.
    let db = match &config.database_url {
        Some(url) => match Db::connect(url, &config).await {
            Ok(db) => Some(db),
            Err(err) => {
                tracing::warn!(error = ?err, "database unavailable, using in-memory store");
                None
            }
        },
        None => {
            tracing::info!("no DATABASE_URL configured, using in-memory store");
            None
        }
    };

    let cache = match &config.redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(cache) => Some(cache),
            Err(err) => {
                tracing::warn!(error = ?err, "redis unavailable, skipping cache tier");
                None
            }
        },
        None => None,
    };

    let escalator: Option<Arc<dyn Escalator>> = match &config.gemini_api_key {
        Some(api_key) => {
            let escalator = GeminiEscalator::new(
                api_key.clone(),
                config.gemini_model.clone(),
                Duration::from_millis(config.ai_timeout_ms),
            )?;
            Some(Arc::new(escalator))
        }
        None => {
            tracing::info!("no GEMINI_API_KEY configured, moderation is heuristic-only");
            None
        }
    };

    let store: Arc<dyn CommunityStore> = match &db {
        Some(db) => Arc::new(PgCommunityStore::new(db.clone())),
        None => Arc::new(MemoryCommunityStore::new()),
    };

    let state = AppState {
        store,
        rate_limiter: RateLimiter::new(cache.clone(), db.clone()),
        moderation: ModerationEngine::new(
            escalator,
            Duration::from_millis(config.ai_timeout_ms),
        ),
        db,
        cache,
        admin_token: config.admin_token.clone(),
        test_bypass_token: config.test_bypass_token.clone(),
        submission_window: Duration::from_secs(config.submission_window_secs),
        reaction_window: Duration::from_secs(config.reaction_dedupe_secs),
    };

    let app: Router = http::router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);

    let app = app.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
