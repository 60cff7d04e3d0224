use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{header, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

mod auth;
mod config;
mod db;
pub mod error;
mod handlers;
mod meetgeek;
mod models;
mod oauth;
mod schema;
mod sync;

use auth::types::AuthConfig;
use config::AppConfig;
use sync::queue::SyncQueue;

/// Shared application state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: db::DbPool,
    pub config: Arc<AppConfig>,
    pub auth_config: Arc<AuthConfig>,
    pub http: reqwest::Client,
    pub queue: SyncQueue,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::from_env()?);
    let auth_config =
        Arc::new(AuthConfig::from_env().map_err(|e| anyhow::anyhow!("auth config: {}", e))?);

    let pool = db::establish_connection_pool(&config.database_url)?;
    let http = reqwest::Client::new();

    let queue = sync::queue::start_sync_worker(pool.clone(), config.clone(), http.clone());

    let state = AppState {
        pool,
        config,
        auth_config,
        http,
        queue,
    };

    // Connection and sync routes require an operator session; the OAuth
    // connect callback cannot (the provider calls it directly).
    let protected = Router::new()
        .route("/api/connections", get(handlers::list_connections))
        .route("/api/connections/:id", delete(handlers::delete_connection))
        .route("/api/sync", post(handlers::trigger_sync))
        .route("/api/sync/status", get(handlers::sync_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        // Operator sign-in
        .route("/api/auth/login", post(auth::auth_login))
        .route("/api/auth/callback", get(auth::auth_callback))
        .route("/api/auth/me", get(auth::auth_me))
        .route("/api/auth/logout", post(auth::auth_logout))
        // Provider connect flow
        .route(
            "/api/oauth/:provider/authorize",
            get(oauth::oauth_authorize),
        )
        .route("/api/oauth/:provider/callback", get(oauth::oauth_callback))
        .merge(protected)
        .layer(build_cors_layer())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build CORS layer based on environment configuration.
///
/// If CORS_ALLOWED_ORIGINS is set, only those origins are allowed.
/// If not set, defaults to permissive CORS (for development only).
fn build_cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok();

    match allowed_origins {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                tracing::warn!(
                    "CORS_ALLOWED_ORIGINS is set but empty, using permissive CORS (not recommended for production)"
                );
                CorsLayer::permissive()
            } else {
                tracing::info!("CORS configured for origins: {:?}", origins);
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_credentials(true)
            }
        }
        None => {
            tracing::warn!(
                "CORS_ALLOWED_ORIGINS not set, using permissive CORS (not recommended for production)"
            );
            CorsLayer::permissive()
        }
    }
}
