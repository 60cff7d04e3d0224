//! Connection and sync management endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use shared_types::{ConnectionResponse, SyncRequest, SyncRunResponse};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::sync::queue::SyncJob;
use crate::AppState;

/// How many sync runs `GET /api/sync/status` returns.
const SYNC_STATUS_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub account_id: String,
}

/// `GET /api/connections?account_id=...`
pub async fn list_connections(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<Vec<ConnectionResponse>>> {
    if query.account_id.is_empty() {
        return Err(ApiError::bad_request("account_id is required"));
    }

    let mut conn = db::get_conn(&state.pool).await?;
    let rows = db::oauth_tokens::list_for_account(&mut conn, &query.account_id).await?;

    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// `DELETE /api/connections/:id` — disconnect a provider account.
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = db::get_conn(&state.pool).await?;
    let deleted = db::oauth_tokens::delete(&mut conn, connection_id).await?;

    if !deleted {
        return Err(ApiError::not_found(format!("connection {}", connection_id)));
    }

    tracing::info!("Disconnected connection {}", connection_id);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/sync` — queue a sync run for an account.
///
/// The run happens on the worker task; this returns as soon as the job is
/// queued. Progress is visible via `GET /api/sync/status`.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.account_id.is_empty() {
        return Err(ApiError::bad_request("account_id is required"));
    }

    state.queue.enqueue(SyncJob {
        account_id: request.account_id.clone(),
        email: request.email,
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "queued",
            "account_id": request.account_id,
        })),
    ))
}

/// `GET /api/sync/status?account_id=...` — recent sync runs, newest first.
pub async fn sync_status(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<Vec<SyncRunResponse>>> {
    if query.account_id.is_empty() {
        return Err(ApiError::bad_request("account_id is required"));
    }

    let mut conn = db::get_conn(&state.pool).await?;
    let runs =
        db::sync_runs::list_for_account(&mut conn, &query.account_id, SYNC_STATUS_LIMIT).await?;

    Ok(Json(runs.into_iter().map(Into::into).collect()))
}

/// `GET /health`
pub async fn health_check() -> &'static str {
    "OK"
}
