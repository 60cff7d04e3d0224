//! OAuth connect-flow HTTP handlers.
//!
//! The callback never lets an error escape as a response body: every path
//! terminates in a redirect carrying a machine-readable `error` code, with
//! the account slug preserved whenever state decoding succeeded.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use serde::Deserialize;
use shared_types::{Provider, SyncState};

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::NewOAuthToken;
use crate::oauth::provider::build_authorize_url;
use crate::oauth::state::ConnectState;
use crate::oauth::token::{exchange_code, fetch_identity_email, microsoft_tenant_id};
use crate::sync::queue::SyncJob;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub account_id: String,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub from_settings: bool,
}

/// `GET /api/oauth/:provider/authorize` — redirect to the provider's
/// consent screen.
pub async fn oauth_authorize(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    Query(params): Query<AuthorizeParams>,
) -> ApiResult<Redirect> {
    let provider = Provider::from_str(&provider_name)
        .ok_or_else(|| ApiError::bad_request(format!("unknown provider '{}'", provider_name)))?;

    if params.account_id.is_empty() {
        return Err(ApiError::bad_request("account_id is required"));
    }

    let credentials = state.config.credentials(provider).ok_or_else(|| {
        ApiError::Config(format!("{} client credentials not configured", provider))
    })?;

    let connect_state = ConnectState {
        account_id: params.account_id,
        auto_connect: params.auto_connect,
        from_settings: params.from_settings,
    };

    let url = build_authorize_url(&state.config, credentials, provider, &connect_state.encode());

    Ok(Redirect::to(&url))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denies consent.
    pub error: Option<String>,
}

/// `GET /api/oauth/:provider/callback`
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let connect_state = params.state.as_deref().and_then(ConnectState::decode);

    match handle_callback_inner(&state, &provider_name, params, connect_state.clone()).await {
        Ok(path) => Redirect::to(&path).into_response(),
        Err(code) => Redirect::to(&error_path(connect_state.as_ref(), code)).into_response(),
    }
}

/// Machine-readable error codes carried on failure redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackErrorCode {
    InvalidState,
    UnknownProvider,
    AccessDenied,
    MissingCode,
    ProviderConfigMissing,
    TokenExchangeFailed,
    IdentityFetchFailed,
    TokenStoreFailed,
}

impl CallbackErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackErrorCode::InvalidState => "invalid_state",
            CallbackErrorCode::UnknownProvider => "unknown_provider",
            CallbackErrorCode::AccessDenied => "access_denied",
            CallbackErrorCode::MissingCode => "missing_code",
            CallbackErrorCode::ProviderConfigMissing => "provider_config_missing",
            CallbackErrorCode::TokenExchangeFailed => "token_exchange_failed",
            CallbackErrorCode::IdentityFetchFailed => "identity_fetch_failed",
            CallbackErrorCode::TokenStoreFailed => "token_store_failed",
        }
    }
}

async fn handle_callback_inner(
    state: &AppState,
    provider_name: &str,
    params: CallbackParams,
    connect_state: Option<ConnectState>,
) -> Result<String, CallbackErrorCode> {
    let provider =
        Provider::from_str(provider_name).ok_or(CallbackErrorCode::UnknownProvider)?;

    if let Some(provider_error) = params.error {
        tracing::warn!("{} callback returned error: {}", provider, provider_error);
        return Err(CallbackErrorCode::AccessDenied);
    }

    let connect_state = connect_state.ok_or(CallbackErrorCode::InvalidState)?;
    let code = params.code.ok_or(CallbackErrorCode::MissingCode)?;

    let credentials = state
        .config
        .credentials(provider)
        .ok_or(CallbackErrorCode::ProviderConfigMissing)?;

    let redirect_uri = state.config.redirect_uri(provider);
    let tokens = exchange_code(&state.http, credentials, provider, &redirect_uri, &code)
        .await
        .map_err(|e| {
            tracing::error!("{} token exchange failed: {}", provider, e);
            CallbackErrorCode::TokenExchangeFailed
        })?;

    let email = fetch_identity_email(&state.http, provider, &tokens.access_token, &tokens)
        .await
        .map_err(|e| {
            tracing::error!("{} identity lookup failed: {}", provider, e);
            CallbackErrorCode::IdentityFetchFailed
        })?;

    let expires_at = tokens.expires_at(Utc::now());
    let api_domain = tokens.instance_url.clone().or(tokens.api_domain.clone());
    let tenant_id = match provider {
        Provider::Microsoft => microsoft_tenant_id(&tokens.access_token),
        _ => None,
    };

    let new_token = NewOAuthToken {
        account_id: connect_state.account_id.clone(),
        provider: provider.as_str().to_string(),
        email_address: email.clone(),
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone(),
        expires_at,
        scope: tokens.scope.clone(),
        tenant_id,
        api_domain,
        is_active: true,
        sync_status: SyncState::Pending.as_str().to_string(),
    };

    let mut conn = db::get_conn(&state.pool).await.map_err(|e| {
        tracing::error!("DB unavailable during {} callback: {}", provider, e);
        CallbackErrorCode::TokenStoreFailed
    })?;

    db::oauth_tokens::upsert(&mut conn, new_token)
        .await
        .map_err(|e| {
            tracing::error!("Failed to store {} token: {}", provider, e);
            CallbackErrorCode::TokenStoreFailed
        })?;

    tracing::info!(
        "Connected {} account {} for tenant {}",
        provider,
        email,
        connect_state.account_id
    );

    // Kick off the first sync for providers we can sync. Enqueue failures
    // are logged by the queue; the connect flow itself has succeeded.
    if provider.syncable() {
        state.queue.enqueue(SyncJob {
            account_id: connect_state.account_id.clone(),
            email: Some(email),
        });
    }

    Ok(success_path(&connect_state, provider))
}

fn success_path(state: &ConnectState, provider: Provider) -> String {
    if state.from_settings {
        format!(
            "/{}/settings?connected={}",
            state.account_id,
            provider.as_str()
        )
    } else if state.auto_connect {
        format!(
            "/{}/dealflow?connected={}&auto_setup=complete",
            state.account_id,
            provider.as_str()
        )
    } else {
        format!(
            "/{}/dealflow?connected={}",
            state.account_id,
            provider.as_str()
        )
    }
}

/// Failure redirect path: preserve the account slug when state decoded,
/// fall back to the generic home page otherwise.
fn error_path(state: Option<&ConnectState>, code: CallbackErrorCode) -> String {
    match state {
        Some(s) => format!("/{}/dealflow?error={}", s.account_id, code.as_str()),
        None => format!("/home?error={}", code.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_connect_success_redirects_to_dealflow_setup_complete() {
        let state = ConnectState {
            account_id: "acc1".to_string(),
            auto_connect: true,
            from_settings: false,
        };
        assert_eq!(
            success_path(&state, Provider::Google),
            "/acc1/dealflow?connected=google&auto_setup=complete"
        );
    }

    #[test]
    fn settings_flow_redirects_back_to_settings() {
        let state = ConnectState {
            account_id: "acc1".to_string(),
            auto_connect: false,
            from_settings: true,
        };
        assert_eq!(
            success_path(&state, Provider::Hubspot),
            "/acc1/settings?connected=hubspot"
        );
    }

    #[test]
    fn error_redirect_preserves_account_slug_when_state_decoded() {
        let state = ConnectState::new("acc1");
        assert_eq!(
            error_path(Some(&state), CallbackErrorCode::TokenExchangeFailed),
            "/acc1/dealflow?error=token_exchange_failed"
        );
    }

    #[test]
    fn error_redirect_falls_back_to_home_without_state() {
        assert_eq!(
            error_path(None, CallbackErrorCode::InvalidState),
            "/home?error=invalid_state"
        );
    }
}
