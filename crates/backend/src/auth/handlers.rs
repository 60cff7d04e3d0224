//! Operator sign-in HTTP handlers.

use axum::extract::Query;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::AppState;

use super::{
    build_auth_cookie, extract_auth_user, jwt,
    types::{AuthUserResponse, LoginInitResponse},
};

/// `POST /api/auth/login` — start the Google sign-in flow.
///
/// Sign-in only needs identity scopes; data-source access is granted
/// separately through the connect flow.
pub async fn auth_login(State(state): State<AppState>) -> ApiResult<Json<LoginInitResponse>> {
    let config = &state.auth_config;

    let csrf_state = uuid::Uuid::new_v4().to_string();
    let scopes = ["openid", "email", "profile"].join(" ");

    let auth_url = format!(
        "https://accounts.google.com/o/oauth2/v2/auth?\
         client_id={}&\
         redirect_uri={}&\
         response_type=code&\
         scope={}&\
         state={}",
        urlencoding::encode(&config.google_client_id),
        urlencoding::encode(&config.auth_redirect_uri),
        urlencoding::encode(&scopes),
        csrf_state
    );

    Ok(Json(LoginInitResponse { auth_url }))
}

#[derive(Debug, Deserialize)]
pub struct AuthCallbackParams {
    pub code: String,
    #[allow(dead_code)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: String,
    name: Option<String>,
}

/// `GET /api/auth/callback` — finish Google sign-in.
///
/// Exchanges the code, checks the allowlist, and sets the session cookie.
/// Errors redirect to the home page with an `auth_error` query parameter.
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<AuthCallbackParams>,
) -> Response {
    match handle_callback_inner(&state, params).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Sign-in callback error: {}", e);
            Redirect::to("/?auth_error=auth_failed").into_response()
        }
    }
}

async fn handle_callback_inner(
    state: &AppState,
    params: AuthCallbackParams,
) -> anyhow::Result<Response> {
    let config = &state.auth_config;

    let token_response = state
        .http
        .post("https://oauth2.googleapis.com/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", &params.code),
            ("client_id", &config.google_client_id),
            ("client_secret", &config.google_client_secret),
            ("redirect_uri", &config.auth_redirect_uri),
        ])
        .send()
        .await?;

    if !token_response.status().is_success() {
        let status = token_response.status();
        let body = token_response.text().await.unwrap_or_default();
        tracing::error!("Sign-in token exchange failed: {} - {}", status, body);
        return Ok(Redirect::to("/?auth_error=token_exchange_failed").into_response());
    }

    let tokens: GoogleTokenResponse = token_response.json().await?;

    let user_info: GoogleUserInfo = state
        .http
        .get("https://www.googleapis.com/oauth2/v2/userinfo")
        .bearer_auth(&tokens.access_token)
        .send()
        .await?
        .json()
        .await?;

    if !config.is_email_allowed(&user_info.email) {
        tracing::warn!("Sign-in attempt from unlisted email: {}", user_info.email);
        return Ok(Redirect::to("/?auth_error=unauthorized_email").into_response());
    }

    let token = jwt::create_token(config, &user_info.email, user_info.name)?;
    let cookie = build_auth_cookie(&config.cookie_name, &token, config.token_duration_days);

    tracing::info!("Operator signed in: {}", user_info.email);

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/"),
            (header::SET_COOKIE, cookie.as_str()),
        ],
    )
        .into_response())
}

/// `GET /api/auth/me` — the current operator.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match extract_auth_user(&headers, &state.auth_config) {
        Ok(user) => Json(AuthUserResponse {
            email: user.email,
            name: user.name,
        })
        .into_response(),
        Err(err) => err.into_response(),
    }
}

/// `POST /api/auth/logout` — clear the session cookie.
pub async fn auth_logout(State(state): State<AppState>) -> impl IntoResponse {
    let cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        state.auth_config.cookie_name
    );

    (
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, cookie),
        ],
    )
}
