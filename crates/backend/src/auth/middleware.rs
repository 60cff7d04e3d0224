//! Session-validation middleware for protected routes.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ErrorResponse;
use crate::AppState;

use super::jwt;
use super::types::{AuthConfig, AuthUser, Claims};

/// Require a valid session. Use with `axum::middleware::from_fn_with_state`.
///
/// Missing or invalid tokens are 401; a valid token for an email no longer
/// on the allowlist is 403.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = &state.auth_config;

    let token = extract_token_from_cookie(request.headers(), &config.cookie_name)
        .or_else(|| extract_token_from_header(request.headers()));

    let token = match token {
        Some(t) => t,
        None => return unauthorized("Missing authentication"),
    };

    let claims = match jwt::validate_token(config, &token) {
        Ok(c) => c,
        Err(_) => return unauthorized("Invalid or expired token"),
    };

    if !config.is_email_allowed(&claims.sub) {
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "Email not authorized".to_string(),
                details: None,
            }),
        )
            .into_response();
    }

    let response = next.run(request).await;

    // Sliding session: re-issue the cookie once the token is a day old.
    if jwt::should_refresh(&claims) {
        if let Ok(new_token) = jwt::create_token(config, &claims.sub, claims.name.clone()) {
            let cookie =
                build_auth_cookie(&config.cookie_name, &new_token, config.token_duration_days);
            let (mut parts, body) = response.into_parts();
            if let Ok(cookie_value) = cookie.parse() {
                parts.headers.insert(header::SET_COOKIE, cookie_value);
            }
            return Response::from_parts(parts, body);
        }
    }

    response
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.to_string(),
            details: None,
        }),
    )
        .into_response()
}

fn extract_token_from_cookie(headers: &axum::http::HeaderMap, cookie_name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

    for cookie_str in cookie_header.split(';') {
        if let Ok(cookie) = cookie::Cookie::parse(cookie_str.trim()) {
            if cookie.name() == cookie_name {
                return Some(cookie.value().to_string());
            }
        }
    }

    None
}

fn extract_token_from_header(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
}

/// Build the session cookie string.
pub fn build_auth_cookie(name: &str, value: &str, days: i64) -> String {
    let max_age = days * 24 * 60 * 60;
    let secure = if std::env::var("RUST_ENV").unwrap_or_default() == "production" {
        "; Secure"
    } else {
        ""
    };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        name, value, max_age, secure
    )
}

/// Validate the session from request headers and return the operator.
pub fn extract_auth_user(
    headers: &axum::http::HeaderMap,
    config: &AuthConfig,
) -> Result<AuthUser, (StatusCode, Json<ErrorResponse>)> {
    let token = extract_token_from_cookie(headers, &config.cookie_name)
        .or_else(|| extract_token_from_header(headers))
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Missing authentication".to_string(),
                    details: None,
                }),
            )
        })?;

    let claims: Claims = jwt::validate_token(config, &token).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid or expired token".to_string(),
                details: None,
            }),
        )
    })?;

    if !config.is_email_allowed(&claims.sub) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "Email not authorized".to_string(),
                details: None,
            }),
        ));
    }

    Ok(AuthUser {
        email: claims.sub,
        name: claims.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn bearer_header_is_accepted() {
        let config = AuthConfig::for_tests();
        let token = jwt::create_token(&config, "operator@example.com", None).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );

        let user = extract_auth_user(&headers, &config).expect("should authenticate");
        assert_eq!(user.email, "operator@example.com");
    }

    #[test]
    fn session_cookie_is_accepted() {
        let config = AuthConfig::for_tests();
        let token = jwt::create_token(&config, "operator@example.com", None).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("other=1; {}={}", config.cookie_name, token)
                .parse()
                .unwrap(),
        );

        assert!(extract_auth_user(&headers, &config).is_ok());
    }

    #[test]
    fn missing_token_is_unauthorized() {
        let config = AuthConfig::for_tests();
        let headers = HeaderMap::new();
        let (status, _) = extract_auth_user(&headers, &config).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn delisted_email_is_forbidden() {
        let mut config = AuthConfig::for_tests();
        let token = jwt::create_token(&config, "operator@example.com", None).unwrap();
        config.allowed_emails = vec!["someone-else@example.com".to_string()];

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );

        let (status, _) = extract_auth_user(&headers, &config).unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
