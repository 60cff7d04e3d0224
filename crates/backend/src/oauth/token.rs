//! Token exchange, identity lookup and refresh-on-expiry.
//!
//! The store guarantees callers never see an access token at or past its
//! `expires_at`: `get_valid_token` performs exactly one refresh attempt when
//! the stored token has expired, persists the result, and otherwise fails
//! with `ReconnectRequired`. Refresh failures are per-connection errors;
//! sibling providers keep syncing.

use chrono::{DateTime, Duration, Utc};
use diesel_async::AsyncPgConnection;
use serde::Deserialize;
use shared_types::Provider;
use thiserror::Error;

use crate::config::{AppConfig, ProviderCredentials};
use crate::db;
use crate::models::OAuthTokenRow;
use crate::oauth::provider::endpoints;

/// Providers are not obliged to send `expires_in` (Salesforce omits it);
/// assume a conservative hour when absent.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token not found")]
    NotFound,

    /// The stored token expired and could not be refreshed (no refresh
    /// token, or the provider rejected it). The user must reconnect.
    #[error("reconnect required: {0}")]
    ReconnectRequired(String),

    #[error("provider credentials not configured for {0}")]
    ConfigMissing(Provider),

    #[error("provider request failed: {0}")]
    Http(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Body of a provider token-endpoint response, for both the
/// `authorization_code` and `refresh_token` grants. Provider-specific
/// extras ride along as optional fields.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    /// Salesforce: the org's API host.
    pub instance_url: Option<String>,
    /// Pipedrive: the company's API host.
    pub api_domain: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry computed at the moment of exchange.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
    }
}

/// A token exactly at its expiry boundary counts as expired
/// (refresh-on-or-after).
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    http: &reqwest::Client,
    credentials: &ProviderCredentials,
    provider: Provider,
    redirect_uri: &str,
    code: &str,
) -> Result<TokenResponse, TokenError> {
    let ep = endpoints(provider);

    let response = http
        .post(ep.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &credentials.client_id),
            ("client_secret", &credentials.client_secret),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| TokenError::Http(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // Provider error bodies are logged, never surfaced to callers.
        tracing::error!("{} code exchange failed: {} - {}", provider, status, body);
        return Err(TokenError::Http(format!("token endpoint returned {}", status)));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| TokenError::Http(format!("invalid token response: {}", e)))
}

/// Exchange a refresh token for a new access token.
async fn refresh(
    http: &reqwest::Client,
    credentials: &ProviderCredentials,
    provider: Provider,
    refresh_token: &str,
) -> Result<TokenResponse, TokenError> {
    let ep = endpoints(provider);

    let response = http
        .post(ep.token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &credentials.client_id),
            ("client_secret", &credentials.client_secret),
        ])
        .send()
        .await
        .map_err(|e| TokenError::Http(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::warn!("{} token refresh rejected: {} - {}", provider, status, body);
        return Err(TokenError::ReconnectRequired(format!(
            "refresh rejected with {}",
            status
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| TokenError::Http(format!("invalid refresh response: {}", e)))
}

/// Return a currently-valid access token for a stored connection,
/// refreshing (once) if the stored one has expired.
pub async fn get_valid_token(
    conn: &mut AsyncPgConnection,
    http: &reqwest::Client,
    config: &AppConfig,
    row: &OAuthTokenRow,
) -> Result<String, TokenError> {
    let now = Utc::now();

    if !is_expired(row.expires_at, now) {
        return Ok(row.access_token.clone());
    }

    let provider = row
        .provider_kind()
        .ok_or_else(|| TokenError::ReconnectRequired(format!("unknown provider {}", row.provider)))?;

    let credentials = config
        .credentials(provider)
        .ok_or(TokenError::ConfigMissing(provider))?;

    let refresh_token_value = row
        .refresh_token
        .as_deref()
        .ok_or_else(|| TokenError::ReconnectRequired("no refresh token stored".to_string()))?;

    tracing::debug!(
        "Access token for {}/{} expired at {}, refreshing",
        row.account_id,
        row.provider,
        row.expires_at
    );

    let refreshed = refresh(http, credentials, provider, refresh_token_value).await?;
    let expires_at = refreshed.expires_at(Utc::now());

    db::oauth_tokens::update_access_token(
        conn,
        row.id,
        &refreshed.access_token,
        expires_at,
        refreshed.refresh_token.as_deref(),
    )
    .await
    .map_err(|e| TokenError::Database(e.to_string()))?;

    Ok(refreshed.access_token)
}

/// Microsoft's tenant id travels as the `tid` claim of the access token.
/// Read without signature verification; the value is stored for reference
/// only, never trusted for authorization.
pub fn microsoft_tenant_id(access_token: &str) -> Option<String> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let payload = access_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("tid")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// The email address of the identity behind a fresh token.
///
/// Each provider exposes this differently; for Salesforce and Pipedrive the
/// host comes from the token response itself.
pub async fn fetch_identity_email(
    http: &reqwest::Client,
    provider: Provider,
    access_token: &str,
    tokens: &TokenResponse,
) -> Result<String, TokenError> {
    #[derive(Deserialize)]
    struct GoogleUserInfo {
        email: String,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct GraphMe {
        mail: Option<String>,
        user_principal_name: Option<String>,
    }

    #[derive(Deserialize)]
    struct HubspotTokenInfo {
        user: String,
    }

    #[derive(Deserialize)]
    struct PipedriveMe {
        data: PipedriveUser,
    }

    #[derive(Deserialize)]
    struct PipedriveUser {
        email: String,
    }

    #[derive(Deserialize)]
    struct SalesforceUserInfo {
        email: String,
    }

    let get_json = |url: String, bearer: bool| {
        let http = http.clone();
        let token = access_token.to_string();
        async move {
            let mut req = http.get(&url);
            if bearer {
                req = req.bearer_auth(&token);
            }
            let response = req.send().await.map_err(|e| TokenError::Http(e.to_string()))?;
            if !response.status().is_success() {
                return Err(TokenError::Http(format!(
                    "identity endpoint returned {}",
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|e| TokenError::Http(e.to_string()))
        }
    };

    let email = match provider {
        Provider::Google => {
            let body = get_json(
                "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
                true,
            )
            .await?;
            serde_json::from_str::<GoogleUserInfo>(&body)
                .map_err(|e| TokenError::Http(e.to_string()))?
                .email
        }
        Provider::Microsoft => {
            let body = get_json("https://graph.microsoft.com/v1.0/me".to_string(), true).await?;
            let me: GraphMe =
                serde_json::from_str(&body).map_err(|e| TokenError::Http(e.to_string()))?;
            me.mail
                .or(me.user_principal_name)
                .ok_or_else(|| TokenError::Http("Graph /me returned no address".to_string()))?
        }
        Provider::Hubspot => {
            let body = get_json(
                format!("https://api.hubapi.com/oauth/v1/access-tokens/{}", access_token),
                false,
            )
            .await?;
            serde_json::from_str::<HubspotTokenInfo>(&body)
                .map_err(|e| TokenError::Http(e.to_string()))?
                .user
        }
        Provider::Pipedrive => {
            let host = tokens
                .api_domain
                .as_deref()
                .ok_or_else(|| TokenError::Http("missing api_domain in token response".to_string()))?;
            let body = get_json(format!("{}/v1/users/me", host), true).await?;
            serde_json::from_str::<PipedriveMe>(&body)
                .map_err(|e| TokenError::Http(e.to_string()))?
                .data
                .email
        }
        Provider::Salesforce => {
            let host = tokens
                .instance_url
                .as_deref()
                .ok_or_else(|| TokenError::Http("missing instance_url in token response".to_string()))?;
            let body = get_json(format!("{}/services/oauth2/userinfo", host), true).await?;
            serde_json::from_str::<SalesforceUserInfo>(&body)
                .map_err(|e| TokenError::Http(e.to_string()))?
                .email
        }
    };

    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_at_expiry_boundary_is_expired() {
        let now = Utc::now();
        assert!(is_expired(now, now));
        assert!(is_expired(now - Duration::seconds(1), now));
        assert!(!is_expired(now + Duration::seconds(1), now));
    }

    #[test]
    fn expires_at_uses_provider_reported_lifetime() {
        let now = Utc::now();
        let response = TokenResponse {
            access_token: "at".to_string(),
            refresh_token: None,
            expires_in: Some(1800),
            scope: None,
            instance_url: None,
            api_domain: None,
        };
        assert_eq!(response.expires_at(now), now + Duration::seconds(1800));
    }

    #[test]
    fn missing_expires_in_defaults_to_an_hour() {
        let now = Utc::now();
        let response = TokenResponse {
            access_token: "at".to_string(),
            refresh_token: None,
            expires_in: None,
            scope: None,
            instance_url: None,
            api_domain: None,
        };
        assert_eq!(response.expires_at(now), now + Duration::seconds(3600));
    }

    #[test]
    fn tenant_id_read_from_access_token_claims() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;

        let payload = URL_SAFE_NO_PAD.encode(r#"{"tid":"tenant-123","aud":"graph"}"#);
        let token = format!("hdr.{}.sig", payload);
        assert_eq!(microsoft_tenant_id(&token).as_deref(), Some("tenant-123"));
        assert_eq!(microsoft_tenant_id("not-a-jwt"), None);
    }

    #[test]
    fn salesforce_token_response_carries_instance_url() {
        let body = r#"{
            "access_token": "00D...",
            "refresh_token": "5Ae...",
            "instance_url": "https://example.my.salesforce.com",
            "token_type": "Bearer"
        }"#;
        let parsed: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.instance_url.as_deref(),
            Some("https://example.my.salesforce.com")
        );
        assert!(parsed.expires_in.is_none());
    }
}
