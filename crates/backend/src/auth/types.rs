//! Session types and auth configuration.

use serde::{Deserialize, Serialize};

pub use shared_types::{AuthUserResponse, LoginInitResponse};

/// Claims carried in the session JWT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the operator's email address.
    pub sub: String,
    /// Display name from Google, when provided.
    pub name: Option<String>,
    /// Issued-at timestamp (epoch seconds).
    pub iat: i64,
    /// Expiration timestamp (epoch seconds).
    pub exp: i64,
}

/// The authenticated operator, as validated from a session token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub email: String,
    pub name: Option<String>,
}

/// Auth configuration loaded from the environment.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Lowercased emails permitted to sign in.
    pub allowed_emails: Vec<String>,
    pub token_duration_days: i64,
    pub cookie_name: String,
    pub google_client_id: String,
    pub google_client_secret: String,
    /// Callback URI for operator sign-in, distinct from the connect-flow
    /// redirect URIs.
    pub auth_redirect_uri: String,
}

impl AuthConfig {
    /// Required env vars: `JWT_SECRET`, `ALLOWED_EMAILS` (comma-separated),
    /// `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `AUTH_REDIRECT_URI`.
    pub fn from_env() -> Result<Self, String> {
        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set".to_string())?;

        let allowed_emails: Vec<String> = std::env::var("ALLOWED_EMAILS")
            .map_err(|_| "ALLOWED_EMAILS must be set".to_string())?
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        if allowed_emails.is_empty() {
            return Err("ALLOWED_EMAILS cannot be empty".to_string());
        }

        Ok(Self {
            jwt_secret,
            allowed_emails,
            token_duration_days: 7,
            cookie_name: "dealflow_session".to_string(),
            google_client_id: std::env::var("GOOGLE_CLIENT_ID")
                .map_err(|_| "GOOGLE_CLIENT_ID must be set".to_string())?,
            google_client_secret: std::env::var("GOOGLE_CLIENT_SECRET")
                .map_err(|_| "GOOGLE_CLIENT_SECRET must be set".to_string())?,
            auth_redirect_uri: std::env::var("AUTH_REDIRECT_URI")
                .map_err(|_| "AUTH_REDIRECT_URI must be set".to_string())?,
        })
    }

    pub fn is_email_allowed(&self, email: &str) -> bool {
        self.allowed_emails.contains(&email.to_lowercase())
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            jwt_secret: "test-secret-key-not-for-production".to_string(),
            allowed_emails: vec!["operator@example.com".to_string()],
            token_duration_days: 7,
            cookie_name: "dealflow_session".to_string(),
            google_client_id: "login-client-id".to_string(),
            google_client_secret: "login-client-secret".to_string(),
            auth_redirect_uri: "http://localhost:3000/api/auth/callback".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_check_is_case_insensitive() {
        let config = AuthConfig::for_tests();
        assert!(config.is_email_allowed("operator@example.com"));
        assert!(config.is_email_allowed("Operator@Example.com"));
        assert!(!config.is_email_allowed("intruder@example.com"));
    }
}
