//! Session JWT creation and validation.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};

use super::types::{AuthConfig, Claims};

/// Create a session token for an operator.
pub fn create_token(
    config: &AuthConfig,
    email: &str,
    name: Option<String>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::days(config.token_duration_days);

    let claims = Claims {
        sub: email.to_string(),
        name,
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

/// Validate a session token and return its claims.
pub fn validate_token(
    config: &AuthConfig,
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Tokens older than a day get a fresh cookie on the next request.
pub fn should_refresh(claims: &Claims) -> bool {
    let age_seconds = Utc::now().timestamp() - claims.iat;
    age_seconds > 86_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_validate_round_trip() {
        let config = AuthConfig::for_tests();
        let token = create_token(&config, "operator@example.com", Some("Op".to_string()))
            .expect("should create token");

        let claims = validate_token(&config, &token).expect("should validate token");
        assert_eq!(claims.sub, "operator@example.com");
        assert_eq!(claims.name, Some("Op".to_string()));
    }

    #[test]
    fn garbage_token_rejected() {
        let config = AuthConfig::for_tests();
        assert!(validate_token(&config, "not-a-jwt").is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let config = AuthConfig::for_tests();
        let token = create_token(&config, "operator@example.com", None).expect("should create");

        let mut other = config;
        other.jwt_secret = "a-different-secret".to_string();
        assert!(validate_token(&other, &token).is_err());
    }

    #[test]
    fn fresh_token_needs_no_refresh() {
        let claims = Claims {
            sub: "operator@example.com".to_string(),
            name: None,
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::days(7)).timestamp(),
        };
        assert!(!should_refresh(&claims));

        let stale = Claims {
            iat: (Utc::now() - Duration::days(2)).timestamp(),
            ..claims
        };
        assert!(should_refresh(&stale));
    }
}
