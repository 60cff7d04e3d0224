//! Per-provider OAuth endpoints and scopes.

use shared_types::Provider;

use crate::config::{AppConfig, ProviderCredentials};

/// Static OAuth2 endpoints for one provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderEndpoints {
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    /// Space-delimited scope string sent on authorize. Empty means the
    /// provider scopes the grant by app configuration (Pipedrive).
    pub scopes: &'static str,
    /// Extra query parameters required on the authorize URL.
    pub extra_authorize_params: &'static [(&'static str, &'static str)],
}

pub fn endpoints(provider: Provider) -> ProviderEndpoints {
    match provider {
        Provider::Google => ProviderEndpoints {
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
            token_url: "https://oauth2.googleapis.com/token",
            scopes: "openid email https://www.googleapis.com/auth/gmail.readonly \
                     https://www.googleapis.com/auth/calendar.readonly",
            // Google only issues a refresh token with offline access and an
            // explicit consent prompt.
            extra_authorize_params: &[("access_type", "offline"), ("prompt", "consent")],
        },
        Provider::Microsoft => ProviderEndpoints {
            authorize_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            scopes: "offline_access User.Read Mail.Read Calendars.Read",
            extra_authorize_params: &[("response_mode", "query")],
        },
        Provider::Hubspot => ProviderEndpoints {
            authorize_url: "https://app.hubspot.com/oauth/authorize",
            token_url: "https://api.hubapi.com/oauth/v1/token",
            scopes: "oauth crm.objects.contacts.read crm.objects.deals.read",
            extra_authorize_params: &[],
        },
        Provider::Pipedrive => ProviderEndpoints {
            authorize_url: "https://oauth.pipedrive.com/oauth/authorize",
            token_url: "https://oauth.pipedrive.com/oauth/token",
            scopes: "",
            extra_authorize_params: &[],
        },
        Provider::Salesforce => ProviderEndpoints {
            authorize_url: "https://login.salesforce.com/services/oauth2/authorize",
            token_url: "https://login.salesforce.com/services/oauth2/token",
            scopes: "api refresh_token",
            extra_authorize_params: &[],
        },
    }
}

/// Build the provider authorization URL for the connect flow.
pub fn build_authorize_url(
    config: &AppConfig,
    credentials: &ProviderCredentials,
    provider: Provider,
    state: &str,
) -> String {
    let ep = endpoints(provider);

    let mut url = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&state={}",
        ep.authorize_url,
        urlencoding::encode(&credentials.client_id),
        urlencoding::encode(&config.redirect_uri(provider)),
        urlencoding::encode(state),
    );

    if !ep.scopes.is_empty() {
        // Collapse the multi-line scope literal into single spaces.
        let scopes = ep.scopes.split_whitespace().collect::<Vec<_>>().join(" ");
        url.push_str(&format!("&scope={}", urlencoding::encode(&scopes)));
    }

    for (key, value) in ep.extra_authorize_params {
        url.push_str(&format!("&{}={}", key, value));
    }

    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_has_endpoints() {
        for p in Provider::all() {
            let ep = endpoints(p);
            assert!(ep.authorize_url.starts_with("https://"));
            assert!(ep.token_url.starts_with("https://"));
        }
    }

    #[test]
    fn google_authorize_url_requests_offline_access() {
        let config = AppConfig::for_tests();
        let creds = config.credentials(Provider::Google).unwrap().clone();
        let url = build_authorize_url(&config, &creds, Provider::Google, "{\"accountId\":\"acc1\"}");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("client_id=google-id"));
        assert!(url.contains(&format!(
            "redirect_uri={}",
            urlencoding::encode("http://localhost:3000/api/oauth/google/callback")
        )));
    }

    #[test]
    fn pipedrive_authorize_url_omits_scope() {
        let config = AppConfig::for_tests();
        let creds = ProviderCredentials {
            client_id: "pd".to_string(),
            client_secret: "pd-secret".to_string(),
        };
        let url = build_authorize_url(&config, &creds, Provider::Pipedrive, "acc1");
        assert!(!url.contains("&scope="));
    }
}
