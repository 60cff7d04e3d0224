//! Application configuration loaded from the environment.
//!
//! Everything is read once at startup and passed down explicitly; no
//! module-level lazily-initialized clients.

use anyhow::{Context, Result};
use shared_types::Provider;
use std::env;

/// OAuth client credentials for one provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Base URL used to build OAuth redirect URIs (no trailing slash).
    pub base_url: String,
    pub meetgeek_api_key: Option<String>,
    pub sync: SyncConfig,
    google: Option<ProviderCredentials>,
    microsoft: Option<ProviderCredentials>,
    hubspot: Option<ProviderCredentials>,
    pipedrive: Option<ProviderCredentials>,
    salesforce: Option<ProviderCredentials>,
}

/// Bounds for one sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hard cap on normalized emails persisted per run.
    pub max_emails_per_run: usize,
    /// Hard cap on normalized calendar events persisted per run.
    pub max_events_per_run: usize,
    /// First-run cursor: how far back to query.
    pub lookback_days: i64,
    /// Pause between provider pages (crude backpressure).
    pub page_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_emails_per_run: 500,
            max_events_per_run: 2500,
            lookback_days: 30,
            page_delay_ms: 100,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_emails_per_run: env_parse("SYNC_MAX_EMAILS_PER_RUN", defaults.max_emails_per_run),
            max_events_per_run: env_parse("SYNC_MAX_EVENTS_PER_RUN", defaults.max_events_per_run),
            lookback_days: env_parse("SYNC_LOOKBACK_DAYS", defaults.lookback_days),
            page_delay_ms: env_parse("SYNC_PAGE_DELAY_MS", defaults.page_delay_ms),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn credentials_from_env(id_var: &str, secret_var: &str) -> Option<ProviderCredentials> {
    match (env::var(id_var), env::var(secret_var)) {
        (Ok(client_id), Ok(client_secret)) => Some(ProviderCredentials {
            client_id,
            client_secret,
        }),
        _ => None,
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            database_url,
            base_url,
            meetgeek_api_key: env::var("MEETGEEK_API_KEY").ok(),
            sync: SyncConfig::from_env(),
            google: credentials_from_env("GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET"),
            microsoft: credentials_from_env("MICROSOFT_CLIENT_ID", "MICROSOFT_CLIENT_SECRET"),
            hubspot: credentials_from_env("HUBSPOT_CLIENT_ID", "HUBSPOT_CLIENT_SECRET"),
            pipedrive: credentials_from_env("PIPEDRIVE_CLIENT_ID", "PIPEDRIVE_CLIENT_SECRET"),
            salesforce: credentials_from_env("SALESFORCE_CLIENT_ID", "SALESFORCE_CLIENT_SECRET"),
        })
    }

    /// Credentials for a provider, or `None` when that provider is not
    /// configured in this deployment.
    pub fn credentials(&self, provider: Provider) -> Option<&ProviderCredentials> {
        match provider {
            Provider::Google => self.google.as_ref(),
            Provider::Microsoft => self.microsoft.as_ref(),
            Provider::Hubspot => self.hubspot.as_ref(),
            Provider::Pipedrive => self.pipedrive.as_ref(),
            Provider::Salesforce => self.salesforce.as_ref(),
        }
    }

    /// Redirect URI registered with the provider for the connect flow.
    pub fn redirect_uri(&self, provider: Provider) -> String {
        format!("{}/api/oauth/{}/callback", self.base_url, provider.as_str())
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/dealflow_test".to_string(),
            base_url: "http://localhost:3000".to_string(),
            meetgeek_api_key: None,
            sync: SyncConfig::default(),
            google: Some(ProviderCredentials {
                client_id: "google-id".to_string(),
                client_secret: "google-secret".to_string(),
            }),
            microsoft: None,
            hubspot: None,
            pipedrive: None,
            salesforce: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_uri_is_per_provider() {
        let config = AppConfig::for_tests();
        assert_eq!(
            config.redirect_uri(Provider::Google),
            "http://localhost:3000/api/oauth/google/callback"
        );
        assert_eq!(
            config.redirect_uri(Provider::Salesforce),
            "http://localhost:3000/api/oauth/salesforce/callback"
        );
    }

    #[test]
    fn unconfigured_provider_has_no_credentials() {
        let config = AppConfig::for_tests();
        assert!(config.credentials(Provider::Google).is_some());
        assert!(config.credentials(Provider::Hubspot).is_none());
    }

    #[test]
    fn sync_defaults_match_run_caps() {
        let sync = SyncConfig::default();
        assert_eq!(sync.max_emails_per_run, 500);
        assert_eq!(sync.max_events_per_run, 2500);
        assert_eq!(sync.lookback_days, 30);
    }
}
