// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! On Cloud Run, secrets are injected as environment variables through secret
//! bindings, so there is a single loading path for every environment.

use crate::models::Provider;
use crate::providers::ProviderCredentials;
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;

/// Where credentials, metrics and sync status are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    /// In-process maps; state is lost on restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(StorageBackend::Firestore),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frontend URL for post-OAuth redirects
    pub frontend_url: String,
    /// Public base URL of this service (OAuth redirect URIs are built from it)
    pub public_url: String,
    pub gcp_project_id: String,
    pub gcp_region: String,
    /// Name of the KMS key used for token encryption
    pub kms_key_name: String,
    pub storage_backend: StorageBackend,
    pub port: u16,

    /// OAuth app credentials for every provider that is configured
    pub providers: BTreeMap<Provider, ProviderCredentials>,
    /// Serve every provider from `{base}/{provider}` instead of production hosts
    pub provider_base_url: Option<String>,

    /// Refresh tokens this long before they expire
    pub token_refresh_margin_secs: i64,
    /// Budget for one provider within one sync
    pub provider_sync_timeout_secs: u64,
    pub sync_default_days: u32,
    pub sync_max_days: u32,

    /// Verifies session JWTs issued by the auth service (HS256)
    pub jwt_signing_key: Vec<u8>,
    /// Signs the OAuth `state` parameter
    pub oauth_state_key: Vec<u8>,
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut providers = BTreeMap::new();
        for provider in Provider::ALL {
            let prefix = provider.env_prefix();
            let id = env::var(format!("{}_CLIENT_ID", prefix)).ok();
            let secret = env::var(format!("{}_CLIENT_SECRET", prefix)).ok();
            match (id, secret) {
                (Some(id), Some(secret)) => {
                    providers.insert(
                        provider,
                        ProviderCredentials::new(id.trim(), secret.trim()),
                    );
                }
                (None, None) => {}
                _ => {
                    tracing::warn!(
                        %provider,
                        "Only one of client ID / secret set; provider disabled"
                    );
                }
            }
        }

        let port = parse_or("PORT", 8080)?;
        let jwt_signing_key = required("JWT_SIGNING_KEY")?.into_bytes();
        // Falls back to the session key so a single secret is enough for local dev.
        let oauth_state_key = env::var("OAUTH_STATE_KEY")
            .map(String::into_bytes)
            .unwrap_or_else(|_| jwt_signing_key.clone());

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            kms_key_name: env::var("KMS_KEY_NAME")
                .unwrap_or_else(|_| "token-encryption".to_string()),
            storage_backend: parse_or("STORAGE_BACKEND", StorageBackend::Firestore)?,
            port,
            providers,
            provider_base_url: env::var("PROVIDER_BASE_URL").ok().filter(|s| !s.is_empty()),
            token_refresh_margin_secs: parse_or("TOKEN_REFRESH_MARGIN_SECS", 300)?,
            provider_sync_timeout_secs: parse_or("PROVIDER_SYNC_TIMEOUT_SECS", 60)?,
            sync_default_days: parse_or("SYNC_DEFAULT_DAYS", 7)?,
            sync_max_days: parse_or("SYNC_MAX_DAYS", 90)?,
            jwt_signing_key,
            oauth_state_key,
        })
    }

    /// Config for tests: every provider configured, in-memory storage.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            public_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            kms_key_name: "token-encryption".to_string(),
            storage_backend: StorageBackend::Memory,
            port: 8080,
            providers: Provider::ALL
                .into_iter()
                .map(|p| {
                    (
                        p,
                        ProviderCredentials::new(
                            format!("{}-client", p),
                            format!("{}-secret", p),
                        ),
                    )
                })
                .collect(),
            provider_base_url: None,
            token_refresh_margin_secs: 300,
            provider_sync_timeout_secs: 60,
            sync_default_days: 7,
            sync_max_days: 90,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            oauth_state_key: b"test_state_key_32_bytes_minimum!".to_vec(),
        }
    }

    /// Redirect URI registered with `provider` for the OAuth callback.
    pub fn oauth_redirect_uri(&self, provider: Provider) -> String {
        format!(
            "{}/auth/{}/callback",
            self.public_url.trim_end_matches('/'),
            provider
        )
    }

    /// Scheme, host and port of the frontend, as browsers send in `Origin`.
    pub fn frontend_origin(&self) -> Option<String> {
        reqwest::Url::parse(&self.frontend_url)
            .ok()
            .map(|url| url.origin().ascii_serialization())
    }

    /// A frontend on this machine means local development, where any local
    /// dev server may talk to us.
    fn local_development(&self) -> bool {
        is_local_url(&self.frontend_url)
    }

    /// Whether a browser `Origin` may make credentialed API calls.
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.frontend_origin().as_deref() == Some(origin)
            || (self.local_development() && is_local_url(origin))
    }

    /// Whether the browser may be sent to `candidate` after the OAuth callback.
    pub fn allows_redirect(&self, candidate: &str) -> bool {
        let frontend = self.frontend_url.trim_end_matches('/');
        candidate == frontend
            || candidate.starts_with(&format!("{}/", frontend))
            || (self.local_development() && is_local_url(candidate))
    }
}

/// Plain-HTTP URL on the loopback host.
fn is_local_url(url: &str) -> bool {
    reqwest::Url::parse(url).is_ok_and(|url| {
        url.scheme() == "http" && matches!(url.host_str(), Some("localhost" | "127.0.0.1"))
    })
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::Missing(var))
}

fn parse_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_and_redirect_policy() {
        let mut config = Config::test_default();
        config.frontend_url = "https://app.example.com".to_string();

        assert_eq!(config.frontend_origin().as_deref(), Some("https://app.example.com"));
        assert!(config.allows_origin("https://app.example.com"));
        assert!(!config.allows_origin("https://app.example.com.evil.io"));
        assert!(!config.allows_origin("http://localhost:5173"));

        assert!(config.allows_redirect("https://app.example.com"));
        assert!(config.allows_redirect("https://app.example.com/settings"));
        assert!(!config.allows_redirect("https://app.example.com.evil.io"));
        assert!(!config.allows_redirect("https://evil.io"));
        assert!(!config.allows_redirect("http://localhost:5173"));

        // Local frontend: any local dev server, but not look-alike hosts.
        config.frontend_url = "http://localhost:5173/app".to_string();
        assert_eq!(config.frontend_origin().as_deref(), Some("http://localhost:5173"));
        assert!(config.allows_origin("http://localhost:5173"));
        assert!(config.allows_origin("http://127.0.0.1:3000"));
        assert!(!config.allows_origin("http://localhost.evil.io"));
        assert!(config.allows_redirect("http://127.0.0.1:3000/done"));
        assert!(!config.allows_redirect("http://localhost.evil.io/"));
    }

    // Single test so env mutation does not race other tests in this module.
    #[test]
    fn test_config_from_env() {
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("OURA_CLIENT_ID", "oura_id");
        env::set_var("OURA_CLIENT_SECRET", " oura_secret \n");
        env::set_var("FITBIT_CLIENT_ID", "fitbit_only_id");
        env::remove_var("FITBIT_CLIENT_SECRET");
        env::set_var("STORAGE_BACKEND", "Memory");
        env::set_var("SYNC_MAX_DAYS", "30");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.sync_max_days, 30);
        assert_eq!(config.token_refresh_margin_secs, 300);
        assert_eq!(
            config.providers.get(&Provider::Oura),
            Some(&ProviderCredentials::new("oura_id", "oura_secret"))
        );
        assert!(!config.providers.contains_key(&Provider::Fitbit));
        assert_eq!(config.oauth_state_key, config.jwt_signing_key);

        env::set_var("SYNC_MAX_DAYS", "lots");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { var: "SYNC_MAX_DAYS", .. })
        ));
        env::remove_var("SYNC_MAX_DAYS");
    }

    #[test]
    fn test_redirect_uri() {
        let mut config = Config::test_default();
        config.public_url = "https://sync.example.com/".to_string();
        assert_eq!(
            config.oauth_redirect_uri(Provider::Garmin),
            "https://sync.example.com/auth/garmin/callback"
        );
    }
}
