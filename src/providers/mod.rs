// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Wearable provider integrations.
//!
//! Each provider has an OAuth client (token exchange, refresh, revoke) and a
//! [`ProviderAdapter`] that turns its API responses into [`MetricSample`]s.
//! Both are looked up by [`Provider`] through a [`ProviderRegistry`].

pub mod fitbit;
pub mod garmin;
pub mod http;
pub mod oauth;
pub mod oura;
pub mod whoop;

use crate::config::Config;
use crate::error::{AppError, SyncError};
use crate::models::{DateRange, MetricSample, MetricType, Provider};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub use http::ApiClient;
pub use oauth::{OAuthClient, ProviderCredentials, TokenGrant};

/// Per-request timeout for provider HTTP calls.
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Fetches one provider's data and normalizes it.
///
/// Adapters never touch credential state; a rejected token is reported as
/// [`SyncError::Unauthorized`] and handled by the caller.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    async fn fetch_recovery(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError>;

    async fn fetch_sleep(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError>;

    async fn fetch_activity(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError>;

    async fn fetch(
        &self,
        metric_type: MetricType,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        match metric_type {
            MetricType::Recovery => self.fetch_recovery(token, range).await,
            MetricType::Sleep => self.fetch_sleep(token, range).await,
            MetricType::Activity => self.fetch_activity(token, range).await,
        }
    }
}

/// OAuth and API locations for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: Option<String>,
    pub api_base: String,
}

impl ProviderEndpoints {
    /// Production endpoints.
    pub fn for_provider(provider: Provider) -> Self {
        let (authorize, token, revoke, api) = match provider {
            Provider::Whoop => (
                "https://api.prod.whoop.com/oauth/oauth2/auth",
                "https://api.prod.whoop.com/oauth/oauth2/token",
                "https://api.prod.whoop.com/oauth/oauth2/revoke",
                "https://api.prod.whoop.com/developer/v2",
            ),
            Provider::Oura => (
                "https://cloud.ouraring.com/oauth/authorize",
                "https://api.ouraring.com/oauth/token",
                "https://api.ouraring.com/oauth/revoke",
                "https://api.ouraring.com/v2/usercollection",
            ),
            Provider::Fitbit => (
                "https://www.fitbit.com/oauth2/authorize",
                "https://api.fitbit.com/oauth2/token",
                "https://api.fitbit.com/oauth2/revoke",
                "https://api.fitbit.com",
            ),
            Provider::Garmin => (
                "https://connect.garmin.com/oauth2Confirm",
                "https://diauth.garmin.com/di-oauth2-service/oauth/token",
                "https://apis.garmin.com/wellness-api/rest/user/registration",
                "https://apis.garmin.com/wellness-api/rest",
            ),
        };
        Self {
            authorize_url: authorize.to_string(),
            token_url: token.to_string(),
            revoke_url: Some(revoke.to_string()),
            api_base: api.to_string(),
        }
    }

    /// Endpoints rooted at `{base}/{provider}`, for a stand-in server.
    pub fn rooted_at(base: &str, provider: Provider) -> Self {
        let root = format!("{}/{}", base.trim_end_matches('/'), provider);
        Self {
            authorize_url: format!("{}/oauth/authorize", root),
            token_url: format!("{}/oauth/token", root),
            revoke_url: Some(format!("{}/oauth/revoke", root)),
            api_base: format!("{}/api", root),
        }
    }
}

/// Adapters and OAuth clients for every configured provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: BTreeMap<Provider, Arc<dyn ProviderAdapter>>,
    oauth: BTreeMap<Provider, Arc<OAuthClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry for every provider with credentials in `config`.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let http = build_http_client()?;
        let mut registry = Self::new();
        for (provider, credentials) in &config.providers {
            let endpoints = match &config.provider_base_url {
                Some(base) => ProviderEndpoints::rooted_at(base, *provider),
                None => ProviderEndpoints::for_provider(*provider),
            };
            registry = registry.register(
                *provider,
                http.clone(),
                credentials.clone(),
                endpoints,
                config.oauth_redirect_uri(*provider),
            );
        }
        Ok(registry)
    }

    /// Register the standard adapter and OAuth client for `provider`.
    pub fn register(
        self,
        provider: Provider,
        http: reqwest::Client,
        credentials: ProviderCredentials,
        endpoints: ProviderEndpoints,
        redirect_uri: String,
    ) -> Self {
        let api = ApiClient::new(http.clone(), endpoints.api_base.clone());
        let adapter: Arc<dyn ProviderAdapter> = match provider {
            Provider::Whoop => Arc::new(whoop::WhoopAdapter::new(api)),
            Provider::Oura => Arc::new(oura::OuraAdapter::new(api)),
            Provider::Fitbit => Arc::new(fitbit::FitbitAdapter::new(api)),
            Provider::Garmin => Arc::new(garmin::GarminAdapter::new(api)),
        };
        let oauth = OAuthClient::new(provider, http, credentials, endpoints, redirect_uri);
        self.with_adapter(adapter).with_oauth(oauth)
    }

    /// Replace the adapter for `adapter.provider()`.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn with_oauth(mut self, oauth: OAuthClient) -> Self {
        self.oauth.insert(oauth.provider(), Arc::new(oauth));
        self
    }

    pub fn adapter(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn oauth(&self, provider: Provider) -> Option<Arc<OAuthClient>> {
        self.oauth.get(&provider).cloned()
    }

    /// Providers with an OAuth client, in stable order.
    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.oauth.keys().copied()
    }
}

/// Upper bound on pages followed in one fetch.
pub(crate) const MAX_PAGES: usize = 100;

/// Native record ID as a string; providers use both numbers and strings.
pub(crate) fn native_id(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn warn_skipped(provider: Provider, metric_type: MetricType, reason: &str) {
    tracing::warn!(%provider, %metric_type, reason, "Skipping provider record");
}

/// Decode one record of a page, skipping it (with a warning) if it does not fit.
pub(crate) fn decode_record<T: serde::de::DeserializeOwned>(
    provider: Provider,
    metric_type: MetricType,
    raw: &serde_json::Value,
) -> Option<T> {
    match T::deserialize(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn_skipped(provider, metric_type, &e.to_string());
            None
        }
    }
}

/// Shared HTTP client for provider calls.
pub fn build_http_client() -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(concat!("wearable-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))
}
