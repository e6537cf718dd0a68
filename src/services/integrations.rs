// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Connecting and disconnecting wearable providers.

use crate::db::HealthStore;
use crate::error::{AppError, Result};
use crate::models::{CredentialEvent, CredentialState, IntegrationCredential, Provider};
use crate::providers::{OAuthClient, ProviderRegistry};
use crate::services::kms::{encrypt_tokens, KmsService};
use crate::services::oauth_state::OAuthState;
use crate::services::token_manager::TokenManager;
use crate::time_utils::{format_utc_rfc3339, Clock};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Connection state of one provider, without token material.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct IntegrationSummary {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub provider: Provider,
    pub connected: bool,
    pub connected_at: Option<String>,
    pub last_sync_at: Option<String>,
    pub scopes: Vec<String>,
}

impl IntegrationSummary {
    fn from_credential(credential: &IntegrationCredential) -> Self {
        Self {
            provider: credential.provider,
            connected: credential.active,
            connected_at: Some(format_utc_rfc3339(credential.connected_at)),
            last_sync_at: credential.last_sync_at.map(format_utc_rfc3339),
            scopes: credential.scopes.clone(),
        }
    }

    fn never_connected(provider: Provider) -> Self {
        Self {
            provider,
            connected: false,
            connected_at: None,
            last_sync_at: None,
            scopes: vec![],
        }
    }
}

#[derive(Clone)]
pub struct IntegrationService {
    store: Arc<dyn HealthStore>,
    kms: KmsService,
    registry: ProviderRegistry,
    tokens: TokenManager,
    clock: Arc<dyn Clock>,
    state_key: Vec<u8>,
}

impl IntegrationService {
    pub fn new(
        store: Arc<dyn HealthStore>,
        kms: KmsService,
        registry: ProviderRegistry,
        tokens: TokenManager,
        clock: Arc<dyn Clock>,
        state_key: Vec<u8>,
    ) -> Self {
        Self {
            store,
            kms,
            registry,
            tokens,
            clock,
            state_key,
        }
    }

    fn oauth(&self, provider: Provider) -> Result<Arc<OAuthClient>> {
        self.registry
            .oauth(provider)
            .ok_or_else(|| AppError::BadRequest(format!("Provider {} is not configured", provider)))
    }

    /// Consent URL for `provider`; the callback sends the browser back to
    /// `frontend_url`.
    pub fn authorization_url(
        &self,
        user_id: &str,
        provider: Provider,
        frontend_url: &str,
    ) -> Result<String> {
        let oauth = self.oauth(provider)?;
        let state = OAuthState {
            user_id: user_id.to_string(),
            provider,
            frontend_url: frontend_url.to_string(),
            issued_at: self.clock.now(),
        }
        .sign(&self.state_key)?;

        tracing::info!(user_id, %provider, "Starting OAuth flow");
        Ok(oauth.authorization_url(&state))
    }

    /// Check a callback `state` parameter.
    pub fn verify_state(&self, raw: &str) -> Option<OAuthState> {
        OAuthState::verify(raw, &self.state_key, self.clock.now())
    }

    /// Exchange an authorization code and store the credential, replacing
    /// any earlier one for the same provider.
    pub async fn connect(
        &self,
        user_id: &str,
        provider: Provider,
        code: &str,
    ) -> Result<IntegrationCredential> {
        let oauth = self.oauth(provider)?;
        let now = self.clock.now();

        let previous = self.store.get_credential(user_id, provider).await?;
        let from = previous
            .as_ref()
            .map(|c| c.state(now, chrono::Duration::zero()))
            .unwrap_or(CredentialState::Disconnected);
        from.transition(CredentialEvent::OAuthCallback)
            .map_err(|e| AppError::Internal(e.into()))?;

        let grant = oauth.exchange_code(code, now).await.map_err(|e| {
            tracing::warn!(user_id, %provider, error = %e, "Authorization code exchange failed");
            AppError::from(e)
        })?;

        let encrypted =
            encrypt_tokens(&self.kms, &grant.access_token, grant.refresh_token.as_deref())
                .await?;

        let credential = IntegrationCredential {
            user_id: user_id.to_string(),
            provider,
            access_token_encrypted: encrypted.access,
            refresh_token_encrypted: encrypted.refresh,
            expires_at: grant.expires_at,
            connected_at: now,
            last_sync_at: previous.and_then(|c| c.last_sync_at),
            active: true,
            grant_rejected: false,
            scopes: grant.scopes,
        };
        self.store.put_credential(&credential).await?;
        self.tokens.invalidate(user_id, provider);

        tracing::info!(
            user_id,
            %provider,
            reconnect = from.is_connected(),
            "Integration connected"
        );
        Ok(credential)
    }

    /// Revoke at the provider (best effort) and deactivate the credential.
    pub async fn disconnect(&self, user_id: &str, provider: Provider) -> Result<()> {
        let credential = self
            .store
            .get_credential(user_id, provider)
            .await?
            .filter(|c| c.active)
            .ok_or_else(|| AppError::NotFound(format!("{} is not connected", provider)))?;

        credential
            .state(self.clock.now(), chrono::Duration::zero())
            .transition(CredentialEvent::UserDisconnect)
            .map_err(|e| AppError::Internal(e.into()))?;

        match (
            self.registry.oauth(provider),
            self.kms.decrypt(&credential.access_token_encrypted).await,
        ) {
            (Some(oauth), Ok(access_token)) => {
                if let Err(e) = oauth.revoke(&access_token).await {
                    tracing::warn!(user_id, %provider, error = %e, "Provider revocation failed");
                }
            }
            (None, _) => {
                tracing::warn!(user_id, %provider, "Provider not configured, skipping revocation");
            }
            (_, Err(e)) => {
                tracing::warn!(user_id, %provider, error = %e, "Could not decrypt token for revocation");
            }
        }

        self.store.deactivate_credential(user_id, provider).await?;
        self.tokens.invalidate(user_id, provider);

        tracing::info!(user_id, %provider, "Integration disconnected");
        Ok(())
    }

    /// Every configured provider plus any with a stored credential.
    pub async fn list_integrations(&self, user_id: &str) -> Result<Vec<IntegrationSummary>> {
        let credentials = self.store.list_credentials(user_id).await?;

        let mut summaries: Vec<IntegrationSummary> = credentials
            .iter()
            .map(IntegrationSummary::from_credential)
            .collect();
        for provider in self.registry.providers() {
            if !summaries.iter().any(|s| s.provider == provider) {
                summaries.push(IntegrationSummary::never_connected(provider));
            }
        }
        summaries.sort_by_key(|s| s.provider);
        Ok(summaries)
    }
}
