// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access token lifecycle for every (user, provider) credential.
//!
//! A usable access token is produced in three steps:
//!
//! 1. Read the credential. Missing or inactive means not connected.
//! 2. If the token is still outside the refresh margin, return it. Decrypted
//!    tokens are cached per credential generation (`expires_at`) so KMS is
//!    only called once per token.
//! 3. Otherwise take the per-(user, provider) refresh lock, re-read, and
//!    refresh. Tasks waiting on the lock see the new token on re-read and
//!    never call the provider themselves.
//!
//! Across instances the stored `expires_at` acts as a version: the new tokens
//! are only written if it is unchanged, and a rejected refresh grant only
//! deactivates the generation it was tried against. The rejection may mean
//! another instance already rotated the grant and has yet to commit; that
//! commit still lands and reactivates the credential.

use crate::db::HealthStore;
use crate::error::SyncError;
use crate::models::{
    CredentialEvent, CredentialState, IntegrationCredential, Provider, TokenUpdate,
};
use crate::providers::ProviderRegistry;
use crate::services::kms::{decrypt_refresh_token, encrypt_tokens, KmsService};
use crate::time_utils::Clock;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cached decrypted access token for one credential generation.
#[derive(Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

type CredentialKey = (String, Provider);

/// Shared token cache.
pub type TokenCache = Arc<DashMap<CredentialKey, CachedToken>>;

/// Shared refresh locks.
pub type RefreshLocks = Arc<DashMap<CredentialKey, Arc<Mutex<()>>>>;

/// Hands out valid access tokens, refreshing them when needed.
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn HealthStore>,
    kms: KmsService,
    registry: ProviderRegistry,
    clock: Arc<dyn Clock>,
    token_cache: TokenCache,
    refresh_locks: RefreshLocks,
    margin: Duration,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn HealthStore>,
        kms: KmsService,
        registry: ProviderRegistry,
        clock: Arc<dyn Clock>,
        margin: Duration,
    ) -> Self {
        Self {
            store,
            kms,
            registry,
            clock,
            token_cache: Arc::new(DashMap::new()),
            refresh_locks: Arc::new(DashMap::new()),
            margin,
        }
    }

    /// A valid access token, or `None` if the user is not connected or the
    /// token could not be refreshed.
    pub async fn get_valid_token(&self, user_id: &str, provider: Provider) -> Option<String> {
        match self.acquire_token(user_id, provider).await {
            Ok(token) => Some(token),
            Err(SyncError::NotConnected) => None,
            Err(e) => {
                tracing::warn!(user_id, %provider, error = %e, "No usable access token");
                None
            }
        }
    }

    /// A valid access token, with the reason when there is none.
    pub async fn acquire_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<String, SyncError> {
        let key = (user_id.to_string(), provider);

        let credential = self.active_credential(user_id, provider).await?;
        if credential.state(self.clock.now(), self.margin) == CredentialState::Connected {
            return self.decrypt_cached(&key, &credential).await;
        }

        let lock = self
            .refresh_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Whoever held the lock before us may have refreshed already.
        let credential = self.active_credential(user_id, provider).await?;
        match credential.state(self.clock.now(), self.margin) {
            CredentialState::Connected => self.decrypt_cached(&key, &credential).await,
            CredentialState::Expired => self.refresh(&key, credential).await,
            CredentialState::Disconnected | CredentialState::Refreshing => {
                Err(SyncError::NotConnected)
            }
        }
    }

    /// Drop the cached token, e.g. after reconnect or disconnect.
    pub fn invalidate(&self, user_id: &str, provider: Provider) {
        self.token_cache.remove(&(user_id.to_string(), provider));
    }

    async fn active_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<IntegrationCredential, SyncError> {
        self.store
            .get_credential(user_id, provider)
            .await?
            .filter(|c| c.active)
            .ok_or(SyncError::NotConnected)
    }

    async fn decrypt_cached(
        &self,
        key: &CredentialKey,
        credential: &IntegrationCredential,
    ) -> Result<String, SyncError> {
        if let Some(cached) = self.token_cache.get(key) {
            if cached.expires_at == credential.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let access_token = self.kms.decrypt(&credential.access_token_encrypted).await?;
        self.token_cache.insert(
            key.clone(),
            CachedToken {
                access_token: access_token.clone(),
                expires_at: credential.expires_at,
            },
        );
        Ok(access_token)
    }

    /// Refresh an expired credential. Caller holds the refresh lock.
    async fn refresh(
        &self,
        key: &CredentialKey,
        credential: IntegrationCredential,
    ) -> Result<String, SyncError> {
        let (user_id, provider) = (key.0.as_str(), key.1);
        let state = CredentialState::Expired
            .transition(CredentialEvent::RefreshStarted)
            .map_err(|e| SyncError::PersistenceError(e.to_string()))?;

        tracing::info!(user_id, %provider, "Access token expired, refreshing");

        let refresh_token = decrypt_refresh_token(
            &self.kms,
            credential.refresh_token_encrypted.as_deref(),
        )
        .await?;
        let Some(refresh_token) = refresh_token else {
            return self
                .reject(key, &credential, state, "no refresh token".to_string())
                .await;
        };

        let oauth = self.registry.oauth(provider).ok_or_else(|| SyncError::ProviderApi {
            status: 503,
            message: format!("{} is not configured", provider),
        })?;

        let grant = match oauth.refresh(&refresh_token, self.clock.now()).await {
            Ok(grant) => grant,
            Err(SyncError::TokenExpiredUnrecoverable(reason)) => {
                // Another instance may have used the grant first.
                if let Some(winner) = self.rotated_since(&credential).await? {
                    tracing::info!(
                        user_id,
                        %provider,
                        "Refresh grant already used by another instance, using stored token"
                    );
                    return self.decrypt_cached(key, &winner).await;
                }
                return self.reject(key, &credential, state, reason).await;
            }
            Err(e) => {
                tracing::warn!(user_id, %provider, error = %e, "Token refresh failed");
                return Err(e);
            }
        };

        let encrypted =
            encrypt_tokens(&self.kms, &grant.access_token, grant.refresh_token.as_deref())
                .await?;
        let update = TokenUpdate {
            access_token_encrypted: encrypted.access,
            refresh_token_encrypted: encrypted.refresh,
            expires_at: grant.expires_at,
        };

        let written = self
            .store
            .replace_tokens_if_current(user_id, provider, credential.expires_at, &update)
            .await?;
        if !written {
            tracing::info!(
                user_id,
                %provider,
                "Credential changed during refresh, using stored token"
            );
            let current = self.active_credential(user_id, provider).await?;
            return self.decrypt_cached(key, &current).await;
        }

        state
            .transition(CredentialEvent::RefreshSucceeded)
            .map_err(|e| SyncError::PersistenceError(e.to_string()))?;
        self.token_cache.insert(
            key.clone(),
            CachedToken {
                access_token: grant.access_token.clone(),
                expires_at: grant.expires_at,
            },
        );

        tracing::info!(user_id, %provider, expires_at = %grant.expires_at, "Token refreshed and cached");
        Ok(grant.access_token)
    }

    /// The stored credential, if it is active and no longer the generation
    /// we tried to refresh.
    async fn rotated_since(
        &self,
        stale: &IntegrationCredential,
    ) -> Result<Option<IntegrationCredential>, SyncError> {
        let current = self
            .store
            .get_credential(&stale.user_id, stale.provider)
            .await?;
        Ok(current.filter(|c| c.active && c.expires_at != stale.expires_at))
    }

    /// The refresh grant is dead: deactivate so the user is asked to reconnect.
    async fn reject(
        &self,
        key: &CredentialKey,
        stale: &IntegrationCredential,
        state: CredentialState,
        reason: String,
    ) -> Result<String, SyncError> {
        let (user_id, provider) = (key.0.as_str(), key.1);
        state
            .transition(CredentialEvent::RefreshRejected)
            .map_err(|e| SyncError::PersistenceError(e.to_string()))?;

        let rejected = self
            .store
            .reject_grant_if_current(user_id, provider, stale.expires_at)
            .await?;
        if !rejected {
            if let Some(winner) = self.rotated_since(stale).await? {
                tracing::info!(
                    user_id,
                    %provider,
                    "Credential rotated while the grant was rejected, using stored token"
                );
                return self.decrypt_cached(key, &winner).await;
            }
        }
        self.token_cache.remove(key);

        tracing::warn!(
            user_id,
            %provider,
            reason = %reason,
            "Refresh grant rejected, credential deactivated"
        );
        Err(SyncError::TokenExpiredUnrecoverable(reason))
    }
}
