// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Multi-provider sync for one user.
//!
//! Every connected provider is synced concurrently under its own timeout.
//! A provider's failure is reported in its outcome and never affects what
//! other providers store. Metric rows are keyed naturally, so re-running a
//! sync overwrites rather than duplicates.

use crate::db::HealthStore;
use crate::error::SyncError;
use crate::models::{
    merge_samples, DateRange, MetricType, NormalizedMetric, OutcomeStatus, Provider,
    ProviderOutcome, SyncStatus,
};
use crate::providers::ProviderRegistry;
use crate::services::token_manager::TokenManager;
use crate::time_utils::Clock;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-provider outcomes of one sync run.
pub type SyncReport = BTreeMap<Provider, ProviderOutcome>;

#[derive(Clone)]
pub struct SyncOrchestrator {
    store: Arc<dyn HealthStore>,
    registry: ProviderRegistry,
    tokens: TokenManager,
    clock: Arc<dyn Clock>,
    provider_timeout: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn HealthStore>,
        registry: ProviderRegistry,
        tokens: TokenManager,
        clock: Arc<dyn Clock>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            tokens,
            clock,
            provider_timeout,
        }
    }

    /// Sync every provider the user has connected over `range`.
    ///
    /// Never fails as a whole: each provider's result is in the map, and a
    /// status record is written for each one.
    pub async fn sync_all_data_for_user(&self, user_id: &str, range: &DateRange) -> SyncReport {
        let credentials = match self.store.list_active_credentials(user_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Failed to list credentials for sync");
                return SyncReport::new();
            }
        };

        tracing::info!(
            user_id,
            providers = credentials.len(),
            start = %range.start(),
            end = %range.end(),
            "Starting sync"
        );

        let tasks = credentials.into_iter().map(|credential| {
            let provider = credential.provider;
            async move {
                let sync = self.sync_provider(user_id, provider, range);
                let outcome = match tokio::time::timeout(self.provider_timeout, sync).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(user_id, %provider, "Provider sync timed out");
                        ProviderOutcome::timed_out(self.provider_timeout.as_secs())
                    }
                };
                self.record_status(user_id, provider, &outcome).await;
                (provider, outcome)
            }
        });

        let report: SyncReport = join_all(tasks).await.into_iter().collect();

        tracing::info!(
            user_id,
            succeeded = report
                .values()
                .filter(|o| o.status == OutcomeStatus::Success)
                .count(),
            total = report.len(),
            "Sync finished"
        );
        report
    }

    async fn sync_provider(
        &self,
        user_id: &str,
        provider: Provider,
        range: &DateRange,
    ) -> ProviderOutcome {
        let Some(adapter) = self.registry.adapter(provider) else {
            return ProviderOutcome::failed(&SyncError::ProviderApi {
                status: 503,
                message: format!("{} is not configured", provider),
            });
        };

        let token = match self.tokens.acquire_token(user_id, provider).await {
            Ok(token) => token,
            Err(SyncError::NotConnected) => return ProviderOutcome::not_connected(),
            Err(e) => {
                tracing::warn!(user_id, %provider, error = %e, "No token for sync");
                return ProviderOutcome::failed(&e);
            }
        };

        let mut samples = Vec::new();
        let mut kinds_fetched = 0;
        let mut first_error: Option<SyncError> = None;

        for metric in MetricType::ALL {
            match adapter.fetch(metric, &token, range).await {
                Ok(fetched) => {
                    tracing::debug!(user_id, %provider, %metric, count = fetched.len(), "Fetched");
                    kinds_fetched += 1;
                    samples.extend(fetched);
                }
                Err(e) => {
                    tracing::warn!(user_id, %provider, %metric, error = %e, "Fetch failed");
                    // The remaining kinds would hit the same wall.
                    let stop = matches!(e, SyncError::RateLimited { .. } | SyncError::Unauthorized);
                    first_error.get_or_insert(e);
                    if stop {
                        break;
                    }
                }
            }
        }

        if kinds_fetched == 0 {
            let cause = first_error.unwrap_or(SyncError::TransientNetworkError(
                "no metric kinds fetched".to_string(),
            ));
            return ProviderOutcome::failed(&cause);
        }

        let synced_at = self.clock.now();
        let metrics: Vec<NormalizedMetric> = merge_samples(samples)
            .into_iter()
            .map(|sample| NormalizedMetric::from_sample(user_id, sample, synced_at))
            .collect();

        let written = match self.store.upsert_metrics(&metrics).await {
            Ok(written) => written,
            Err(e) => {
                tracing::error!(user_id, %provider, error = %e, "Failed to store metrics");
                return ProviderOutcome::failed(&SyncError::from(e));
            }
        };

        if let Err(e) = self.store.touch_last_sync(user_id, provider, synced_at).await {
            tracing::warn!(user_id, %provider, error = %e, "Failed to stamp last sync");
        }

        tracing::info!(user_id, %provider, records = written, "Provider synced");
        match first_error {
            None => ProviderOutcome::success(written),
            Some(cause) => ProviderOutcome::partial(written, &cause),
        }
    }

    async fn record_status(&self, user_id: &str, provider: Provider, outcome: &ProviderOutcome) {
        let previous = match self.store.get_sync_status(user_id, provider).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(user_id, %provider, error = %e, "Failed to read sync status");
                None
            }
        };

        let status = SyncStatus::record_attempt(
            user_id,
            provider,
            outcome,
            self.clock.now(),
            previous.as_ref(),
        );
        if let Err(e) = self.store.put_sync_status(&status).await {
            tracing::error!(user_id, %provider, error = %e, "Failed to write sync status");
        }
    }
}
