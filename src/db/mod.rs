// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storage layer.
//!
//! [`HealthStore`] is the seam between services and persistence. Production
//! uses [`FirestoreDb`]; [`MemoryDb`] backs local development and tests.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::{
    IntegrationCredential, MetricType, NormalizedMetric, Provider, SyncStatus, TokenUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Collection names as constants.
pub mod collections {
    /// Keyed by `IntegrationCredential::document_id`
    pub const INTEGRATION_CREDENTIALS: &str = "integration_credentials";
    /// Keyed by `NormalizedMetric::document_id`
    pub const HEALTH_METRICS: &str = "health_metrics";
    pub const SYNC_STATUS: &str = "sync_status";
}

/// Query over stored metrics for one user.
#[derive(Debug, Clone, Default)]
pub struct MetricFilter {
    pub provider: Option<Provider>,
    pub metric_type: Option<MetricType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl MetricFilter {
    pub fn matches(&self, metric: &NormalizedMetric) -> bool {
        self.provider.is_none_or(|p| p == metric.provider)
            && self.metric_type.is_none_or(|t| t == metric.metric_type)
            && self.start_date.is_none_or(|d| metric.metric_date >= d)
            && self.end_date.is_none_or(|d| metric.metric_date <= d)
    }
}

#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn get_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<IntegrationCredential>, AppError>;

    /// All credentials for a user, active or not.
    async fn list_credentials(&self, user_id: &str)
        -> Result<Vec<IntegrationCredential>, AppError>;

    async fn list_active_credentials(
        &self,
        user_id: &str,
    ) -> Result<Vec<IntegrationCredential>, AppError> {
        Ok(self
            .list_credentials(user_id)
            .await?
            .into_iter()
            .filter(|c| c.active)
            .collect())
    }

    /// Create or replace the credential for `(credential.user_id, credential.provider)`.
    async fn put_credential(&self, credential: &IntegrationCredential) -> Result<(), AppError>;

    /// Replace token material only if the stored credential still has
    /// `expected_expires_at` and was not disconnected by the user (see
    /// [`IntegrationCredential::accepts_refresh_of`]). A credential
    /// deactivated by a rejected grant of that generation is revived.
    ///
    /// Returns `false` when another writer got there first.
    async fn replace_tokens_if_current(
        &self,
        user_id: &str,
        provider: Provider,
        expected_expires_at: DateTime<Utc>,
        update: &TokenUpdate,
    ) -> Result<bool, AppError>;

    /// Deactivate after the provider refused the refresh grant, but only if
    /// the credential is active and still has `expected_expires_at`.
    ///
    /// Returns `false` when the credential moved on in the meantime.
    async fn reject_grant_if_current(
        &self,
        user_id: &str,
        provider: Provider,
        expected_expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Soft delete on user request. Returns `false` if there was no active
    /// credential.
    async fn deactivate_credential(&self, user_id: &str, provider: Provider)
        -> Result<bool, AppError>;

    async fn touch_last_sync(
        &self,
        user_id: &str,
        provider: Provider,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Insert or overwrite by natural key. Returns the number written.
    async fn upsert_metrics(&self, metrics: &[NormalizedMetric]) -> Result<usize, AppError>;

    async fn list_metrics(
        &self,
        user_id: &str,
        filter: &MetricFilter,
    ) -> Result<Vec<NormalizedMetric>, AppError>;

    async fn get_sync_status(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<SyncStatus>, AppError>;

    async fn list_sync_statuses(&self, user_id: &str) -> Result<Vec<SyncStatus>, AppError>;

    async fn put_sync_status(&self, status: &SyncStatus) -> Result<(), AppError>;
}
