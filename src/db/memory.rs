// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store for local development and tests.

use crate::db::{HealthStore, MetricFilter};
use crate::error::AppError;
use crate::models::{
    IntegrationCredential, NormalizedMetric, Provider, SyncStatus, TokenUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Store backed by concurrent maps keyed like the Firestore documents.
///
/// Cloning shares the underlying maps.
#[derive(Clone, Default)]
pub struct MemoryDb {
    credentials: Arc<DashMap<String, IntegrationCredential>>,
    metrics: Arc<DashMap<String, NormalizedMetric>>,
    statuses: Arc<DashMap<String, SyncStatus>>,
    metric_writes: Arc<AtomicUsize>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total metric rows written, including overwrites.
    pub fn metric_writes(&self) -> usize {
        self.metric_writes.load(Ordering::SeqCst)
    }

    /// Number of distinct metric rows currently stored.
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }
}

#[async_trait]
impl HealthStore for MemoryDb {
    async fn get_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<IntegrationCredential>, AppError> {
        Ok(self
            .credentials
            .get(&IntegrationCredential::document_id(user_id, provider))
            .map(|c| c.clone()))
    }

    async fn list_credentials(
        &self,
        user_id: &str,
    ) -> Result<Vec<IntegrationCredential>, AppError> {
        let mut found: Vec<_> = self
            .credentials
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.clone())
            .collect();
        found.sort_by_key(|c| c.provider);
        Ok(found)
    }

    async fn put_credential(&self, credential: &IntegrationCredential) -> Result<(), AppError> {
        self.credentials.insert(
            IntegrationCredential::document_id(&credential.user_id, credential.provider),
            credential.clone(),
        );
        Ok(())
    }

    async fn replace_tokens_if_current(
        &self,
        user_id: &str,
        provider: Provider,
        expected_expires_at: DateTime<Utc>,
        update: &TokenUpdate,
    ) -> Result<bool, AppError> {
        let key = IntegrationCredential::document_id(user_id, provider);
        // The shard write lock makes the compare and the swap one step.
        let Some(mut credential) = self.credentials.get_mut(&key) else {
            return Ok(false);
        };
        if !credential.accepts_refresh_of(expected_expires_at) {
            return Ok(false);
        }
        credential.apply_refresh(update);
        Ok(true)
    }

    async fn reject_grant_if_current(
        &self,
        user_id: &str,
        provider: Provider,
        expected_expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let key = IntegrationCredential::document_id(user_id, provider);
        let Some(mut credential) = self.credentials.get_mut(&key) else {
            return Ok(false);
        };
        if !credential.active || credential.expires_at != expected_expires_at {
            return Ok(false);
        }
        credential.active = false;
        credential.grant_rejected = true;
        Ok(true)
    }

    async fn deactivate_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<bool, AppError> {
        let key = IntegrationCredential::document_id(user_id, provider);
        Ok(match self.credentials.get_mut(&key) {
            Some(mut credential) => {
                credential.grant_rejected = false;
                std::mem::replace(&mut credential.active, false)
            }
            None => false,
        })
    }

    async fn touch_last_sync(
        &self,
        user_id: &str,
        provider: Provider,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let key = IntegrationCredential::document_id(user_id, provider);
        if let Some(mut credential) = self.credentials.get_mut(&key) {
            credential.last_sync_at = Some(at);
        }
        Ok(())
    }

    async fn upsert_metrics(&self, metrics: &[NormalizedMetric]) -> Result<usize, AppError> {
        for metric in metrics {
            self.metrics.insert(metric.document_id(), metric.clone());
        }
        self.metric_writes.fetch_add(metrics.len(), Ordering::SeqCst);
        Ok(metrics.len())
    }

    async fn list_metrics(
        &self,
        user_id: &str,
        filter: &MetricFilter,
    ) -> Result<Vec<NormalizedMetric>, AppError> {
        let mut found: Vec<_> = self
            .metrics
            .iter()
            .filter(|m| m.user_id == user_id && filter.matches(m))
            .map(|m| m.clone())
            .collect();
        found.sort_by(|a, b| {
            b.metric_date
                .cmp(&a.metric_date)
                .then(a.provider.cmp(&b.provider))
                .then(a.metric_type.cmp(&b.metric_type))
        });
        Ok(found)
    }

    async fn get_sync_status(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<SyncStatus>, AppError> {
        Ok(self
            .statuses
            .get(&SyncStatus::document_id(user_id, provider))
            .map(|s| s.clone()))
    }

    async fn list_sync_statuses(&self, user_id: &str) -> Result<Vec<SyncStatus>, AppError> {
        let mut found: Vec<_> = self
            .statuses
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.clone())
            .collect();
        found.sort_by_key(|s| s.provider);
        Ok(found)
    }

    async fn put_sync_status(&self, status: &SyncStatus) -> Result<(), AppError> {
        self.statuses.insert(
            SyncStatus::document_id(&status.user_id, status.provider),
            status.clone(),
        );
        Ok(())
    }
}
