// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Integration credentials (encrypted OAuth tokens, one per user and provider)
//! - Health metrics (normalized records, upserted by natural key)
//! - Sync status (latest attempt per user and provider)

use crate::db::{collections, HealthStore, MetricFilter};
use crate::error::AppError;
use crate::models::{
    IntegrationCredential, NormalizedMetric, Provider, SyncStatus, TokenUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};

const MAX_CONCURRENT_DB_OPS: usize = 50;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // The emulator takes an unauthenticated connection; skip the credential lookup.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    async fn write_credential_in_transaction(
        &self,
        credential: &IntegrationCredential,
        mut transaction: firestore::FirestoreTransaction<'_>,
    ) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .update()
            .in_col(collections::INTEGRATION_CREDENTIALS)
            .document_id(IntegrationCredential::document_id(
                &credential.user_id,
                credential.provider,
            ))
            .object(credential)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add credential to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
        Ok(())
    }

    /// Read-modify-write of one credential inside a transaction.
    ///
    /// `modify` returns `false` to abandon the write (the transaction is
    /// rolled back and `Ok(false)` returned).
    async fn modify_credential<F>(
        &self,
        user_id: &str,
        provider: Provider,
        modify: F,
    ) -> Result<bool, AppError>
    where
        F: FnOnce(&mut IntegrationCredential) -> bool + Send,
    {
        let transaction = self
            .get_client()?
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        // Reading through the transaction locks the document until commit,
        // so a concurrent writer makes one of the commits fail.
        let in_transaction = self.get_client()?.clone_with_consistency_selector(
            firestore::FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ),
        );
        let current: Option<IntegrationCredential> = in_transaction
            .fluent()
            .select()
            .by_id_in(collections::INTEGRATION_CREDENTIALS)
            .obj()
            .one(&IntegrationCredential::document_id(user_id, provider))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let Some(mut credential) = current else {
            let _ = transaction.rollback().await;
            return Ok(false);
        };

        if !modify(&mut credential) {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        self.write_credential_in_transaction(&credential, transaction)
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl HealthStore for FirestoreDb {
    // ─── Credential Operations ───────────────────────────────────

    async fn get_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<IntegrationCredential>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::INTEGRATION_CREDENTIALS)
            .obj()
            .one(&IntegrationCredential::document_id(user_id, provider))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_credentials(
        &self,
        user_id: &str,
    ) -> Result<Vec<IntegrationCredential>, AppError> {
        let user_id = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::INTEGRATION_CREDENTIALS)
            .filter(move |q| q.for_all([q.field("user_id").eq(user_id.clone())]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn put_credential(&self, credential: &IntegrationCredential) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::INTEGRATION_CREDENTIALS)
            .document_id(IntegrationCredential::document_id(
                &credential.user_id,
                credential.provider,
            ))
            .object(credential)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn replace_tokens_if_current(
        &self,
        user_id: &str,
        provider: Provider,
        expected_expires_at: DateTime<Utc>,
        update: &TokenUpdate,
    ) -> Result<bool, AppError> {
        let replaced = self
            .modify_credential(user_id, provider, |credential| {
                if !credential.accepts_refresh_of(expected_expires_at) {
                    return false;
                }
                credential.apply_refresh(update);
                true
            })
            .await?;

        if !replaced {
            tracing::debug!(user_id, %provider, "Conditional token update lost to another writer");
        }
        Ok(replaced)
    }

    async fn reject_grant_if_current(
        &self,
        user_id: &str,
        provider: Provider,
        expected_expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.modify_credential(user_id, provider, |credential| {
            if !credential.active || credential.expires_at != expected_expires_at {
                return false;
            }
            credential.active = false;
            credential.grant_rejected = true;
            true
        })
        .await
    }

    async fn deactivate_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<bool, AppError> {
        let mut was_active = false;
        self.modify_credential(user_id, provider, |credential| {
            was_active = credential.active;
            let changed = credential.active || credential.grant_rejected;
            credential.active = false;
            credential.grant_rejected = false;
            changed
        })
        .await?;
        Ok(was_active)
    }

    async fn touch_last_sync(
        &self,
        user_id: &str,
        provider: Provider,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.modify_credential(user_id, provider, |credential| {
            credential.last_sync_at = Some(at);
            true
        })
        .await?;
        Ok(())
    }

    // ─── Metric Operations ───────────────────────────────────────

    /// Uses concurrent writes with a limit to avoid overloading Firestore.
    async fn upsert_metrics(&self, metrics: &[NormalizedMetric]) -> Result<usize, AppError> {
        let client = self.get_client()?.clone();
        let writes: Vec<(String, NormalizedMetric)> = metrics
            .iter()
            .map(|metric| (metric.document_id(), metric.clone()))
            .collect();

        stream::iter(writes)
            .map(move |(doc_id, metric)| {
                let client = client.clone();
                async move {
                    let _: () = client
                        .fluent()
                        .update()
                        .in_col(collections::HEALTH_METRICS)
                        .document_id(&doc_id)
                        .object(&metric)
                        .execute()
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;

                    Ok::<_, AppError>(())
                }
            })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<(), AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<()>, AppError>>()?;

        Ok(metrics.len())
    }

    async fn list_metrics(
        &self,
        user_id: &str,
        filter: &MetricFilter,
    ) -> Result<Vec<NormalizedMetric>, AppError> {
        let user_id = user_id.to_string();
        let provider = filter.provider.map(|p| p.as_str());
        let metric_type = filter.metric_type.map(|t| t.as_str());
        // Dates are stored as YYYY-MM-DD, so string order is date order.
        let start = filter.start_date.map(|d| d.to_string());
        let end = filter.end_date.map(|d| d.to_string());

        self.get_client()?
            .fluent()
            .select()
            .from(collections::HEALTH_METRICS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user_id.clone()),
                    provider.and_then(|p| q.field("provider").eq(p)),
                    metric_type.and_then(|t| q.field("metric_type").eq(t)),
                    start
                        .clone()
                        .and_then(|d| q.field("metric_date").greater_than_or_equal(d)),
                    end.clone()
                        .and_then(|d| q.field("metric_date").less_than_or_equal(d)),
                ])
            })
            .order_by([("metric_date", firestore::FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Sync Status Operations ──────────────────────────────────

    async fn get_sync_status(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<SyncStatus>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SYNC_STATUS)
            .obj()
            .one(&SyncStatus::document_id(user_id, provider))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_sync_statuses(&self, user_id: &str) -> Result<Vec<SyncStatus>, AppError> {
        let user_id = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::SYNC_STATUS)
            .filter(move |q| q.for_all([q.field("user_id").eq(user_id.clone())]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn put_sync_status(&self, status: &SyncStatus) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::SYNC_STATUS)
            .document_id(SyncStatus::document_id(&status.user_id, status.provider))
            .object(status)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
