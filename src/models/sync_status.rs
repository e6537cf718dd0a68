// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-provider sync outcomes and the persisted sync status record.

use crate::error::SyncError;
use crate::models::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of syncing one provider in one orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every metric kind was fetched and stored.
    Success,
    /// Some metric kinds were stored, others failed.
    Partial,
    /// Nothing was attempted (no usable credential).
    Skipped,
    Failed,
}

/// Outcome reported to the caller of a sync, one per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub status: OutcomeStatus,
    /// Human-readable summary, e.g. `"failed: retryable"`
    pub summary: String,
    pub records_upserted: usize,
    pub retryable: bool,
    pub reconnect_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderOutcome {
    pub fn success(records_upserted: usize) -> Self {
        Self {
            status: OutcomeStatus::Success,
            summary: "success".to_string(),
            records_upserted,
            retryable: false,
            reconnect_required: false,
            retry_after_secs: None,
            error: None,
        }
    }

    pub fn partial(records_upserted: usize, cause: &SyncError) -> Self {
        Self {
            status: OutcomeStatus::Partial,
            summary: "partial".to_string(),
            records_upserted,
            retryable: cause.is_retryable(),
            reconnect_required: false,
            retry_after_secs: retry_after(cause),
            error: Some(cause.to_string()),
        }
    }

    pub fn not_connected() -> Self {
        Self {
            status: OutcomeStatus::Skipped,
            summary: "skipped: not connected".to_string(),
            records_upserted: 0,
            retryable: false,
            reconnect_required: false,
            retry_after_secs: None,
            error: None,
        }
    }

    pub fn failed(cause: &SyncError) -> Self {
        let summary = if cause.requires_reconnect() {
            "failed: reconnect required"
        } else if cause.is_retryable() {
            "failed: retryable"
        } else {
            "failed"
        };
        Self {
            status: OutcomeStatus::Failed,
            summary: summary.to_string(),
            records_upserted: 0,
            retryable: cause.is_retryable(),
            reconnect_required: cause.requires_reconnect(),
            retry_after_secs: retry_after(cause),
            error: Some(cause.to_string()),
        }
    }

    pub fn timed_out(secs: u64) -> Self {
        Self::failed(&SyncError::TransientNetworkError(format!(
            "sync timed out after {}s",
            secs
        )))
    }
}

fn retry_after(cause: &SyncError) -> Option<u64> {
    match cause {
        SyncError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
        _ => None,
    }
}

/// Outcome as persisted in the status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Partial,
    Failure,
}

impl From<OutcomeStatus> for SyncOutcome {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Success => SyncOutcome::Success,
            OutcomeStatus::Partial => SyncOutcome::Partial,
            OutcomeStatus::Skipped | OutcomeStatus::Failed => SyncOutcome::Failure,
        }
    }
}

/// Latest sync attempt for one (user, provider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub user_id: String,
    pub provider: Provider,
    pub last_attempt_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub outcome: SyncOutcome,
    pub error_detail: Option<String>,
    #[serde(default)]
    pub records_upserted: u32,
}

impl SyncStatus {
    pub fn document_id(user_id: &str, provider: Provider) -> String {
        format!("{}_{}", urlencoding::encode(user_id), provider)
    }

    /// Status after an attempt at `now`, carrying `last_success_at` forward
    /// from `previous` unless this attempt fully succeeded.
    pub fn record_attempt(
        user_id: &str,
        provider: Provider,
        outcome: &ProviderOutcome,
        now: DateTime<Utc>,
        previous: Option<&SyncStatus>,
    ) -> Self {
        let last_success_at = if outcome.status == OutcomeStatus::Success {
            Some(now)
        } else {
            previous.and_then(|p| p.last_success_at)
        };

        Self {
            user_id: user_id.to_string(),
            provider,
            last_attempt_at: now,
            last_success_at,
            outcome: outcome.status.into(),
            error_detail: outcome
                .error
                .clone()
                .or_else(|| (outcome.status == OutcomeStatus::Skipped).then(|| outcome.summary.clone())),
            records_upserted: outcome.records_upserted as u32,
        }
    }
}
