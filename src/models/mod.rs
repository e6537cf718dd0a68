// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod credential;
pub mod metric;
pub mod range;
pub mod sync_status;

pub use credential::{
    CredentialEvent, CredentialState, IntegrationCredential, Provider, TokenUpdate,
};
pub use metric::{
    merge_samples, ActivityValues, MetricSample, MetricType, MetricValues, NormalizedMetric,
    Reading, RecoveryValues, SleepValues, ZoneMinutes,
};
pub use range::{DateRange, DateRangeError};
pub use sync_status::{OutcomeStatus, ProviderOutcome, SyncOutcome, SyncStatus};
