// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::db::MetricFilter;
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{DateRange, MetricType, NormalizedMetric, Provider, SyncStatus};
use crate::services::{IntegrationSummary, SyncReport};
use crate::time_utils::parse_day;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sync", post(trigger_sync))
        .route("/api/sync/status", get(get_sync_status))
        .route("/api/integrations", get(list_integrations))
        .route("/api/integrations/{provider}/connect", get(connect_provider))
        .route("/api/integrations/{provider}", delete(disconnect_provider))
        .route("/api/metrics", get(get_metrics))
}

fn parse_provider(raw: &str) -> Result<Provider> {
    raw.parse().map_err(AppError::BadRequest)
}

fn parse_date(name: &str, raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        parse_day(s).ok_or_else(|| {
            AppError::BadRequest(format!("Invalid '{}' parameter: expected YYYY-MM-DD", name))
        })
    })
    .transpose()
}

// ─── Sync ────────────────────────────────────────────────────

#[derive(Deserialize, Validate)]
struct SyncParams {
    /// Sync the last N days (including today)
    #[validate(range(min = 1))]
    days: Option<u32>,
    start_date: Option<String>,
    end_date: Option<String>,
}

/// Sync response: the requested window and one outcome per provider.
#[derive(Serialize)]
pub struct SyncResponse {
    pub start_date: String,
    pub end_date: String,
    pub providers: SyncReport,
}

/// Resolve the requested window. An explicit start/end wins over `days`.
fn sync_range(
    params: &SyncParams,
    today: NaiveDate,
    default_days: u32,
    max_days: u32,
) -> Result<DateRange> {
    params
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let start = parse_date("start_date", params.start_date.as_deref())?;
    let end = parse_date("end_date", params.end_date.as_deref())?;

    let range = match (start, end) {
        (Some(start), end) => DateRange::new(start, end.unwrap_or(today)),
        (None, Some(_)) => {
            return Err(AppError::BadRequest(
                "'end_date' requires 'start_date'".to_string(),
            ))
        }
        (None, None) => Ok(DateRange::last_days(
            today,
            params.days.unwrap_or(default_days),
        )),
    };

    range
        .and_then(|r| r.ensure_max_days(u64::from(max_days)))
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Sync every connected provider. Provider failures are reported per
/// provider in the body; the request itself still succeeds.
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncResponse>> {
    let today = state.clock.now().date_naive();
    let range = sync_range(
        &params,
        today,
        state.config.sync_default_days,
        state.config.sync_max_days,
    )?;

    tracing::info!(
        user_id = %user.user_id,
        start = %range.start(),
        end = %range.end(),
        "Sync requested"
    );

    let providers = state.sync.sync_all_data_for_user(&user.user_id, &range).await;

    Ok(Json(SyncResponse {
        start_date: range.start().to_string(),
        end_date: range.end().to_string(),
        providers,
    }))
}

#[derive(Serialize)]
pub struct SyncStatusResponse {
    pub statuses: Vec<SyncStatus>,
}

async fn get_sync_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SyncStatusResponse>> {
    let statuses = state.store.list_sync_statuses(&user.user_id).await?;
    Ok(Json(SyncStatusResponse { statuses }))
}

// ─── Integrations ────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct IntegrationsResponse {
    pub integrations: Vec<IntegrationSummary>,
}

async fn list_integrations(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<IntegrationsResponse>> {
    let integrations = state.integrations.list_integrations(&user.user_id).await?;
    Ok(Json(IntegrationsResponse { integrations }))
}

#[derive(Deserialize)]
struct ConnectParams {
    /// Where the callback should send the browser afterwards.
    redirect_uri: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConnectResponse {
    pub authorization_url: String,
}

async fn connect_provider(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    Query(params): Query<ConnectParams>,
) -> Result<Json<ConnectResponse>> {
    let provider = parse_provider(&provider)?;

    let frontend_url = match params.redirect_uri {
        Some(uri) if state.config.allows_redirect(&uri) => uri,
        Some(uri) => {
            return Err(AppError::BadRequest(format!(
                "redirect_uri '{}' is not allowed",
                uri
            )))
        }
        None => state.config.frontend_url.clone(),
    };

    let authorization_url =
        state
            .integrations
            .authorization_url(&user.user_id, provider, &frontend_url)?;
    Ok(Json(ConnectResponse { authorization_url }))
}

#[derive(Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub message: String,
}

async fn disconnect_provider(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
) -> Result<Json<DisconnectResponse>> {
    let provider = parse_provider(&provider)?;
    state.integrations.disconnect(&user.user_id, provider).await?;

    Ok(Json(DisconnectResponse {
        success: true,
        message: format!("{} disconnected", provider),
    }))
}

// ─── Metrics ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct MetricsQuery {
    provider: Option<String>,
    metric_type: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub metrics: Vec<NormalizedMetric>,
    pub total: usize,
}

impl MetricsQuery {
    fn into_filter(self) -> Result<MetricFilter> {
        Ok(MetricFilter {
            provider: self.provider.as_deref().map(parse_provider).transpose()?,
            metric_type: self
                .metric_type
                .as_deref()
                .map(|s| s.parse::<MetricType>().map_err(AppError::BadRequest))
                .transpose()?,
            start_date: parse_date("start_date", self.start_date.as_deref())?,
            end_date: parse_date("end_date", self.end_date.as_deref())?,
        })
    }
}

async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>> {
    let filter = params.into_filter()?;

    tracing::debug!(
        user_id = %user.user_id,
        provider = ?filter.provider,
        metric_type = ?filter.metric_type,
        "Fetching metrics"
    );

    let metrics = state.store.list_metrics(&user.user_id, &filter).await?;
    Ok(Json(MetricsResponse {
        total: metrics.len(),
        metrics,
    }))
}
