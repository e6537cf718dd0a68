// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Wearable-Sync: health data aggregation across wearable providers
//!
//! This crate provides the backend API that keeps OAuth credentials for
//! Whoop, Oura, Fitbit and Garmin fresh and pulls their recovery, sleep and
//! activity data into one normalized schema.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::HealthStore;
use providers::ProviderRegistry;
use services::{IntegrationService, KmsService, SyncOrchestrator, TokenManager};
use std::sync::Arc;
use time_utils::Clock;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn HealthStore>,
    pub tokens: TokenManager,
    pub sync: SyncOrchestrator,
    pub integrations: IntegrationService,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire the services on top of a store, KMS, provider registry and clock.
    pub fn new(
        config: Config,
        store: Arc<dyn HealthStore>,
        kms: KmsService,
        registry: ProviderRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tokens = TokenManager::new(
            store.clone(),
            kms.clone(),
            registry.clone(),
            clock.clone(),
            chrono::Duration::seconds(config.token_refresh_margin_secs),
        );
        let sync = SyncOrchestrator::new(
            store.clone(),
            registry.clone(),
            tokens.clone(),
            clock.clone(),
            std::time::Duration::from_secs(config.provider_sync_timeout_secs),
        );
        let integrations = IntegrationService::new(
            store.clone(),
            kms,
            registry,
            tokens.clone(),
            clock.clone(),
            config.oauth_state_key.clone(),
        );

        Self {
            config,
            store,
            tokens,
            sync,
            integrations,
            clock,
        }
    }
}
