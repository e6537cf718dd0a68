// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Wearable-Sync API Server
//!
//! Keeps wearable provider credentials fresh and syncs their health data
//! into a single normalized store.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wearable_sync::{
    config::{Config, StorageBackend},
    db::{FirestoreDb, HealthStore},
    providers::ProviderRegistry,
    services::KmsService,
    time_utils::SystemClock,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        storage = ?config.storage_backend,
        providers = ?config.providers.keys().collect::<Vec<_>>(),
        "Starting Wearable-Sync API"
    );

    let (store, kms): (Arc<dyn HealthStore>, KmsService) = match config.storage_backend {
        StorageBackend::Firestore => {
            let db = FirestoreDb::new(&config.gcp_project_id).await?;
            let kms = KmsService::new(
                &config.gcp_project_id,
                &config.gcp_region,
                &config.kms_key_name,
            )
            .await?;
            tracing::info!("Firestore and KMS initialized");
            (Arc::new(db), kms)
        }
        StorageBackend::Memory => memory_backend()?,
    };

    let registry = ProviderRegistry::from_config(&config)?;

    // Build shared state
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        kms,
        registry,
        Arc::new(SystemClock),
    ));

    // Build router
    let app = wearable_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// In-memory store with the offline KMS mock, for local development.
#[cfg(debug_assertions)]
fn memory_backend() -> Result<(Arc<dyn HealthStore>, KmsService), Box<dyn std::error::Error>> {
    tracing::warn!("Using in-memory storage and mock KMS; data is lost on restart");
    Ok((
        Arc::new(wearable_sync::db::MemoryDb::new()),
        KmsService::new_mock(),
    ))
}

#[cfg(not(debug_assertions))]
fn memory_backend() -> Result<(Arc<dyn HealthStore>, KmsService), Box<dyn std::error::Error>> {
    Err("STORAGE_BACKEND=memory is only available in debug builds".into())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wearable_sync=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
