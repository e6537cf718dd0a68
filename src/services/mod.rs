// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod integrations;
pub mod kms;
pub mod oauth_state;
pub mod sync;
pub mod token_manager;

pub use integrations::{IntegrationService, IntegrationSummary};
pub use kms::KmsService;
pub use oauth_state::OAuthState;
pub use sync::{SyncOrchestrator, SyncReport};
pub use token_manager::TokenManager;
