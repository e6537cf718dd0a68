// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Wearable providers and the per-user OAuth credential record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A third-party wearable data source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Whoop,
    Oura,
    Fitbit,
    Garmin,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Whoop,
        Provider::Oura,
        Provider::Fitbit,
        Provider::Garmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Whoop => "whoop",
            Provider::Oura => "oura",
            Provider::Fitbit => "fitbit",
            Provider::Garmin => "garmin",
        }
    }

    /// Prefix used for this provider's environment variables.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Provider::Whoop => "WHOOP",
            Provider::Oura => "OURA",
            Provider::Fitbit => "FITBIT",
            Provider::Garmin => "GARMIN",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown provider '{}'", s))
    }
}

/// OAuth credential for one (user, provider), encrypted at rest.
///
/// Document ID is [`IntegrationCredential::document_id`], so there is never
/// more than one record (and therefore one active credential) per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationCredential {
    pub user_id: String,
    pub provider: Provider,
    /// KMS-encrypted access token (base64)
    pub access_token_encrypted: String,
    /// KMS-encrypted refresh token (base64); some grants have none
    pub refresh_token_encrypted: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub connected_at: DateTime<Utc>,
    /// Last time data was actually fetched with this credential
    pub last_sync_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Deactivated because the provider refused the refresh grant, not by the
    /// user. A refresh of the same generation committed later revives it.
    #[serde(default)]
    pub grant_rejected: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl IntegrationCredential {
    pub fn document_id(user_id: &str, provider: Provider) -> String {
        format!("{}_{}", urlencoding::encode(user_id), provider)
    }

    /// Lifecycle state as seen at `now` with the given refresh margin.
    pub fn state(&self, now: DateTime<Utc>, margin: Duration) -> CredentialState {
        if !self.active {
            CredentialState::Disconnected
        } else if now + margin < self.expires_at {
            CredentialState::Connected
        } else {
            CredentialState::Expired
        }
    }

    /// Whether a refresh of the `expected_expires_at` generation may still be
    /// written. A user disconnect closes the door; a rejected grant does not,
    /// since the rejection may have raced a peer's rotation.
    pub fn accepts_refresh_of(&self, expected_expires_at: DateTime<Utc>) -> bool {
        self.expires_at == expected_expires_at && (self.active || self.grant_rejected)
    }

    pub fn apply_refresh(&mut self, update: &TokenUpdate) {
        self.access_token_encrypted = update.access_token_encrypted.clone();
        self.refresh_token_encrypted = update.refresh_token_encrypted.clone();
        self.expires_at = update.expires_at;
        self.active = true;
        self.grant_rejected = false;
    }
}

/// Replacement token material written by a successful refresh.
#[derive(Debug, Clone)]
pub struct TokenUpdate {
    pub access_token_encrypted: String,
    pub refresh_token_encrypted: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Credential lifecycle.
///
/// `Expired` is a connected credential whose access token is past
/// `expires_at - margin`; it may only move on to `Refreshing` or be
/// disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Disconnected,
    Connected,
    Expired,
    Refreshing,
}

/// Something that happens to a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialEvent {
    OAuthCallback,
    RefreshStarted,
    RefreshSucceeded,
    RefreshRejected,
    UserDisconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal credential transition: {event:?} while {from:?}")]
pub struct IllegalTransition {
    pub from: CredentialState,
    pub event: CredentialEvent,
}

impl CredentialState {
    pub fn transition(self, event: CredentialEvent) -> Result<CredentialState, IllegalTransition> {
        use CredentialEvent::*;
        use CredentialState::*;

        match (self, event) {
            (Disconnected, OAuthCallback) => Ok(Connected),
            // Reconnecting replaces the stored pair outright.
            (Connected | Expired, OAuthCallback) => Ok(Connected),
            (Expired, RefreshStarted) => Ok(Refreshing),
            (Refreshing, RefreshSucceeded) => Ok(Connected),
            (Refreshing, RefreshRejected) => Ok(Disconnected),
            (Connected | Expired | Refreshing, UserDisconnect) => Ok(Disconnected),
            (from, event) => Err(IllegalTransition { from, event }),
        }
    }

    pub fn is_connected(self) -> bool {
        !matches!(self, CredentialState::Disconnected)
    }
}
