// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Signed OAuth `state` parameter.
//!
//! The callback is unauthenticated (the provider redirects the browser to
//! it), so the state carries who started the flow. Format before base64:
//! `user_id|provider|frontend_url|timestamp_hex|signature_hex`, where the
//! signature is HMAC-SHA256 over everything before it.

use crate::error::AppError;
use crate::models::Provider;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// How long a consent flow may take.
pub const STATE_MAX_AGE_SECS: i64 = 10 * 60;

const STATE_PARTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub user_id: String,
    pub provider: Provider,
    pub frontend_url: String,
    pub issued_at: DateTime<Utc>,
}

impl OAuthState {
    /// Signed, URL-safe encoding.
    pub fn sign(&self, secret: &[u8]) -> Result<String, AppError> {
        let payload = format!(
            "{}|{}|{}|{:x}",
            urlencoding::encode(&self.user_id),
            self.provider,
            urlencoding::encode(&self.frontend_url),
            self.issued_at.timestamp_millis()
        );
        let signature = hex::encode(mac(secret, &payload)?.finalize().into_bytes());
        Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature)))
    }

    /// Decode and check signature and age. `None` on any mismatch.
    pub fn verify(raw: &str, secret: &[u8], now: DateTime<Utc>) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
        let decoded = String::from_utf8(bytes).ok()?;

        let (payload, signature_hex) = decoded.rsplit_once('|')?;
        let parts: Vec<&str> = payload.split('|').collect();
        if parts.len() != STATE_PARTS - 1 {
            return None;
        }

        let signature = hex::decode(signature_hex).ok()?;
        let expected = mac(secret, payload).ok()?.finalize().into_bytes();
        if !bool::from(expected.as_slice().ct_eq(&signature)) {
            tracing::error!("OAuth state signature mismatch");
            return None;
        }

        let issued_at =
            DateTime::from_timestamp_millis(i64::from_str_radix(parts[3], 16).ok()?)?;
        let age = now.signed_duration_since(issued_at);
        if age > Duration::seconds(STATE_MAX_AGE_SECS) || age < -Duration::seconds(60) {
            tracing::warn!(age_secs = age.num_seconds(), "OAuth state expired");
            return None;
        }

        Some(Self {
            user_id: urlencoding::decode(parts[0]).ok()?.into_owned(),
            provider: parts[1].parse().ok()?,
            frontend_url: urlencoding::decode(parts[2]).ok()?.into_owned(),
            issued_at,
        })
    }
}

fn mac(secret: &[u8], payload: &str) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}
