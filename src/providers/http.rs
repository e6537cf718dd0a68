// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authenticated GET requests against a provider API, with error
//! classification shared by every adapter.

use crate::error::{SyncError, DEFAULT_RETRY_AFTER_SECS};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// GET `{base_url}{path}` and decode the JSON envelope.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, SyncError> {
        let url = format!("{}{}", self.base_url, path);
        self.get_url(&url, access_token, query).await
    }

    /// GET an absolute URL, e.g. a provider-supplied next-page link.
    pub async fn get_url<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, SyncError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, &headers, &body);
            tracing::debug!(url, status = status.as_u16(), error = %err, "Provider request failed");
            return Err(err);
        }

        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&body).map_err(|e| {
            SyncError::MalformedProviderPayload(format!("{}: {}", url, e))
        })
    }
}

/// Map a non-success provider response to a [`SyncError`].
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> SyncError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited {
            retry_after_secs: retry_after_secs(headers),
        },
        StatusCode::UNAUTHORIZED => SyncError::Unauthorized,
        s if s.is_server_error() => {
            SyncError::TransientNetworkError(format!("HTTP {}", s.as_u16()))
        }
        s => SyncError::ProviderApi {
            status: s.as_u16(),
            message: truncate(body),
        },
    }
}

/// Failures before a status line was read are always worth retrying.
pub fn transport_error(err: reqwest::Error) -> SyncError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "request"
    };
    SyncError::TransientNetworkError(format!("{}: {}", kind, err))
}

/// `Retry-After` in delta-seconds; anything else falls back to the default.
fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
