// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth 2.0 authorization-code flow against a provider: build the consent
//! URL, exchange the code, refresh, and revoke.

use crate::error::SyncError;
use crate::models::Provider;
use crate::providers::http::{classify_status, transport_error};
use crate::providers::ProviderEndpoints;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

/// Lifetime assumed when a token response omits `expires_in` or sends a non-positive one.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Longest access-token lifetime we believe; larger values are clamped.
const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 3600;

/// Markers in a token-endpoint error body meaning the grant is gone for good.
const UNRECOVERABLE_GRANT_ERRORS: [&str; 4] =
    ["invalid_grant", "invalid_token", "revoked", "unauthorized_client"];

/// OAuth application credentials for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ProviderCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

/// Tokens issued by a code exchange or refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_grant(self, now: DateTime<Utc>, previous_refresh: Option<&str>) -> TokenGrant {
        let expires_in = match self.expires_in {
            Some(secs) if secs > 0 => secs.min(MAX_EXPIRES_IN_SECS),
            _ => DEFAULT_EXPIRES_IN_SECS,
        };
        let expires_at = now
            .checked_add_signed(Duration::seconds(expires_in))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        TokenGrant {
            access_token: self.access_token,
            // Some providers only rotate the refresh token occasionally.
            refresh_token: self
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at,
            scopes: self
                .scope
                .map(|s| s.split([' ', ',']).filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// OAuth client for one provider.
pub struct OAuthClient {
    provider: Provider,
    http: reqwest::Client,
    credentials: ProviderCredentials,
    endpoints: ProviderEndpoints,
    redirect_uri: String,
}

impl OAuthClient {
    pub fn new(
        provider: Provider,
        http: reqwest::Client,
        credentials: ProviderCredentials,
        endpoints: ProviderEndpoints,
        redirect_uri: String,
    ) -> Self {
        Self {
            provider,
            http,
            credentials,
            endpoints,
            redirect_uri,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Scopes requested at consent time.
    pub fn default_scopes(&self) -> &'static str {
        match self.provider {
            Provider::Whoop => "offline read:recovery read:sleep read:workout read:cycles",
            Provider::Oura => "daily heartrate workout session spo2",
            Provider::Fitbit => "activity heartrate sleep profile",
            Provider::Garmin => "",
        }
    }

    /// Consent page URL carrying the signed `state`.
    pub fn authorization_url(&self, state: &str) -> String {
        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&state={}",
            self.endpoints.authorize_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state),
        );
        let scopes = self.default_scopes();
        if !scopes.is_empty() {
            url.push_str("&scope=");
            url.push_str(&urlencoding::encode(scopes));
        }
        url
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, SyncError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let response = self.post_token(&form).await?;
        Ok(response.into_grant(now, None))
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The returned grant keeps `refresh_token` when the provider does not
    /// issue a new one.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, SyncError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let response = self.post_token(&form).await?;
        Ok(response.into_grant(now, Some(refresh_token)))
    }

    /// Revoke an access token at the provider, where supported.
    pub async fn revoke(&self, access_token: &str) -> Result<(), SyncError> {
        let Some(revoke_url) = &self.endpoints.revoke_url else {
            return Ok(());
        };

        let request = match self.provider {
            // Garmin deregisters the user rather than revoking a token.
            Provider::Garmin => self.http.delete(revoke_url).bearer_auth(access_token),
            Provider::Oura => self
                .http
                .post(revoke_url)
                .query(&[("access_token", access_token)]),
            Provider::Fitbit => self
                .http
                .post(revoke_url)
                .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
                .form(&[("token", access_token)]),
            Provider::Whoop => self.http.post(revoke_url).form(&[
                ("token", access_token),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ]),
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &headers, &body))
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, SyncError> {
        let request = self.http.post(&self.endpoints.token_url);
        // Fitbit wants client credentials in a Basic header, the rest in the body.
        let request = if self.provider == Provider::Fitbit {
            request
                .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
                .form(form)
        } else {
            let mut body: Vec<(&str, &str)> = form.to_vec();
            body.push(("client_id", self.credentials.client_id.as_str()));
            body.push(("client_secret", self.credentials.client_secret.as_str()));
            request.form(&body)
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            let err = classify_token_error(status, &headers, &body);
            tracing::warn!(
                provider = %self.provider,
                status = status.as_u16(),
                error = %err,
                "Token endpoint request failed"
            );
            return Err(err);
        }

        response.json().await.map_err(|e| {
            SyncError::MalformedProviderPayload(format!("token response: {}", e))
        })
    }
}

/// Token endpoint failures: a rejected grant is unrecoverable, everything
/// else follows the usual status classes.
fn classify_token_error(
    status: StatusCode,
    headers: &reqwest::header::HeaderMap,
    body: &str,
) -> SyncError {
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        let lowered = body.to_ascii_lowercase();
        if let Some(marker) = UNRECOVERABLE_GRANT_ERRORS
            .iter()
            .find(|m| lowered.contains(*m))
        {
            return SyncError::TokenExpiredUnrecoverable((*marker).to_string());
        }
    }
    match classify_status(status, headers, body) {
        // A 401 from the token endpoint is about client credentials, not an access token.
        SyncError::Unauthorized => SyncError::ProviderApi {
            status: status.as_u16(),
            message: "token endpoint rejected client".to_string(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    fn client(provider: Provider) -> OAuthClient {
        OAuthClient::new(
            provider,
            reqwest::Client::new(),
            ProviderCredentials::new("client id", "secret"),
            ProviderEndpoints::for_provider(provider),
            "https://api.example.com/auth/whoop/callback".to_string(),
        )
    }

    #[test]
    fn test_authorization_url_encodes_params() {
        let url = client(Provider::Whoop).authorization_url("abc|def");
        assert!(url.starts_with("https://api.prod.whoop.com/oauth/oauth2/auth?"));
        assert!(url.contains("client_id=client%20id"));
        assert!(url.contains("state=abc%7Cdef"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapi.example.com"));
        assert!(url.contains("scope=offline%20read%3Arecovery"));

        let garmin = client(Provider::Garmin).authorization_url("s");
        assert!(!garmin.contains("scope="));
    }

    #[test]
    fn test_grant_keeps_previous_refresh_token() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let response = TokenResponse {
            access_token: "a2".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
            scope: Some("daily heartrate".to_string()),
        };
        let grant = response.into_grant(now, Some("r1"));
        assert_eq!(grant.refresh_token.as_deref(), Some("r1"));
        assert_eq!(grant.expires_at, now + Duration::seconds(3600));
        assert_eq!(grant.scopes, vec!["daily", "heartrate"]);
    }

    #[test]
    fn test_grant_sanitizes_expires_in() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let grant = |expires_in: Option<i64>| {
            TokenResponse {
                access_token: "a".to_string(),
                refresh_token: None,
                expires_in,
                scope: None,
            }
            .into_grant(now, None)
        };

        assert_eq!(grant(None).expires_at, now + Duration::seconds(3600));
        assert_eq!(grant(Some(0)).expires_at, now + Duration::seconds(3600));
        assert_eq!(grant(Some(-30)).expires_at, now + Duration::seconds(3600));
        assert_eq!(
            grant(Some(i64::MAX)).expires_at,
            now + Duration::days(365)
        );
    }

    #[test]
    fn test_token_error_classification() {
        let headers = HeaderMap::new();
        assert_eq!(
            classify_token_error(
                StatusCode::BAD_REQUEST,
                &headers,
                r#"{"error":"invalid_grant"}"#
            ),
            SyncError::TokenExpiredUnrecoverable("invalid_grant".to_string())
        );
        assert!(matches!(
            classify_token_error(StatusCode::SERVICE_UNAVAILABLE, &headers, "invalid_grant"),
            SyncError::TransientNetworkError(_)
        ));
        assert!(matches!(
            classify_token_error(StatusCode::TOO_MANY_REQUESTS, &headers, ""),
            SyncError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_token_error(StatusCode::UNAUTHORIZED, &headers, "bad client"),
            SyncError::ProviderApi { status: 401, .. }
        ));
    }
}
