// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! JWT authentication middleware.
//!
//! Sessions are issued by the separate auth service; this API only verifies
//! them and resolves the user id. Handlers receive it as [`AuthUser`] and
//! pass it explicitly to every service call.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

/// Authenticated user extracted from JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// Middleware that requires a valid `Authorization: Bearer` JWT.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id = verify_jwt(token, &state.config.jwt_signing_key)?;
    request.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(request).await)
}

fn verify_jwt(token: &str, signing_key: &[u8]) -> Result<String, StatusCode> {
    let key = DecodingKey::from_secret(signing_key);
    let validation = Validation::new(Algorithm::HS256);

    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "Rejected session token");
        StatusCode::UNAUTHORIZED
    })?;

    let user_id = token_data.claims.sub;
    if user_id.trim().is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(user_id)
}

/// Create a session JWT. Used by tests and local tooling; production
/// sessions come from the auth service.
pub fn create_jwt(user_id: &str, signing_key: &[u8]) -> anyhow::Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + 24 * 60 * 60,
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_round_trip() {
        let jwt = create_jwt("user-42", b"key").unwrap();
        assert_eq!(verify_jwt(&jwt, b"key").unwrap(), "user-42");
    }

    #[test]
    fn test_jwt_wrong_key() {
        let jwt = create_jwt("user-42", b"key").unwrap();
        assert_eq!(verify_jwt(&jwt, b"other"), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_jwt_empty_subject() {
        let jwt = create_jwt("  ", b"key").unwrap();
        assert_eq!(verify_jwt(&jwt, b"key"), Err(StatusCode::UNAUTHORIZED));
    }
}
