// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider OAuth callback.
//!
//! The browser arrives here from the provider's consent page. There is no
//! session on this request; the user comes from the signed `state`. Every
//! outcome is a redirect back to the frontend.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::Provider;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/{provider}/callback", get(auth_callback))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn frontend_redirect(frontend_url: &str, query: &str) -> Redirect {
    Redirect::temporary(&format!(
        "{}/integrations?{}",
        frontend_url.trim_end_matches('/'),
        query
    ))
}

fn error_redirect(frontend_url: &str, error: &str) -> Redirect {
    frontend_redirect(frontend_url, &format!("error={}", urlencoding::encode(error)))
}

/// OAuth callback - exchange the code and store the credential.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let default_frontend = state.config.frontend_url.as_str();

    let verified = params
        .state
        .as_deref()
        .and_then(|raw| state.integrations.verify_state(raw));
    let Some(oauth_state) = verified else {
        tracing::warn!("Invalid, expired or tampered OAuth state parameter");
        return error_redirect(default_frontend, "invalid_state");
    };

    let frontend_url = oauth_state.frontend_url.as_str();
    if provider.parse::<Provider>().ok() != Some(oauth_state.provider) {
        tracing::warn!(
            path_provider = %provider,
            state_provider = %oauth_state.provider,
            "OAuth callback provider does not match state"
        );
        return error_redirect(frontend_url, "invalid_state");
    }
    let provider = oauth_state.provider;
    let user_id = oauth_state.user_id.as_str();

    if let Some(error) = params.error {
        tracing::warn!(user_id, %provider, error = %error, "OAuth error from provider");
        return error_redirect(frontend_url, &error);
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return error_redirect(frontend_url, "missing_code");
    };

    match state.integrations.connect(user_id, provider, &code).await {
        Ok(_) => frontend_redirect(frontend_url, &format!("connected={}", provider)),
        Err(e) => {
            tracing::warn!(user_id, %provider, error = %e, "Failed to connect integration");
            error_redirect(frontend_url, "connect_failed")
        }
    }
}
