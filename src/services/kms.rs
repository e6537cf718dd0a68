// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud KMS service for encrypting wearable OAuth tokens at rest.
//!
//! Tokens are small, so each one is encrypted directly with the key (no
//! envelope). Ciphertext is stored base64-encoded on the credential record.

use crate::error::AppError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// KMS encryption service.
#[derive(Clone)]
pub struct KmsService {
    /// Full resource path to the KMS key
    /// Format: projects/{project}/locations/{location}/keyRings/{ring}/cryptoKeys/{key}
    key_path: String,

    /// GCP KMS client
    client: Option<std::sync::Arc<google_cloud_kms::client::Client>>,
}

impl KmsService {
    /// KMS Key Ring Name
    const KEY_RING_NAME: &str = "wearable-sync";

    /// Connect to Cloud KMS using ambient credentials.
    pub async fn new(project_id: &str, location: &str, key_name: &str) -> Result<Self, AppError> {
        let key_path = format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            project_id,
            location,
            Self::KEY_RING_NAME,
            key_name
        );

        let config = google_cloud_kms::client::ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS auth config: {}", e))
            })?;

        let client = google_cloud_kms::client::Client::new(config)
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS client: {}", e))
            })?;

        Ok(Self {
            key_path,
            client: Some(std::sync::Arc::new(client)),
        })
    }

    /// Create a mock KMS service for testing (offline mode).
    /// Only available in debug/test builds.
    #[cfg(debug_assertions)]
    pub fn new_mock() -> Self {
        Self {
            key_path: "projects/mock/locations/mock/keyRings/mock/cryptoKeys/mock".to_string(),
            client: None,
        }
    }

    /// Encrypt plaintext data using KMS.
    /// Returns base64-encoded ciphertext.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::EncryptRequest;

        // Mock mode (Debug builds only)
        #[cfg(debug_assertions)]
        {
            if self.client.is_none() {
                return Ok(BASE64.encode(plaintext));
            }
        }

        // Release builds have no mock path; a missing client is an error.
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("KMS client not connected")))?;

        let req = EncryptRequest {
            name: self.key_path.clone(),
            plaintext: plaintext.as_bytes().to_vec(),
            ..Default::default()
        };

        let response = client
            .encrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS encrypt failed: {}", e)))?;

        Ok(BASE64.encode(response.ciphertext))
    }

    /// Decrypt ciphertext using KMS.
    /// Expects base64-encoded ciphertext.
    pub async fn decrypt(&self, ciphertext_b64: &str) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::DecryptRequest;

        // Mock mode (Debug builds only)
        #[cfg(debug_assertions)]
        {
            if self.client.is_none() {
                let bytes = BASE64.decode(ciphertext_b64).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("Base64 output decode failed (mock): {}", e))
                })?;
                return String::from_utf8(bytes).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("UTF-8 decode failed (mock): {}", e))
                });
            }
        }

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("KMS client not connected")))?;

        let ciphertext = BASE64.decode(ciphertext_b64).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Base64 output decode failed: {}", e))
        })?;

        let req = DecryptRequest {
            name: self.key_path.clone(),
            ciphertext,
            ..Default::default()
        };

        let response = client
            .decrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS decrypt failed: {}", e)))?;

        String::from_utf8(response.plaintext)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("UTF-8 decode failed: {}", e)))
    }
}

/// Encrypted access and optional refresh token, ready to store.
pub struct EncryptedTokens {
    pub access: String,
    pub refresh: Option<String>,
}

/// Encrypt a freshly issued token pair before storing.
pub async fn encrypt_tokens(
    kms: &KmsService,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<EncryptedTokens, AppError> {
    let access = kms.encrypt(access_token).await?;
    let refresh = match refresh_token {
        Some(token) => Some(kms.encrypt(token).await?),
        None => None,
    };
    Ok(EncryptedTokens { access, refresh })
}

/// Decrypt a stored refresh token, if the credential has one.
pub async fn decrypt_refresh_token(
    kms: &KmsService,
    encrypted_refresh: Option<&str>,
) -> Result<Option<String>, AppError> {
    match encrypted_refresh {
        Some(ciphertext) => Ok(Some(kms.decrypt(ciphertext).await?)),
        None => Ok(None),
    }
}
