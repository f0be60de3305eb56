//! AES-256-GCM for platform-encrypted records.
//!
//! Platform certificates and notification resources arrive as an
//! [`EncryptedResource`]: a base64 ciphertext (with the 16-byte tag appended),
//! a 12-character ASCII nonce and ASCII associated data, all under the
//! merchant's 32-character API v3 key.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::Engine;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{GuardError, Result};

/// The only algorithm identifier accepted on an [`EncryptedResource`].
pub const AEAD_AES_256_GCM: &str = "AEAD_AES_256_GCM";

/// Length of the API v3 key in bytes.
pub const API_V3_KEY_LEN: usize = 32;

/// Length of the GCM nonce in bytes.
pub const GCM_NONCE_LEN: usize = 12;

/// The merchant's symmetric API v3 secret.
///
/// Exactly 32 bytes, configured out of band in the merchant console. Wiped
/// on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiV3Key([u8; API_V3_KEY_LEN]);

impl ApiV3Key {
    /// Wraps a 32-byte key.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; API_V3_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parses the key from its textual form.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::KeyMaterial`] unless `key` is exactly 32 bytes.
    pub fn new(key: &str) -> Result<Self> {
        let bytes: [u8; API_V3_KEY_LEN] = key.as_bytes().try_into().map_err(|_| {
            GuardError::KeyMaterial(format!(
                "API v3 key must be {API_V3_KEY_LEN} bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Reads the key from the environment variable `var`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ConfigError`] if the variable is unset and
    /// [`GuardError::KeyMaterial`] if its value has the wrong length.
    pub fn from_env(var: &str) -> Result<Self> {
        let mut value = std::env::var(var)
            .map_err(|_| GuardError::ConfigError(format!("environment variable {var} is not set")))?;
        let key = Self::new(value.trim());
        value.zeroize();
        key
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| GuardError::KeyMaterial(format!("invalid AES-256 key: {e}")))
    }
}

impl fmt::Debug for ApiV3Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiV3Key(<redacted>)")
    }
}

fn gcm_nonce(nonce: &str) -> Result<&Nonce<aes_gcm::aead::consts::U12>> {
    if nonce.len() != GCM_NONCE_LEN {
        return Err(GuardError::InvalidInput(format!(
            "GCM nonce must be {GCM_NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    Ok(Nonce::from_slice(nonce.as_bytes()))
}

/// Decrypts a base64 AES-256-GCM ciphertext.
///
/// # Errors
///
/// - [`GuardError::InvalidInput`] if the nonce is not 12 bytes.
/// - [`GuardError::CryptoIntegrity`] if the ciphertext is not base64 or the
///   authentication tag does not match. Nothing is returned in that case.
#[instrument(skip(nonce, ciphertext_b64, key))]
pub fn decrypt_gcm(
    associated_data: &str,
    nonce: &str,
    ciphertext_b64: &str,
    key: &ApiV3Key,
) -> Result<Vec<u8>> {
    let nonce = gcm_nonce(nonce)?;
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(ciphertext_b64.trim())
        .map_err(|e| GuardError::CryptoIntegrity(format!("ciphertext is not base64: {e}")))?;

    key.cipher()?
        .decrypt(nonce, Payload { msg: &ciphertext, aad: associated_data.as_bytes() })
        .map_err(|_| {
            warn!("AES-GCM authentication failed");
            GuardError::CryptoIntegrity("AES-GCM authentication tag mismatch".to_owned())
        })
}

/// Encrypts `plaintext` and returns the base64 ciphertext with the tag
/// appended.
///
/// The platform never asks merchants to produce GCM records; this exists for
/// tooling and tests.
///
/// # Errors
///
/// Returns [`GuardError::InvalidInput`] if the nonce is not 12 bytes.
pub fn encrypt_gcm(
    plaintext: &[u8],
    associated_data: &str,
    nonce: &str,
    key: &ApiV3Key,
) -> Result<String> {
    let nonce = gcm_nonce(nonce)?;
    let ciphertext = key
        .cipher()?
        .encrypt(nonce, Payload { msg: plaintext, aad: associated_data.as_bytes() })
        .map_err(|_| GuardError::InvalidInput("AES-GCM encryption failed".to_owned()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(ciphertext))
}

/// Wire shape of a GCM-protected payload.
///
/// ```json
/// {"algorithm":"AEAD_AES_256_GCM","nonce":"fd2c9a3b7e10","associated_data":"transaction","ciphertext":"..."}
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct EncryptedResource {
    /// Algorithm identifier. Must be `AEAD_AES_256_GCM`.
    pub algorithm: String,
    /// 12-character nonce.
    pub nonce: String,
    /// Associated data, may be empty.
    #[serde(default)]
    pub associated_data: String,
    /// Base64 ciphertext with the tag appended.
    pub ciphertext: String,
    /// Object type before encryption, present on notification resources.
    #[serde(default)]
    pub original_type: Option<String>,
}

impl EncryptedResource {
    /// Checks the algorithm, then decrypts.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::UnsupportedAlgorithm`] without attempting
    /// decryption if the algorithm is not `AEAD_AES_256_GCM`, otherwise the
    /// errors of [`decrypt_gcm`].
    pub fn decrypt(&self, key: &ApiV3Key) -> Result<Vec<u8>> {
        if self.algorithm != AEAD_AES_256_GCM {
            return Err(GuardError::UnsupportedAlgorithm(self.algorithm.clone()));
        }
        decrypt_gcm(&self.associated_data, &self.nonce, &self.ciphertext, key)
    }

    /// Decrypts and deserializes a JSON payload.
    ///
    /// # Errors
    ///
    /// Same as [`EncryptedResource::decrypt`], plus
    /// [`GuardError::Serialization`] if the plaintext is not the expected
    /// JSON.
    pub fn decrypt_json<T: DeserializeOwned>(&self, key: &ApiV3Key) -> Result<T> {
        Ok(serde_json::from_slice(&self.decrypt(key)?)?)
    }
}

impl fmt::Debug for EncryptedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedResource")
            .field("algorithm", &self.algorithm)
            .field("associated_data", &self.associated_data)
            .field("original_type", &self.original_type)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}
