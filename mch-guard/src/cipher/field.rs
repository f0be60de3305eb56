//! RSA-OAEP (SHA-1) protection of individual sensitive fields.
//!
//! Outbound identity fields (names, ID numbers, phone and bank account
//! numbers) are encrypted with the current platform public key. A few
//! response fields come back encrypted with the merchant public key and are
//! decrypted with the merchant private key.

use base64::Engine;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey, traits::PublicKeyParts};
use sha1::Sha1;
use tracing::instrument;

use crate::error::{GuardError, Result};

/// SHA-1 digest length used by the OAEP padding.
const OAEP_HASH_LEN: usize = 20;

/// Largest plaintext, in bytes, that `public_key` can encrypt with
/// OAEP/SHA-1: `k - 2 * 20 - 2`.
///
/// 214 bytes for a 2048-bit key.
#[must_use]
pub fn oaep_capacity(public_key: &RsaPublicKey) -> usize {
    public_key.size().saturating_sub(2 * OAEP_HASH_LEN + 2)
}

/// Encrypts one field and returns standard base64.
///
/// Output is randomized; two encryptions of the same text differ.
///
/// # Errors
///
/// Returns [`GuardError::InvalidInput`] if `plaintext` exceeds
/// [`oaep_capacity`]. Input is never truncated.
#[instrument(skip_all, fields(len = plaintext.len()))]
pub fn encrypt_field(plaintext: &str, public_key: &RsaPublicKey) -> Result<String> {
    let capacity = oaep_capacity(public_key);
    if plaintext.len() > capacity {
        return Err(GuardError::InvalidInput(format!(
            "field is {} bytes, OAEP capacity is {capacity}",
            plaintext.len()
        )));
    }

    let ciphertext = public_key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha1>(), plaintext.as_bytes())
        .map_err(|e| GuardError::InvalidInput(format!("OAEP encryption failed: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(ciphertext))
}

/// Decrypts one base64 field with the merchant private key.
///
/// # Errors
///
/// Returns [`GuardError::CryptoIntegrity`] if the input is not base64, the
/// OAEP padding check fails, or the plaintext is not UTF-8.
#[instrument(skip_all, fields(len = ciphertext_b64.len()))]
pub fn decrypt_field(ciphertext_b64: &str, private_key: &RsaPrivateKey) -> Result<String> {
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(ciphertext_b64.trim())
        .map_err(|e| GuardError::CryptoIntegrity(format!("field is not base64: {e}")))?;
    let plaintext = private_key
        .decrypt(Oaep::new::<Sha1>(), &ciphertext)
        .map_err(|_| GuardError::CryptoIntegrity("OAEP decryption failed".to_owned()))?;
    String::from_utf8(plaintext)
        .map_err(|_| GuardError::CryptoIntegrity("decrypted field is not UTF-8".to_owned()))
}
