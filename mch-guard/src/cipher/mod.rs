//! Field Cipher.
//!
//! Two unrelated primitives live here and must not be mixed up:
//!
//! - [`field`]: RSA-OAEP with SHA-1 for single PII fields placed in request
//!   bodies or returned in responses.
//! - [`aead`]: AES-256-GCM under the API v3 key for platform certificates and
//!   notification resources delivered as an [`EncryptedResource`].

pub mod aead;
pub mod field;

pub use aead::{AEAD_AES_256_GCM, ApiV3Key, EncryptedResource, decrypt_gcm, encrypt_gcm};
pub use field::{decrypt_field, encrypt_field, oaep_capacity};
