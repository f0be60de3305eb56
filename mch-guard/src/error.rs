//! Error types for the merchant API security layer.
//!
//! All fallible operations in this crate return [`Result`], whose error type
//! is [`GuardError`]. Errors are grouped by how a caller should react:
//!
//! - **Key material** ([`GuardError::KeyMaterial`]): malformed or weak keys and
//!   certificates. Fatal at construction, never retried.
//! - **Trust** ([`GuardError::TrustFailure`]): a response or notification
//!   signature did not verify, or named an unknown certificate serial. The
//!   payload must be discarded.
//! - **Integrity** ([`GuardError::CryptoIntegrity`]): an AES-GCM tag or OAEP
//!   padding check failed. The enclosing operation is aborted.
//! - **Algorithm** ([`GuardError::UnsupportedAlgorithm`]): an encrypted record
//!   names an algorithm other than `AEAD_AES_256_GCM`.
//! - **Platform / transport** ([`GuardError::Platform`],
//!   [`GuardError::HttpError`], [`GuardError::TransportError`],
//!   [`GuardError::Timeout`]): the request itself failed.
//!
//! None of these are retried inside the crate.
//!
//! # Examples
//!
//! ```
//! use mch_guard::error::{GuardError, Result};
//!
//! fn require_serial(serial: &str) -> Result<&str> {
//!     if serial.is_empty() {
//!         return Err(GuardError::InvalidInput("serial number is empty".to_owned()));
//!     }
//!     Ok(serial)
//! }
//!
//! assert!(require_serial("").is_err());
//! ```

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Result type alias for all operations in this crate.
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors produced by the security layer.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum GuardError {
    /// Private key, public key or certificate could not be used.
    ///
    /// Raised at construction time for malformed PEM, non-RSA keys, keys
    /// shorter than 2048 bits, or a certificate list whose declared serial
    /// does not match the decrypted certificate.
    #[error("key material error: {0}")]
    KeyMaterial(String),

    /// A signed payload is not trusted.
    ///
    /// The signature did not verify, a verification header was missing, or
    /// the referenced platform serial number is not in the certificate store.
    /// The body must not be parsed or acted upon.
    #[error("response not trusted: {0}")]
    TrustFailure(String),

    /// Authenticated decryption failed.
    ///
    /// Treated as corruption or tampering. Not recoverable by retry since the
    /// symmetric key is fixed.
    #[error("integrity check failed: {0}")]
    CryptoIntegrity(String),

    /// An encrypted record uses an algorithm this crate does not implement.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The platform answered with a non-success status and an error body.
    #[error("{0}")]
    Platform(PlatformError),

    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Request could not be built or sent.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The caller-supplied deadline elapsed.
    #[error("deadline exceeded")]
    Timeout,

    /// No platform certificate is available for the requested operation.
    #[error("platform certificate unavailable: {0}")]
    CertificateUnavailable(String),

    /// Caller input was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is invalid or could not be loaded.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GuardError {
    /// Returns true for errors that mean "do not trust this payload".
    #[must_use]
    pub const fn is_trust_failure(&self) -> bool {
        matches!(self, Self::TrustFailure(_) | Self::CryptoIntegrity(_))
    }

    /// Returns true if a caller-level retry could succeed.
    ///
    /// Only transport-class failures qualify. Trust, integrity, key material
    /// and algorithm errors never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout | Self::TransportError(_) => true,
            Self::Platform(e) => e.status >= 500,
            _ => false,
        }
    }
}

/// Error body returned by the platform for non-success responses.
///
/// ```json
/// {"code":"PARAM_ERROR","message":"invalid sub_mchid","detail":{"field":"/sub_mchid"}}
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PlatformError {
    /// HTTP status code of the response.
    #[serde(skip)]
    pub status: u16,
    /// Machine-readable error code.
    #[serde(default)]
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
    /// Location of the offending parameter, when the platform reports one.
    #[serde(default)]
    pub detail: Option<PlatformErrorDetail>,
}

/// Parameter-level detail of a [`PlatformError`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PlatformErrorDetail {
    /// JSON pointer or query parameter name.
    #[serde(default)]
    pub field: String,
    /// Rejected value.
    #[serde(default)]
    pub value: serde_json::Value,
    /// Specific reason.
    #[serde(default)]
    pub issue: String,
    /// Where the parameter was found (body, query, path).
    #[serde(default)]
    pub location: String,
}

impl PlatformError {
    /// Parses an error body, falling back to the raw text when it is not JSON.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<Self>(body) {
            Ok(mut err) => {
                err.status = status;
                err
            }
            Err(_) => Self {
                status,
                code: format!("HTTP_{status}"),
                message: String::from_utf8_lossy(body).into_owned(),
                detail: None,
            },
        }
    }

    /// True when the platform reports the resource already exists, so a
    /// repeated create can be treated as success.
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        self.code == "RESOURCE_ALREADY_EXISTS"
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform error {} (HTTP {}): {}", self.code, self.status, self.message)
    }
}
