//! Asynchronous notifications (webhooks).
//!
//! The platform POSTs a JSON envelope to the merchant's notify URL, signed
//! like an API response. The business payload sits encrypted in
//! `resource`. The raw body is verified before it is parsed; an unverified
//! notification is never deserialized.
//!
//! # Examples
//!
//! ```rust,no_run
//! use mch_guard::{auth::ResponseHeaders, notify::NotificationParser};
//!
//! # fn handle(parser: &NotificationParser, headers: Vec<(String, String)>, body: &[u8]) -> mch_guard::Result<()> {
//! let headers = ResponseHeaders::from_pairs(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
//! let notification = parser.parse(&headers, body)?;
//! let payload: serde_json::Value = notification.decrypt_resource()?;
//! println!("{} {}", notification.event_type(), payload["out_trade_no"]);
//! # Ok(())
//! # }
//! ```

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{info, instrument};

use crate::{
    auth::{ResponseHeaders, ResponseVerifier},
    cipher::{ApiV3Key, EncryptedResource},
    error::Result,
};

/// Kind of event a notification reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum EventType {
    /// `TRANSACTION.SUCCESS`: payment completed.
    TransactionSuccess,
    /// `REFUND.SUCCESS`: refund completed.
    RefundSuccess,
    /// `REFUND.ABNORMAL`: refund failed and needs manual handling.
    RefundAbnormal,
    /// `REFUND.CLOSED`: refund closed.
    RefundClosed,
    /// `TRANSACTION.RETURN`: profit-sharing return.
    TransactionReturn,
    /// Any event type not listed above, kept verbatim.
    Other(String),
}

impl EventType {
    /// Wire identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::TransactionSuccess => "TRANSACTION.SUCCESS",
            Self::RefundSuccess => "REFUND.SUCCESS",
            Self::RefundAbnormal => "REFUND.ABNORMAL",
            Self::RefundClosed => "REFUND.CLOSED",
            Self::TransactionReturn => "TRANSACTION.RETURN",
            Self::Other(other) => other,
        }
    }

    /// True for the refund family.
    #[must_use]
    pub const fn is_refund(&self) -> bool {
        matches!(self, Self::RefundSuccess | Self::RefundAbnormal | Self::RefundClosed)
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "TRANSACTION.SUCCESS" => Self::TransactionSuccess,
            "REFUND.SUCCESS" => Self::RefundSuccess,
            "REFUND.ABNORMAL" => Self::RefundAbnormal,
            "REFUND.CLOSED" => Self::RefundClosed,
            "TRANSACTION.RETURN" => Self::TransactionReturn,
            _ => Self::Other(value),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    /// Notification id, unique per delivery.
    pub id: String,
    /// Creation time (RFC 3339).
    pub create_time: String,
    /// Event kind.
    pub event_type: EventType,
    /// Resource kind, e.g. `encrypt-resource`.
    pub resource_type: String,
    /// Encrypted business payload.
    pub resource: EncryptedResource,
    /// Platform summary text.
    #[serde(default)]
    pub summary: String,
}

/// A notification whose signature has been verified.
#[derive(Debug, Clone)]
pub struct VerifiedNotification {
    notification: Notification,
    api_v3_key: Arc<ApiV3Key>,
}

impl VerifiedNotification {
    /// The envelope.
    #[must_use]
    pub const fn notification(&self) -> &Notification {
        &self.notification
    }

    /// Notification id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.notification.id
    }

    /// Event kind.
    #[must_use]
    pub const fn event_type(&self) -> &EventType {
        &self.notification.event_type
    }

    /// Decrypted resource bytes.
    ///
    /// # Errors
    ///
    /// [`crate::GuardError::UnsupportedAlgorithm`] or
    /// [`crate::GuardError::CryptoIntegrity`].
    pub fn resource_plaintext(&self) -> Result<Vec<u8>> {
        self.notification.resource.decrypt(&self.api_v3_key)
    }

    /// Decrypts and deserializes the resource.
    ///
    /// # Errors
    ///
    /// Decryption errors, or [`crate::GuardError::Serialization`] if the
    /// payload does not match `T`.
    pub fn decrypt_resource<T: DeserializeOwned>(&self) -> Result<T> {
        self.notification.resource.decrypt_json(&self.api_v3_key)
    }
}

/// Verifies and parses incoming notifications.
#[derive(Debug, Clone)]
pub struct NotificationParser {
    verifier: ResponseVerifier,
    api_v3_key: Arc<ApiV3Key>,
}

impl NotificationParser {
    /// Creates a parser over the shared certificate store behind `verifier`.
    #[must_use]
    pub const fn new(verifier: ResponseVerifier, api_v3_key: Arc<ApiV3Key>) -> Self {
        Self { verifier, api_v3_key }
    }

    /// Verifies `body` against `headers`, then parses the envelope.
    ///
    /// # Errors
    ///
    /// [`crate::GuardError::TrustFailure`] if verification fails (the body is
    /// not parsed), [`crate::GuardError::Serialization`] if the verified body
    /// is not an envelope.
    #[instrument(skip_all, fields(body_len = body.len()))]
    pub fn parse(&self, headers: &ResponseHeaders, body: &[u8]) -> Result<VerifiedNotification> {
        self.verifier.verify_headers(headers, body)?;
        let notification: Notification = serde_json::from_slice(body)?;
        info!(id = %notification.id, event_type = %notification.event_type, "notification verified");
        Ok(VerifiedNotification { notification, api_v3_key: Arc::clone(&self.api_v3_key) })
    }
}

/// Body the merchant returns to acknowledge a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAck {
    /// `SUCCESS` or `FAIL`.
    pub code: &'static str,
    /// Free text; required by the platform on failure.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl NotificationAck {
    /// Acknowledges receipt.
    #[must_use]
    pub const fn success() -> Self {
        Self { code: "SUCCESS", message: String::new() }
    }

    /// Asks the platform to redeliver later.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self { code: "FAIL", message: message.into() }
    }
}
