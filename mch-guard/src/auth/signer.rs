//! Outbound request signing.

use std::fmt;

use base64::Engine;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::{
    auth::{
        AUTH_SCHEME,
        canonical::{SigningContext, generate_nonce, unix_timestamp},
    },
    credential::Credential,
    error::{GuardError, Result},
};

/// Signs outbound API requests with the merchant private key.
///
/// Cheap to clone; holds the immutable [`Credential`].
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credential: Credential,
}

impl RequestSigner {
    /// Creates a signer for `credential`.
    #[must_use]
    pub const fn new(credential: Credential) -> Self {
        Self { credential }
    }

    /// Credential this signer uses.
    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Signs the canonical bytes of `ctx` and returns the base64 signature.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::KeyMaterial`] if the RSA operation fails.
    #[instrument(skip(self, ctx), fields(method = ctx.method, path = ctx.path_with_query))]
    pub fn sign(&self, ctx: &SigningContext<'_>) -> Result<String> {
        sign_canonical(&ctx.canonical_bytes(), self.credential.private_key())
    }

    /// Builds the `Authorization` header for one request.
    ///
    /// A fresh nonce and the current timestamp are generated on every call.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidInput`] for a malformed method or path and
    /// [`GuardError::KeyMaterial`] if signing fails.
    pub fn authorize(
        &self,
        method: &str,
        path_with_query: &str,
        body: Option<&[u8]>,
    ) -> Result<Authorization> {
        let nonce = generate_nonce();
        let timestamp = unix_timestamp()?;
        self.authorize_with(method, path_with_query, timestamp, &nonce, body)
    }

    /// Builds the `Authorization` header with a caller-chosen timestamp and
    /// nonce.
    ///
    /// # Errors
    ///
    /// Same as [`RequestSigner::authorize`], plus [`GuardError::InvalidInput`]
    /// for a nonce that is too short or not alphanumeric.
    pub fn authorize_with(
        &self,
        method: &str,
        path_with_query: &str,
        timestamp: u64,
        nonce: &str,
        body: Option<&[u8]>,
    ) -> Result<Authorization> {
        let ctx = SigningContext::new(method, path_with_query, timestamp, nonce, body)?;
        let signature = self.sign(&ctx)?;
        debug!(timestamp, body_len = body.map_or(0, <[u8]>::len), "request signed");

        Ok(Authorization {
            merchant_id: self.credential.merchant_id().to_owned(),
            nonce: nonce.to_owned(),
            serial_no: self.credential.serial_no().to_owned(),
            timestamp,
            signature,
        })
    }
}

/// The fields of one `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Merchant id.
    pub merchant_id: String,
    /// Nonce covered by the signature.
    pub nonce: String,
    /// Merchant certificate serial.
    pub serial_no: String,
    /// Timestamp covered by the signature.
    pub timestamp: u64,
    /// Base64 signature.
    pub signature: String,
}

impl Authorization {
    /// Renders the header value.
    ///
    /// Field order is fixed: `mchid`, `nonce_str`, `serial_no`, `timestamp`,
    /// `signature`.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!(
            r#"{AUTH_SCHEME} mchid="{}",nonce_str="{}",serial_no="{}",timestamp="{}",signature="{}""#,
            self.merchant_id, self.nonce, self.serial_no, self.timestamp, self.signature
        )
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("merchant_id", &self.merchant_id)
            .field("nonce", &self.nonce)
            .field("serial_no", &self.serial_no)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// Signs one request without a [`RequestSigner`].
///
/// Returns the base64 RSA PKCS#1 v1.5 / SHA-256 signature over the outbound
/// canonical string.
///
/// # Errors
///
/// Returns [`GuardError::InvalidInput`] for malformed inputs and
/// [`GuardError::KeyMaterial`] if the RSA operation fails.
///
/// # Examples
///
/// ```no_run
/// use mch_guard::{auth::sign, credential::parse_private_key_pem};
///
/// let key = parse_private_key_pem(&std::fs::read_to_string("apiclient_key.pem")?)?;
/// let signature = sign("GET", "/v3/certificates", 1700000000, "abc12345xy", None, &key)?;
/// assert!(!signature.is_empty());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn sign(
    method: &str,
    path_with_query: &str,
    timestamp: u64,
    nonce: &str,
    body: Option<&[u8]>,
    private_key: &RsaPrivateKey,
) -> Result<String> {
    let ctx = SigningContext::new(method, path_with_query, timestamp, nonce, body)?;
    sign_canonical(&ctx.canonical_bytes(), private_key)
}

fn sign_canonical(canonical: &[u8], private_key: &RsaPrivateKey) -> Result<String> {
    let digest = Sha256::digest(canonical);
    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| GuardError::KeyMaterial(format!("RSA signing failed: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(signature))
}
