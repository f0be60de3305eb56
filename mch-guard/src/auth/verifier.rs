//! Response and notification signature verification.

use std::sync::Arc;

use base64::Engine;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::{
    auth::{
        HEADER_NONCE, HEADER_SERIAL, HEADER_SIGNATURE, HEADER_TIMESTAMP,
        canonical::{VerificationContext, inbound_canonical},
    },
    certs::CertificateStore,
    error::{GuardError, Result},
};

/// Verification headers of one response or notification.
///
/// Values are kept exactly as received; header names are matched
/// case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    /// `Wechatpay-Timestamp`.
    pub timestamp: Option<String>,
    /// `Wechatpay-Nonce`.
    pub nonce: Option<String>,
    /// `Wechatpay-Signature`.
    pub signature: Option<String>,
    /// `Wechatpay-Serial`.
    pub serial_no: Option<String>,
}

impl ResponseHeaders {
    /// Collects the verification headers from `(name, value)` pairs.
    ///
    /// ```
    /// use mch_guard::auth::ResponseHeaders;
    ///
    /// let headers = ResponseHeaders::from_pairs([
    ///     ("wechatpay-timestamp", "1554209980"),
    ///     ("Wechatpay-Nonce", "c5ac7061fccab6bf"),
    ///     ("content-type", "application/json"),
    /// ]);
    /// assert_eq!(headers.timestamp.as_deref(), Some("1554209980"));
    /// assert!(headers.signature.is_none());
    /// ```
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let slot = if name.eq_ignore_ascii_case(HEADER_TIMESTAMP) {
                &mut headers.timestamp
            } else if name.eq_ignore_ascii_case(HEADER_NONCE) {
                &mut headers.nonce
            } else if name.eq_ignore_ascii_case(HEADER_SIGNATURE) {
                &mut headers.signature
            } else if name.eq_ignore_ascii_case(HEADER_SERIAL) {
                &mut headers.serial_no
            } else {
                continue;
            };
            *slot = Some(value.to_owned());
        }
        headers
    }

    /// Borrows the headers as a [`VerificationContext`] over `body`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::TrustFailure`] naming the first missing header.
    pub fn context<'a>(&'a self, body: &'a [u8]) -> Result<VerificationContext<'a>> {
        Ok(VerificationContext {
            timestamp: required(self.timestamp.as_deref(), HEADER_TIMESTAMP)?,
            nonce: required(self.nonce.as_deref(), HEADER_NONCE)?,
            serial_no: required(self.serial_no.as_deref(), HEADER_SERIAL)?,
            signature: required(self.signature.as_deref(), HEADER_SIGNATURE)?,
            body,
        })
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GuardError::TrustFailure(format!("missing {name} header")))
}

/// Verifies platform signatures against the shared [`CertificateStore`].
///
/// The key is selected by exact serial match. An unknown serial is a trust
/// failure; the verifier never fetches certificates on its own.
#[derive(Debug, Clone)]
pub struct ResponseVerifier {
    store: Arc<CertificateStore>,
}

impl ResponseVerifier {
    /// Creates a verifier reading from `store`.
    #[must_use]
    pub const fn new(store: Arc<CertificateStore>) -> Self {
        Self { store }
    }

    /// Store this verifier reads from.
    #[must_use]
    pub const fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    /// Returns true only if `signature_b64` is a valid signature over
    /// `timestamp\nnonce\nbody\n` by the certificate `serial_no`.
    ///
    /// Unknown serials, malformed base64 and mismatches all yield `false`.
    #[must_use]
    pub fn verify(
        &self,
        timestamp: &str,
        nonce: &str,
        body: &[u8],
        serial_no: &str,
        signature_b64: &str,
    ) -> bool {
        self.check(timestamp, nonce, body, serial_no, signature_b64).is_ok()
    }

    /// Verifies a response using its headers.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::TrustFailure`] if a header is missing, the
    /// serial is unknown, or the signature does not match. The body must
    /// then be discarded.
    #[instrument(skip(self, headers, body), fields(serial_no = headers.serial_no.as_deref(), body_len = body.len()))]
    pub fn verify_headers(&self, headers: &ResponseHeaders, body: &[u8]) -> Result<()> {
        let ctx = headers.context(body)?;
        self.check(ctx.timestamp, ctx.nonce, ctx.body, ctx.serial_no, ctx.signature)
            .map_err(|reason| {
                warn!(serial_no = ctx.serial_no, reason, "signature rejected");
                GuardError::TrustFailure(format!("{reason} (serial {})", ctx.serial_no))
            })?;
        debug!("signature verified");
        Ok(())
    }

    fn check(
        &self,
        timestamp: &str,
        nonce: &str,
        body: &[u8],
        serial_no: &str,
        signature_b64: &str,
    ) -> std::result::Result<(), &'static str> {
        let certificate = self.store.get(serial_no).ok_or("unknown platform certificate")?;
        verify_signature(
            certificate.public_key(),
            &inbound_canonical(timestamp, nonce, body),
            signature_b64,
        )
    }
}

/// Checks a base64 PKCS#1 v1.5 / SHA-256 signature over `canonical`.
pub(crate) fn verify_signature(
    public_key: &RsaPublicKey,
    canonical: &[u8],
    signature_b64: &str,
) -> std::result::Result<(), &'static str> {
    let signature = base64::engine::general_purpose::STANDARD
        .decode(signature_b64.trim())
        .map_err(|_| "malformed signature encoding")?;
    let digest = Sha256::digest(canonical);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|_| "signature mismatch")
}

#[cfg(test)]
mod tests {
    use rsa::RsaPrivateKey;

    use super::*;
    use crate::{
        certs::PlatformCertificate,
        credential::test_keys::{
            PLATFORM_A_CERT, PLATFORM_A_SERIAL, PLATFORM_B_CERT, platform_a_key, platform_b_key,
        },
    };

    fn store_with(certs: &[&str]) -> Arc<CertificateStore> {
        let store = CertificateStore::new();
        store
            .replace_all(certs.iter().map(|pem| PlatformCertificate::from_pem(pem).unwrap()).collect())
            .unwrap();
        Arc::new(store)
    }

    fn platform_sign(key: &RsaPrivateKey, timestamp: &str, nonce: &str, body: &[u8]) -> String {
        let digest = Sha256::digest(inbound_canonical(timestamp, nonce, body));
        let sig = key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();
        base64::engine::general_purpose::STANDARD.encode(sig)
    }

    #[test]
    fn test_verify_valid_signature() {
        let verifier = ResponseVerifier::new(store_with(&[PLATFORM_A_CERT]));
        let body = br#"{"code":"SUCCESS"}"#;
        let sig = platform_sign(&platform_a_key(), "1554209980", "c5ac7061fccab6bf", body);

        assert!(verifier.verify("1554209980", "c5ac7061fccab6bf", body, PLATFORM_A_SERIAL, &sig));
    }

    #[test]
    fn test_unknown_serial_is_false_even_for_valid_signature() {
        let verifier = ResponseVerifier::new(store_with(&[PLATFORM_A_CERT]));
        let sig = platform_sign(&platform_a_key(), "1", "abcdefgh", b"{}");

        assert!(!verifier.verify("1", "abcdefgh", b"{}", "S2", &sig));
    }

    #[test]
    fn test_wrong_key_for_serial_is_false() {
        let verifier = ResponseVerifier::new(store_with(&[PLATFORM_A_CERT, PLATFORM_B_CERT]));
        let sig = platform_sign(&platform_b_key(), "1", "abcdefgh", b"{}");

        assert!(!verifier.verify("1", "abcdefgh", b"{}", PLATFORM_A_SERIAL, &sig));
    }

    #[test]
    fn test_malformed_base64_is_false() {
        let verifier = ResponseVerifier::new(store_with(&[PLATFORM_A_CERT]));
        assert!(!verifier.verify("1", "abcdefgh", b"{}", PLATFORM_A_SERIAL, "!!not base64!!"));
    }

    #[test]
    fn test_empty_store_rejects_everything() {
        let verifier = ResponseVerifier::new(Arc::new(CertificateStore::new()));
        let sig = platform_sign(&platform_a_key(), "1", "abcdefgh", b"{}");
        assert!(!verifier.verify("1", "abcdefgh", b"{}", PLATFORM_A_SERIAL, &sig));
    }

    #[test]
    fn test_verify_headers_reports_missing_header() {
        let verifier = ResponseVerifier::new(store_with(&[PLATFORM_A_CERT]));
        let headers = ResponseHeaders::from_pairs([
            ("Wechatpay-Timestamp", "1"),
            ("Wechatpay-Nonce", "abcdefgh"),
            ("Wechatpay-Serial", PLATFORM_A_SERIAL),
        ]);

        let err = verifier.verify_headers(&headers, b"{}").unwrap_err();
        assert!(matches!(err, GuardError::TrustFailure(ref m) if m.contains("Wechatpay-Signature")));
    }

    #[test]
    fn test_verify_headers_accepts_lowercase_names() {
        let verifier = ResponseVerifier::new(store_with(&[PLATFORM_A_CERT]));
        let body = b"{\"data\":[]}";
        let sig = platform_sign(&platform_a_key(), "1700000000", "noncenonce", body);
        let headers = ResponseHeaders::from_pairs([
            ("wechatpay-timestamp", "1700000000"),
            ("wechatpay-nonce", "noncenonce"),
            ("wechatpay-serial", PLATFORM_A_SERIAL),
            ("wechatpay-signature", sig.as_str()),
        ]);

        verifier.verify_headers(&headers, body).unwrap();
    }

    #[test]
    fn test_verify_headers_mismatch_is_trust_failure() {
        let verifier = ResponseVerifier::new(store_with(&[PLATFORM_A_CERT]));
        let sig = platform_sign(&platform_a_key(), "1700000000", "noncenonce", b"{\"a\":1}");
        let headers = ResponseHeaders::from_pairs([
            ("Wechatpay-Timestamp", "1700000000"),
            ("Wechatpay-Nonce", "noncenonce"),
            ("Wechatpay-Serial", PLATFORM_A_SERIAL),
            ("Wechatpay-Signature", sig.as_str()),
        ]);

        let err = verifier.verify_headers(&headers, b"{\"a\":2}").unwrap_err();
        assert!(err.is_trust_failure());
    }
}
