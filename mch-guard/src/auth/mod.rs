//! Request authentication and response verification.
//!
//! Every outbound API call carries an `Authorization` header whose signature
//! covers the request line, a timestamp, a nonce and the body. Every inbound
//! response and notification carries `Wechatpay-*` headers whose signature
//! covers the timestamp, the nonce and the raw body, produced with the key of
//! one platform certificate.
//!
//! # Canonical Strings
//!
//! Outbound (signed with the merchant private key):
//!
//! ```text
//! {METHOD}\n{path?query}\n{timestamp}\n{nonce}\n{body}\n
//! ```
//!
//! Inbound (verified with a platform public key, selected by serial):
//!
//! ```text
//! {timestamp}\n{nonce}\n{body}\n
//! ```
//!
//! Both are hashed with SHA-256 and signed with RSA PKCS#1 v1.5. The
//! signature is base64 (standard alphabet, padded).
//!
//! # Examples
//!
//! ```rust
//! use mch_guard::auth::{RequestSigner, SigningContext};
//! # use mch_guard::credential::Credential;
//!
//! # fn example(credential: Credential) -> mch_guard::Result<()> {
//! let signer = RequestSigner::new(credential);
//!
//! let auth = signer.authorize("GET", "/v3/certificates", None)?;
//! let header = auth.header_value();
//! assert!(header.starts_with("WECHATPAY2-SHA256-RSA2048 mchid="));
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod signer;
pub mod verifier;


pub use canonical::{
    SigningContext, VerificationContext, build_path_with_query, generate_nonce, is_wire_safe_path,
    unix_timestamp,
};
pub use signer::{Authorization, RequestSigner, sign};
pub use verifier::{ResponseHeaders, ResponseVerifier};

/// Authorization scheme of the outbound header.
pub const AUTH_SCHEME: &str = "WECHATPAY2-SHA256-RSA2048";

/// Response/notification header carrying the signing timestamp.
pub const HEADER_TIMESTAMP: &str = "Wechatpay-Timestamp";

/// Response/notification header carrying the nonce.
pub const HEADER_NONCE: &str = "Wechatpay-Nonce";

/// Response/notification header carrying the base64 signature.
pub const HEADER_SIGNATURE: &str = "Wechatpay-Signature";

/// Header naming the platform certificate serial (inbound: which key signed;
/// outbound: which key encrypted sensitive fields).
pub const HEADER_SERIAL: &str = "Wechatpay-Serial";

/// Minimum nonce length accepted by [`SigningContext`].
pub const MIN_NONCE_LEN: usize = 8;
