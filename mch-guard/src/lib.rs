//! mch-guard: the security layer of a merchant payment API client.
//!
//! Every call to the platform's v3 API is authenticated with an RSA-2048
//! signature over a canonical form of the request, and every response and
//! notification carries a platform signature that must verify before the
//! body is trusted. Platform verification keys arrive as X.509 certificates,
//! encrypted with the merchant's API v3 key, and rotate over time. Sensitive
//! fields travel RSA-OAEP encrypted. This crate implements exactly that core
//! and nothing of the per-endpoint request shapes built on top of it.
//!
//! # Architecture
//!
//! ```text
//!  endpoint wrappers (out of scope)
//!          │ signed_call / encrypt_field / decrypt_field / decrypt_resource
//! ┌────────▼──────────────────────────────────────────────┐
//! │ MerchantClient                                        │
//! │  ┌────────────┐  ┌─────────────┐  ┌────────────────┐  │
//! │  │ auth       │  │ certs       │  │ cipher         │  │
//! │  │ canonical  │  │ store (swap)│  │ OAEP / GCM     │  │
//! │  │ sign/verify│◄─┤ rotation    │  │                │  │
//! │  └────────────┘  └─────────────┘  └────────────────┘  │
//! └────────┬──────────────────────────────────────────────┘
//!          │ Transport (reqwest by default, pluggable)
//!          ▼
//!     platform HTTPS API
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mch_guard::{MerchantClient, config::ClientConfig};
//!
//! # async fn example() -> mch_guard::Result<()> {
//! let config = ClientConfig::from_file("mch.toml".as_ref())?;
//! let client = MerchantClient::from_config(config)?;
//!
//! // Bootstrap platform certificates before the first verified call.
//! client.refresh_certificates(None).await?;
//!
//! let field = client.encrypt_field("13800138000")?;
//! let body = format!(r#"{{"phone":"{}"}}"#, field.ciphertext);
//! let verified = client
//!     .signed_call_with_serial("POST", "/v3/applyment4sub/applyment/", &[], Some(body.as_bytes()), &field.serial_no, None)
//!     .await?;
//! # let _ = verified;
//! # Ok(())
//! # }
//! ```
//!
//! Signing on its own:
//!
//! ```rust,no_run
//! use mch_guard::{auth::RequestSigner, credential::Credential};
//!
//! # fn example(pem: &str) -> mch_guard::Result<()> {
//! let credential = Credential::from_pem("1900000001", "5157F09EFDC096DE", pem)?;
//! let signer = RequestSigner::new(credential);
//! let authorization = signer.authorize("GET", "/v3/certificates", None)?;
//! println!("Authorization: {}", authorization.header_value());
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`]: canonical strings, request signing, response verification.
//! - [`certs`]: platform certificates, the snapshot store and rotation.
//! - [`cipher`]: RSA-OAEP field encryption and AES-256-GCM resources.
//! - [`notify`]: verified webhook notifications.
//! - [`transport`]: the HTTP seam.
//! - [`client`]: [`MerchantClient`], tying the above together.
//! - [`config`], [`credential`], [`error`].
//!
//! # Security Considerations
//!
//! - Response bodies are verified on the exact bytes received, before any
//!   JSON decoding. A body that fails verification is never returned.
//! - Certificate rotation publishes a complete set atomically. Readers never
//!   block and never see a partial set; a failed rotation leaves the previous
//!   set in effect.
//! - Private keys and the API v3 key never appear in `Debug` output or logs.
//!   The API v3 key is zeroized on drop.
//! - Nothing is retried inside the crate.
//!
//! # Error Handling
//!
//! All operations return [`Result`]. See [`GuardError`] for how each
//! category should be handled.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and the RustCrypto crates"
)]

pub mod auth;
pub mod certs;
pub mod cipher;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod notify;
pub mod transport;

pub use client::{EncryptedField, MerchantClient};
pub use config::ClientConfig;
pub use credential::Credential;
pub use error::{GuardError, PlatformError, Result};
