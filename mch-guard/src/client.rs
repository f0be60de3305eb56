//! Merchant API client.
//!
//! [`MerchantClient`] is what endpoint wrappers talk to. It owns the signer,
//! the shared certificate store and its rotator, the API v3 key and a
//! [`Transport`], and offers the handful of operations a wrapper needs:
//!
//! - [`MerchantClient::signed_call`]: sign, send, verify, return the body.
//! - [`MerchantClient::encrypt_field`] / [`MerchantClient::decrypt_field`]
//!   for PII fields.
//! - [`MerchantClient::decrypt_resource`] for encrypted resources.
//! - [`MerchantClient::refresh_certificates`] to bootstrap or rotate the
//!   platform certificates.
//!
//! # Examples
//!
//! ```rust,no_run
//! use mch_guard::{MerchantClient, config::ClientConfig};
//!
//! # async fn example() -> mch_guard::Result<()> {
//! let config = ClientConfig::from_file("mch.toml".as_ref())?;
//! let client = MerchantClient::from_config(config)?;
//! client.refresh_certificates(None).await?;
//!
//! let body = client
//!     .signed_call("GET", "/v3/merchant/fund/balance/BASIC", &[], None, None)
//!     .await?;
//! println!("{}", String::from_utf8_lossy(&body));
//! # Ok(())
//! # }
//! ```

#[allow(
    redundant_imports,
    reason = "Future needed for generic bounds despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::{fmt, sync::Arc};

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::{Position, Url};

use crate::{
    auth::{RequestSigner, ResponseVerifier, build_path_with_query},
    certs::{
        CERTIFICATES_PATH, CertificateRotator, CertificateSnapshot, CertificateStore, RotationState,
    },
    cipher::{self, ApiV3Key, EncryptedResource},
    config::ClientConfig,
    credential::Credential,
    error::{GuardError, PlatformError, Result},
    notify::NotificationParser,
    transport::{ApiRequest, HttpTransport, Transport, TransportResponse},
};

/// A field encrypted for the platform, with the serial of the certificate
/// whose key was used.
///
/// The serial must be sent as `Wechatpay-Serial` on the request carrying the
/// ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedField {
    /// Base64 RSA-OAEP ciphertext.
    pub ciphertext: String,
    /// Platform certificate serial.
    pub serial_no: String,
}

/// Client for the merchant API security layer.
pub struct MerchantClient<T = HttpTransport> {
    config: ClientConfig,
    base_url: String,
    signer: RequestSigner,
    verifier: ResponseVerifier,
    rotator: CertificateRotator,
    api_v3_key: Arc<ApiV3Key>,
    transport: T,
}

impl MerchantClient<HttpTransport> {
    /// Builds a client with the reqwest transport, loading the private key
    /// and API v3 key as the configuration describes.
    ///
    /// # Errors
    ///
    /// Configuration, key material and transport construction errors.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let credential = config.load_credential()?;
        let api_v3_key = config.load_api_v3_key()?;
        let transport = HttpTransport::with_config(&config.http)?;
        Self::new(config, credential, api_v3_key, transport)
    }
}

impl<T: Transport> MerchantClient<T> {
    /// Creates a client with an empty certificate store.
    ///
    /// Call [`MerchantClient::refresh_certificates`] before the first
    /// [`MerchantClient::signed_call`]; until then every response fails
    /// verification.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ConfigError`] if the configuration is invalid or
    /// names a different merchant or certificate than `credential`.
    pub fn new(
        config: ClientConfig,
        credential: Credential,
        api_v3_key: ApiV3Key,
        transport: T,
    ) -> Result<Self> {
        config.validate()?;
        if credential.merchant_id() != config.merchant_id
            || credential.serial_no() != config.certificate_serial_no
        {
            return Err(GuardError::ConfigError(
                "credential does not match merchant_id/certificate_serial_no".to_owned(),
            ));
        }

        let store = Arc::new(CertificateStore::new());
        let base_url = config.base_url.trim_end_matches('/').to_owned();
        Ok(Self {
            base_url,
            signer: RequestSigner::new(credential),
            verifier: ResponseVerifier::new(Arc::clone(&store)),
            rotator: CertificateRotator::new(store, api_v3_key.clone()),
            api_v3_key: Arc::new(api_v3_key),
            transport,
            config,
        })
    }

    /// Configuration the client was built from.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Read-only view of the platform certificates currently in effect.
    ///
    /// The snapshot never changes; call again after a refresh to see the new
    /// set. Certificates are only ever published through
    /// [`MerchantClient::refresh_certificates`], which keeps
    /// [`MerchantClient::rotation_state`] in step with the store.
    #[must_use]
    pub fn certificates(&self) -> Arc<CertificateSnapshot> {
        self.rotator.store().snapshot()
    }

    /// Phase of the certificate rotator.
    #[must_use]
    pub fn rotation_state(&self) -> RotationState {
        self.rotator.state()
    }

    /// Sends a signed request and returns the verified response body.
    ///
    /// `query` pairs are form-urlencoded in the given order and appended to
    /// `path`. Bytes in `path` that are not URL-safe (spaces, non-ASCII) are
    /// percent-encoded once, and the resulting path and query are both signed
    /// and sent. The body is returned only after its signature has been
    /// verified against the certificate store.
    ///
    /// # Errors
    ///
    /// - [`GuardError::InvalidInput`] for a malformed method or path, including
    ///   a path with a `#` fragment.
    /// - [`GuardError::Platform`] for a non-2xx response.
    /// - [`GuardError::TrustFailure`] if the response does not verify.
    /// - [`GuardError::Timeout`] if `deadline` passes first.
    /// - Transport errors.
    pub async fn signed_call(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&[u8]>,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>> {
        self.call(method, path, query, body, None, deadline).await
    }

    /// Like [`MerchantClient::signed_call`], additionally sending
    /// `Wechatpay-Serial` for a body that carries encrypted fields.
    ///
    /// # Errors
    ///
    /// Same as [`MerchantClient::signed_call`].
    pub async fn signed_call_with_serial(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&[u8]>,
        platform_serial: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>> {
        self.call(method, path, query, body, Some(platform_serial), deadline).await
    }

    #[instrument(skip(self, query, body, platform_serial, deadline), fields(status = tracing::field::Empty))]
    async fn call(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&[u8]>,
        platform_serial: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>> {
        let path_with_query = build_path_with_query(path, query);
        let response = with_deadline(
            deadline,
            self.send(method, &path_with_query, body, platform_serial),
        )
        .await?;
        tracing::Span::current().record("status", response.status);

        let response = ensure_success(response)?;
        let headers = response.verification_headers();
        if let Err(e) = self.verifier.verify_headers(&headers, &response.body) {
            warn!(error = %e, serial = ?headers.serial_no, "response discarded");
            return Err(e);
        }
        Ok(response.body)
    }

    /// Sends a signed request and returns the body without verifying it.
    ///
    /// Only for the certificate list, which must be fetched before any
    /// platform key is trusted.
    pub(crate) async fn unverified_call(&self, method: &str, path: &str) -> Result<Vec<u8>> {
        let response = self.send(method, path, None, None).await?;
        ensure_success(response).map(|response| response.body)
    }

    async fn send(
        &self,
        method: &str,
        path_with_query: &str,
        body: Option<&[u8]>,
        platform_serial: Option<&str>,
    ) -> Result<TransportResponse> {
        let url = self.request_url(path_with_query)?;
        let authorization =
            self.signer.authorize(method, &url[Position::BeforePath..Position::AfterQuery], body)?;
        let mut request = ApiRequest::new(method, String::from(url), authorization.header_value());
        if let Some(body) = body {
            request = request.with_body(body.to_vec());
        }
        if let Some(serial) = platform_serial {
            request = request.with_platform_serial(serial);
        }
        self.transport.execute(request).await
    }

    /// Parses the request URL the way the transport will, so the signed path
    /// is the serialized, percent-encoded one.
    fn request_url(&self, path_with_query: &str) -> Result<Url> {
        if !path_with_query.starts_with('/') {
            return Err(GuardError::InvalidInput("path must start with '/'".to_owned()));
        }
        let url = Url::parse(&format!("{}{path_with_query}", self.base_url))
            .map_err(|e| GuardError::InvalidInput(format!("invalid request path: {e}")))?;
        if url.fragment().is_some() {
            return Err(GuardError::InvalidInput("path must not contain a fragment".to_owned()));
        }
        Ok(url)
    }

    /// Downloads, decrypts and publishes the platform certificate list.
    ///
    /// Returns the new store generation. On any failure, including the
    /// deadline passing mid-rotation, the previous certificate set stays in
    /// effect.
    ///
    /// # Errors
    ///
    /// Transport, platform, integrity and key material errors, or
    /// [`GuardError::Timeout`].
    #[instrument(skip_all)]
    pub async fn refresh_certificates(&self, deadline: Option<Instant>) -> Result<u64> {
        let rotation = self.rotator.rotate(|| self.unverified_call("GET", CERTIFICATES_PATH));
        let generation = with_deadline(deadline, rotation).await?;
        info!(generation, "platform certificates refreshed");
        Ok(generation)
    }

    /// Encrypts `plaintext` for the platform.
    ///
    /// Uses the configured `platform_serial_no` certificate, or the newest
    /// loaded one when none is configured.
    ///
    /// # Errors
    ///
    /// [`GuardError::CertificateUnavailable`] if the certificate is not
    /// loaded, [`GuardError::InvalidInput`] if `plaintext` exceeds the OAEP
    /// capacity.
    pub fn encrypt_field(&self, plaintext: &str) -> Result<EncryptedField> {
        let snapshot = self.certificates();
        let certificate = match &self.config.platform_serial_no {
            Some(serial) => snapshot.get(serial).ok_or_else(|| {
                GuardError::CertificateUnavailable(format!("platform certificate {serial} not loaded"))
            })?,
            None => snapshot.newest().ok_or_else(|| {
                GuardError::CertificateUnavailable("no platform certificate loaded".to_owned())
            })?,
        };
        let ciphertext = cipher::encrypt_field(plaintext, certificate.public_key())?;
        debug!(serial = certificate.serial_no(), "field encrypted");
        Ok(EncryptedField { ciphertext, serial_no: certificate.serial_no().to_owned() })
    }

    /// Decrypts a field the platform encrypted with the merchant public key.
    ///
    /// # Errors
    ///
    /// [`GuardError::CryptoIntegrity`] for malformed or tampered input.
    pub fn decrypt_field(&self, ciphertext_b64: &str) -> Result<String> {
        cipher::decrypt_field(ciphertext_b64, self.signer.credential().private_key())
    }

    /// Decrypts an encrypted resource with the API v3 key.
    ///
    /// # Errors
    ///
    /// [`GuardError::UnsupportedAlgorithm`] or [`GuardError::CryptoIntegrity`].
    pub fn decrypt_resource(&self, resource: &EncryptedResource) -> Result<Vec<u8>> {
        resource.decrypt(&self.api_v3_key)
    }

    /// Parser for notifications, sharing this client's certificate store.
    #[must_use]
    pub fn notification_parser(&self) -> NotificationParser {
        NotificationParser::new(self.verifier.clone(), Arc::clone(&self.api_v3_key))
    }
}

impl<T> fmt::Debug for MerchantClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerchantClient")
            .field("merchant_id", &self.config.merchant_id)
            .field("base_url", &self.base_url)
            .field("certificates", &self.rotator.store().serials())
            .field("rotation_state", &self.rotator.state())
            .finish_non_exhaustive()
    }
}

fn ensure_success(response: TransportResponse) -> Result<TransportResponse> {
    if response.is_success() {
        return Ok(response);
    }
    let error = PlatformError::from_body(response.status, &response.body);
    warn!(status = error.status, code = %error.code, "platform returned an error");
    Err(GuardError::Platform(error))
}

async fn with_deadline<F, O>(deadline: Option<Instant>, fut: F) -> Result<O>
where
    F: Future<Output = Result<O>>,
{
    match deadline {
        Some(deadline) => {
            tokio::time::timeout_at(deadline, fut).await.map_err(|_| GuardError::Timeout)?
        }
        None => fut.await,
    }
}
