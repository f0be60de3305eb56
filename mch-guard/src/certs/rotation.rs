//! Certificate bootstrap and rotation.
//!
//! ```text
//! EMPTY ──► FETCHING ──► DECRYPTING ──► READY
//!              ▲                          │
//!              └──────────────────────────┘
//! ```
//!
//! Any failure (or cancellation) returns the state to where it started and
//! leaves the previous snapshot in effect. A set is published only when
//! every entry decrypted and parsed.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    certs::{CertificateStore, PlatformCertificate},
    cipher::{ApiV3Key, EncryptedResource},
    error::{GuardError, Result},
};

/// Path of the platform certificate list endpoint.
pub const CERTIFICATES_PATH: &str = "/v3/certificates";

/// Phase of the bootstrap/rotation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RotationState {
    /// No certificate has ever been published.
    Empty = 0,
    /// Downloading the encrypted certificate list.
    Fetching = 1,
    /// Decrypting and parsing the downloaded entries.
    Decrypting = 2,
    /// A certificate set is published.
    Ready = 3,
}

impl RotationState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Fetching,
            2 => Self::Decrypting,
            3 => Self::Ready,
            _ => Self::Empty,
        }
    }
}

/// One entry of the certificate list response.
#[derive(Debug, Clone, Deserialize)]
pub struct EncryptedCertificate {
    /// Serial the platform declares for this certificate.
    pub serial_no: String,
    /// Declared start of validity (RFC 3339).
    #[serde(default)]
    pub effective_time: String,
    /// Declared end of validity (RFC 3339).
    #[serde(default)]
    pub expire_time: String,
    /// PEM certificate encrypted under the API v3 key.
    pub encrypt_certificate: EncryptedResource,
}

#[derive(Debug, Deserialize)]
struct CertificateList {
    data: Vec<EncryptedCertificate>,
}

/// Decrypts and parses a raw certificate list body.
///
/// All-or-nothing: the first failing entry aborts the whole list.
///
/// # Errors
///
/// - [`GuardError::Serialization`] if the body is not the expected JSON.
/// - [`GuardError::UnsupportedAlgorithm`] or [`GuardError::CryptoIntegrity`]
///   from the GCM step.
/// - [`GuardError::KeyMaterial`] if the list is empty, a plaintext is not a
///   usable certificate, or the declared serial does not match the parsed
///   one.
pub fn decode_certificate_list(body: &[u8], key: &ApiV3Key) -> Result<Vec<PlatformCertificate>> {
    let list: CertificateList = serde_json::from_slice(body)?;
    if list.data.is_empty() {
        return Err(GuardError::KeyMaterial("platform certificate list is empty".to_owned()));
    }

    list.data
        .iter()
        .map(|entry| {
            let plaintext = entry.encrypt_certificate.decrypt(key)?;
            let pem = std::str::from_utf8(&plaintext).map_err(|_| {
                GuardError::KeyMaterial(format!("certificate {} is not PEM text", entry.serial_no))
            })?;
            let cert = PlatformCertificate::from_pem(pem)?;
            if !cert.serial_no().eq_ignore_ascii_case(entry.serial_no.trim()) {
                return Err(GuardError::KeyMaterial(format!(
                    "declared serial {} does not match certificate serial {}",
                    entry.serial_no,
                    cert.serial_no()
                )));
            }
            debug!(serial_no = cert.serial_no(), expire_time = %cert.expire_time(), "certificate decrypted");
            Ok(cert)
        })
        .collect()
}

/// Drives certificate rotation into a shared [`CertificateStore`].
///
/// Rotations are serialized; readers of the store are never blocked.
pub struct CertificateRotator {
    store: Arc<CertificateStore>,
    api_v3_key: ApiV3Key,
    state: AtomicU8,
    writer: Mutex<()>,
}

impl fmt::Debug for CertificateRotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRotator")
            .field("state", &self.state())
            .field("generation", &self.store.generation())
            .finish_non_exhaustive()
    }
}

impl CertificateRotator {
    /// Creates a rotator publishing into `store`.
    #[must_use]
    pub fn new(store: Arc<CertificateStore>, api_v3_key: ApiV3Key) -> Self {
        let initial = if store.is_empty() { RotationState::Empty } else { RotationState::Ready };
        Self { store, api_v3_key, state: AtomicU8::new(initial as u8), writer: Mutex::new(()) }
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> RotationState {
        RotationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Store this rotator publishes into.
    #[must_use]
    pub const fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    /// Newest certificate of the published set, for diagnostics.
    #[must_use]
    pub fn newest(&self) -> Option<Arc<PlatformCertificate>> {
        self.store.newest()
    }

    /// Runs one rotation and returns the new store generation.
    ///
    /// `fetch` downloads the raw certificate list body. It runs without
    /// response verification since no key may be trusted yet.
    ///
    /// # Errors
    ///
    /// Any error from `fetch` or [`decode_certificate_list`]. The previous
    /// snapshot stays in effect.
    #[instrument(skip_all, fields(from = ?self.state()))]
    pub async fn rotate<F, Fut>(&self, fetch: F) -> Result<u64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let _writer = self.writer.lock().await;
        let mut phase = PhaseGuard::new(self);

        phase.enter(RotationState::Fetching);
        let body = fetch().await?;

        phase.enter(RotationState::Decrypting);
        let certificates = decode_certificate_list(&body, &self.api_v3_key)?;
        let generation = self.store.replace_all(certificates)?;

        phase.commit();
        info!(generation, serials = ?self.store.serials(), "certificate rotation complete");
        Ok(generation)
    }

    fn set_state(&self, state: RotationState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Restores the starting state unless the rotation committed, including
/// when the rotation future is dropped mid-way.
struct PhaseGuard<'a> {
    rotator: &'a CertificateRotator,
    restore: RotationState,
    committed: bool,
}

impl<'a> PhaseGuard<'a> {
    fn new(rotator: &'a CertificateRotator) -> Self {
        let restore =
            if rotator.store.is_empty() { RotationState::Empty } else { RotationState::Ready };
        Self { rotator, restore, committed: false }
    }

    fn enter(&mut self, state: RotationState) {
        debug!(?state, "rotation phase");
        self.rotator.set_state(state);
    }

    fn commit(&mut self) {
        self.committed = true;
        self.rotator.set_state(RotationState::Ready);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            warn!(restore = ?self.restore, "certificate rotation aborted");
            self.rotator.set_state(self.restore);
        }
    }
}
