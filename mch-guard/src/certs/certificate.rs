//! Platform certificate parsing.

use std::fmt;

use chrono::{DateTime, Utc};
use rsa::{RsaPublicKey, pkcs8::DecodePublicKey, traits::PublicKeyParts};
use x509_cert::{
    Certificate,
    der::{DecodePem, Encode},
    time::Time,
};

use crate::{
    credential::ensure_key_size,
    error::{GuardError, Result},
};

/// One platform-issued verification certificate.
///
/// Immutable once parsed. Many may coexist during a rotation overlap window;
/// lookups always select by exact serial.
#[derive(Clone, PartialEq, Eq)]
pub struct PlatformCertificate {
    serial_no: String,
    public_key: RsaPublicKey,
    effective_time: DateTime<Utc>,
    expire_time: DateTime<Utc>,
    pem: Vec<u8>,
}

impl PlatformCertificate {
    /// Parses a PEM-encoded X.509 certificate.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::KeyMaterial`] if the PEM is not a certificate,
    /// the key is not RSA, or the key is shorter than 2048 bits.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let pem = pem.trim();
        let cert = Certificate::from_pem(pem.as_bytes())
            .map_err(|e| GuardError::KeyMaterial(format!("invalid X.509 certificate: {e}")))?;
        let tbs = &cert.tbs_certificate;

        let spki = tbs
            .subject_public_key_info
            .to_der()
            .map_err(|e| GuardError::KeyMaterial(format!("invalid public key info: {e}")))?;
        let public_key = RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| GuardError::KeyMaterial(format!("certificate key is not RSA: {e}")))?;
        ensure_key_size(public_key.n().bits())?;

        Ok(Self {
            serial_no: serial_hex(tbs.serial_number.as_bytes()),
            public_key,
            effective_time: to_utc(&tbs.validity.not_before)?,
            expire_time: to_utc(&tbs.validity.not_after)?,
            pem: pem.as_bytes().to_vec(),
        })
    }

    /// Serial number as upper-case hex without leading zeros.
    #[must_use]
    pub fn serial_no(&self) -> &str {
        &self.serial_no
    }

    /// RSA verification key.
    #[must_use]
    pub const fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Start of the validity window.
    #[must_use]
    pub const fn effective_time(&self) -> DateTime<Utc> {
        self.effective_time
    }

    /// End of the validity window.
    #[must_use]
    pub const fn expire_time(&self) -> DateTime<Utc> {
        self.expire_time
    }

    /// Raw PEM bytes as received.
    #[must_use]
    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    /// True if `at` falls inside the validity window.
    #[must_use]
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_time <= at && at <= self.expire_time
    }
}

impl fmt::Debug for PlatformCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformCertificate")
            .field("serial_no", &self.serial_no)
            .field("effective_time", &self.effective_time)
            .field("expire_time", &self.expire_time)
            .finish_non_exhaustive()
    }
}

/// Renders a DER integer the way the platform prints serials.
fn serial_hex(bytes: &[u8]) -> String {
    let hex = hex::encode_upper(bytes);
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() { "0".to_owned() } else { trimmed.to_owned() }
}

fn to_utc(time: &Time) -> Result<DateTime<Utc>> {
    let since_epoch = time.to_unix_duration();
    i64::try_from(since_epoch.as_secs())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| GuardError::KeyMaterial("certificate validity out of range".to_owned()))
}
