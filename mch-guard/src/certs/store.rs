//! Serial-keyed certificate store with atomic snapshot replacement.

use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use tracing::info;

use crate::{
    certs::PlatformCertificate,
    error::{GuardError, Result},
};

/// An immutable, complete set of platform certificates.
#[derive(Debug, Default)]
pub struct CertificateSnapshot {
    generation: u64,
    certificates: HashMap<String, Arc<PlatformCertificate>>,
}

impl CertificateSnapshot {
    /// Replacement counter: 0 for the initial empty snapshot, then +1 per
    /// `replace_all`.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Certificate with exactly this serial.
    #[must_use]
    pub fn get(&self, serial_no: &str) -> Option<&Arc<PlatformCertificate>> {
        self.certificates.get(serial_no)
    }

    /// Number of certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// True if no certificate is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Sorted serial numbers.
    #[must_use]
    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.certificates.keys().cloned().collect();
        serials.sort_unstable();
        serials
    }

    /// Iterates over the certificates in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PlatformCertificate>> {
        self.certificates.values()
    }

    /// The certificate with the latest effective time.
    ///
    /// Only for picking an encryption key or for diagnostics. Verification
    /// always selects by serial.
    #[must_use]
    pub fn newest(&self) -> Option<&Arc<PlatformCertificate>> {
        self.certificates
            .values()
            .max_by(|a, b| {
                a.effective_time()
                    .cmp(&b.effective_time())
                    .then_with(|| a.serial_no().cmp(b.serial_no()))
            })
    }
}

/// Mapping from serial number to [`PlatformCertificate`].
///
/// Readers never block: every lookup loads the current snapshot through a
/// single atomic pointer. [`CertificateStore::replace_all`] publishes a new
/// snapshot in one swap, so a reader sees either the whole old set or the
/// whole new set.
///
/// # Examples
///
/// ```no_run
/// use mch_guard::certs::{CertificateStore, PlatformCertificate};
///
/// let store = CertificateStore::new();
/// assert!(store.is_empty());
///
/// let cert = PlatformCertificate::from_pem(&std::fs::read_to_string("platform.pem")?)?;
/// let serial = cert.serial_no().to_owned();
/// store.replace_all(vec![cert])?;
/// assert!(store.get(&serial).is_some());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct CertificateStore {
    current: ArcSwap<CertificateSnapshot>,
}

impl Default for CertificateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { current: ArcSwap::from_pointee(CertificateSnapshot::default()) }
    }

    /// Looks up a certificate by exact serial.
    #[must_use]
    pub fn get(&self, serial_no: &str) -> Option<Arc<PlatformCertificate>> {
        self.current.load().get(serial_no).cloned()
    }

    /// Current snapshot. Stays valid and unchanged after later rotations.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CertificateSnapshot> {
        self.current.load_full()
    }

    /// Replaces the whole certificate set and returns the new generation.
    ///
    /// The new set is total, never merged with the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::KeyMaterial`] if two certificates share a
    /// serial. The current snapshot is left untouched.
    pub fn replace_all(&self, certificates: Vec<PlatformCertificate>) -> Result<u64> {
        let mut map = HashMap::with_capacity(certificates.len());
        for cert in certificates {
            let serial = cert.serial_no().to_owned();
            if map.insert(serial.clone(), Arc::new(cert)).is_some() {
                return Err(GuardError::KeyMaterial(format!(
                    "duplicate platform certificate serial {serial}"
                )));
            }
        }

        let previous = self.current.rcu(|old| CertificateSnapshot {
            generation: old.generation + 1,
            certificates: map.clone(),
        });
        let generation = previous.generation + 1;

        info!(generation, count = map.len(), "platform certificates replaced");
        Ok(generation)
    }

    /// Number of certificates in the current snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    /// True if the current snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    /// Sorted serials of the current snapshot.
    #[must_use]
    pub fn serials(&self) -> Vec<String> {
        self.current.load().serials()
    }

    /// Generation of the current snapshot.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current.load().generation()
    }

    /// Certificate with the latest effective time in the current snapshot.
    #[must_use]
    pub fn newest(&self) -> Option<Arc<PlatformCertificate>> {
        self.current.load().newest().cloned()
    }
}
