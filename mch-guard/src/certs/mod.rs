//! Platform certificates.
//!
//! The platform signs responses and notifications with one of several
//! certificates, identified by serial number. [`CertificateStore`] holds the
//! current set as an immutable snapshot; [`CertificateRotator`] fetches,
//! decrypts and publishes a new set.

pub mod certificate;
pub mod rotation;
pub mod store;

pub use certificate::PlatformCertificate;
pub use rotation::{
    CERTIFICATES_PATH, CertificateRotator, EncryptedCertificate, RotationState,
    decode_certificate_list,
};
pub use store::{CertificateSnapshot, CertificateStore};
