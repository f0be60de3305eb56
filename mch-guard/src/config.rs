//! Client configuration.
//!
//! One immutable [`ClientConfig`] per merchant client, loaded from TOML:
//!
//! ```toml
//! merchant_id = "1900000001"
//! certificate_serial_no = "5157F09EFDC096DE15EBE81A47057A7232F7B1D2"
//! private_key_path = "/etc/mch/apiclient_key.pem"
//! api_v3_key_env = "MCH_API_V3_KEY"
//! platform_serial_no = "3C8F1A2B4D6E7F8091A2B3C4D5E6F708192A3B4C"
//!
//! [http]
//! timeout_secs = 10
//! ```
//!
//! Secrets are referenced, never inlined by default: the private key by path
//! and the API v3 key by environment variable name.

use std::{
    fmt,
    net::IpAddr,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use url::Url;

use crate::{
    cipher::ApiV3Key,
    credential::Credential,
    error::{GuardError, Result},
    transport::HttpConfig,
};

/// Production API host.
pub const DEFAULT_BASE_URL: &str = "https://api.mch.weixin.qq.com";

/// Environment variable read for the API v3 key unless configured otherwise.
pub const DEFAULT_API_V3_KEY_ENV: &str = "MCH_API_V3_KEY";

/// Merchant client configuration.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Merchant id (`mchid`).
    pub merchant_id: String,

    /// Serial number of the merchant API certificate.
    pub certificate_serial_no: String,

    /// Path of the private key. Exactly one of this and `private_key_pem`
    /// must be set.
    ///
    /// A `.p12` or `.pfx` file is read as the platform-issued PKCS#12
    /// bundle, whose password is the merchant id. Anything else is read as
    /// PEM.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    /// Inline PEM private key.
    #[serde(default)]
    pub private_key_pem: Option<String>,

    /// Name of the environment variable holding the API v3 key.
    #[serde(default = "default_api_v3_key_env")]
    pub api_v3_key_env: String,

    /// Platform certificate used for outbound field encryption. When unset,
    /// the newest loaded certificate is used.
    #[serde(default)]
    pub platform_serial_no: Option<String>,

    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Transport settings.
    #[serde(default)]
    pub http: HttpConfig,
}

impl ClientConfig {
    /// Creates a configuration with defaults for everything but identity.
    #[must_use]
    pub fn new(merchant_id: impl Into<String>, certificate_serial_no: impl Into<String>) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            certificate_serial_no: certificate_serial_no.into(),
            private_key_path: None,
            private_key_pem: None,
            api_v3_key_env: default_api_v3_key_env(),
            platform_serial_no: None,
            base_url: default_base_url(),
            http: HttpConfig::default(),
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ConfigError`] on syntax errors, unknown keys or
    /// failed validation.
    ///
    /// # Examples
    ///
    /// ```
    /// use mch_guard::config::ClientConfig;
    ///
    /// let config = ClientConfig::from_toml(r#"
    ///     merchant_id = "1900000001"
    ///     certificate_serial_no = "5157F09EFDC096DE"
    ///     private_key_path = "apiclient_key.pem"
    /// "#)?;
    /// assert_eq!(config.base_url, "https://api.mch.weixin.qq.com");
    /// # Ok::<(), mch_guard::GuardError>(())
    /// ```
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml)
            .map_err(|e| GuardError::ConfigError(format!("invalid client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ConfigError`] if the file cannot be read or is
    /// invalid.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let toml = std::fs::read_to_string(path).map_err(|e| {
            GuardError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&toml)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ConfigError`] if an identifier is empty, the key
    /// source is missing or ambiguous, the environment variable name is
    /// malformed, the base URL is not HTTPS (plain HTTP is accepted only for
    /// loopback hosts), or the HTTP settings are out of range.
    pub fn validate(&self) -> Result<()> {
        if self.merchant_id.trim().is_empty() {
            return Err(GuardError::ConfigError("merchant_id is empty".to_owned()));
        }
        if self.certificate_serial_no.trim().is_empty() {
            return Err(GuardError::ConfigError("certificate_serial_no is empty".to_owned()));
        }
        match (&self.private_key_path, &self.private_key_pem) {
            (None, None) => {
                return Err(GuardError::ConfigError(
                    "one of private_key_path or private_key_pem is required".to_owned(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(GuardError::ConfigError(
                    "private_key_path and private_key_pem are mutually exclusive".to_owned(),
                ));
            }
            _ => {}
        }
        if let Some(serial) = &self.platform_serial_no
            && serial.trim().is_empty()
        {
            return Err(GuardError::ConfigError("platform_serial_no is empty".to_owned()));
        }
        validate_env_var_name(&self.api_v3_key_env)?;
        validate_base_url(&self.base_url)?;
        self.http.validate()
    }

    /// Loads the merchant credential from the configured key source.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ConfigError`] if no key source is configured,
    /// otherwise the errors of [`Credential::from_pem`] or
    /// [`Credential::from_pkcs12`].
    pub fn load_credential(&self) -> Result<Credential> {
        match (&self.private_key_pem, &self.private_key_path) {
            (Some(pem), _) => {
                Credential::from_pem(&self.merchant_id, &self.certificate_serial_no, pem)
            }
            (None, Some(path)) if is_pkcs12_path(path) => Credential::from_pkcs12_file(
                &self.merchant_id,
                &self.certificate_serial_no,
                path,
                &self.merchant_id,
            ),
            (None, Some(path)) => {
                Credential::from_pem_file(&self.merchant_id, &self.certificate_serial_no, path)
            }
            (None, None) => Err(GuardError::ConfigError("no private key configured".to_owned())),
        }
    }

    /// Reads the API v3 key from the configured environment variable.
    ///
    /// # Errors
    ///
    /// See [`ApiV3Key::from_env`].
    pub fn load_api_v3_key(&self) -> Result<ApiV3Key> {
        ApiV3Key::from_env(&self.api_v3_key_env)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("merchant_id", &self.merchant_id)
            .field("certificate_serial_no", &self.certificate_serial_no)
            .field("private_key_path", &self.private_key_path)
            .field("private_key_pem", &self.private_key_pem.as_ref().map(|_| "<redacted>"))
            .field("api_v3_key_env", &self.api_v3_key_env)
            .field("platform_serial_no", &self.platform_serial_no)
            .field("base_url", &self.base_url)
            .field("http", &self.http)
            .finish()
    }
}

fn default_api_v3_key_env() -> String {
    DEFAULT_API_V3_KEY_ENV.to_owned()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

fn validate_base_url(base_url: &str) -> Result<()> {
    let url = Url::parse(base_url)
        .map_err(|e| GuardError::ConfigError(format!("invalid base_url '{base_url}': {e}")))?;

    match url.scheme() {
        "https" => {}
        "http" if is_loopback(&url) => {}
        scheme => {
            return Err(GuardError::ConfigError(format!("base_url must use HTTPS, got: {scheme}")));
        }
    }
    if url.path() != "/" || url.query().is_some() {
        return Err(GuardError::ConfigError(
            "base_url must not carry a path or query".to_owned(),
        ));
    }
    Ok(())
}

fn is_pkcs12_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("p12") || ext.eq_ignore_ascii_case("pfx"))
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

fn validate_env_var_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(GuardError::ConfigError("environment variable name cannot be empty".to_owned()));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(GuardError::ConfigError(format!(
            "environment variable name must start with letter or underscore: {name}"
        )));
    }
    if let Some(ch) = chars.find(|ch| !ch.is_ascii_alphanumeric() && *ch != '_') {
        return Err(GuardError::ConfigError(format!(
            "environment variable name contains invalid character '{ch}': {name}"
        )));
    }
    Ok(())
}
