//! HTTP transport configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{GuardError, Result};

/// Longest request timeout the platform client allows, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 30;

/// HTTP transport configuration, the `[http]` table of the client config.
///
/// ```toml
/// [http]
/// timeout_secs = 10
/// connect_timeout_secs = 5
/// pool_max_idle_per_host = 16
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds, 1 to 30.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds, 1 to 30.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum idle connections per host.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    /// `User-Agent` header value.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Validates configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ConfigError`] if a timeout is outside 1-30
    /// seconds or the user agent is empty or contains control characters.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(GuardError::ConfigError(format!(
                "timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}"
            )));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.connect_timeout_secs) {
            return Err(GuardError::ConfigError(format!(
                "connect_timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}"
            )));
        }
        if self.user_agent.trim().is_empty() || self.user_agent.chars().any(char::is_control) {
            return Err(GuardError::ConfigError("user_agent is empty or malformed".to_owned()));
        }
        Ok(())
    }

    /// Request timeout, clamped to 1-30 seconds.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.clamp(1, MAX_TIMEOUT_SECS))
    }

    /// Connect timeout, clamped to 1-30 seconds.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.clamp(1, MAX_TIMEOUT_SECS))
    }
}

const fn default_timeout_secs() -> u64 {
    MAX_TIMEOUT_SECS
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_pool_max_idle() -> usize {
    32
}

fn default_user_agent() -> String {
    format!("mch-guard/{}", env!("CARGO_PKG_VERSION"))
}
