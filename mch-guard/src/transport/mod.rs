//! Transport Adapter seam.
//!
//! The security core never performs I/O itself. It hands a fully signed
//! [`ApiRequest`] to a [`Transport`] and gets back the raw
//! [`TransportResponse`]: status, headers and the exact body bytes, which the
//! caller then verifies. [`HttpTransport`] is the reqwest-backed default;
//! other implementations (test doubles, instrumented clients, proxies) can be
//! plugged in from outside the crate.
//!
//! # Examples
//!
//! ```rust,no_run
//! use mch_guard::transport::{ApiRequest, HttpTransport, Transport};
//!
//! # async fn example(authorization: String) -> mch_guard::Result<()> {
//! let transport = HttpTransport::new()?;
//! let request = ApiRequest::new("GET", "https://api.mch.weixin.qq.com/v3/certificates", authorization);
//!
//! let response = transport.execute(request).await?;
//! println!("status {}", response.status);
//! # Ok(())
//! # }
//! ```

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::fmt;

use crate::{auth::ResponseHeaders, error::Result};

pub mod config;
pub mod http;

pub use config::HttpConfig;
pub use http::HttpTransport;

/// A signed request ready to be sent.
#[derive(Clone)]
pub struct ApiRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Absolute URL, already serialized by [`url::Url`]. Its path and query
    /// equal the signed `path_with_query` byte for byte, and a transport
    /// must send them without re-encoding.
    pub url: String,
    /// Rendered `Authorization` header value.
    pub authorization: String,
    /// Platform certificate serial sent as `Wechatpay-Serial` when the body
    /// carries OAEP-encrypted fields.
    pub platform_serial: Option<String>,
    /// Raw JSON body. `None` for bodiless methods.
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    /// Creates a bodiless request.
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>, authorization: String) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            authorization,
            platform_serial: None,
            body: None,
        }
    }

    /// Attaches a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the `Wechatpay-Serial` header.
    #[must_use]
    pub fn with_platform_serial(mut self, serial_no: impl Into<String>) -> Self {
        self.platform_serial = Some(serial_no.into());
        self
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("platform_serial", &self.platform_serial)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

/// Raw response, not yet trusted.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, names lower-cased.
    pub headers: Vec<(String, String)>,
    /// Body bytes exactly as received.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// First value of header `name`, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Signature headers of this response.
    #[must_use]
    pub fn verification_headers(&self) -> ResponseHeaders {
        ResponseHeaders::from_pairs(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Sends signed requests.
///
/// Implementations must return the body bytes untouched (no decompression
/// side effects visible to the caller, no re-serialization) and must not
/// interpret the status code. Retries, if any, belong here and not in the
/// security core.
pub trait Transport: Send + Sync {
    /// Sends one request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be sent or the response
    /// could not be read.
    fn execute<'a>(
        &'a self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<TransportResponse>> + Send + 'a;
}
