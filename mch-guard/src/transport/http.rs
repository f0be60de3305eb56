//! reqwest-backed [`Transport`].

use reqwest::{
    Client, Method,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use tracing::{debug, instrument};

use crate::{
    auth::HEADER_SERIAL,
    error::{GuardError, Result},
    transport::{ApiRequest, Transport, TransportResponse, config::HttpConfig},
};

const JSON: &str = "application/json";

/// Rejects header values that could split the header block.
fn validate_header(name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n', '\0']) {
        return Err(GuardError::TransportError(format!(
            "invalid {name} header: control characters not allowed"
        )));
    }
    Ok(())
}

/// HTTPS transport using a pooled reqwest client with rustls.
///
/// Sends `Accept: application/json`, the configured `User-Agent`, the
/// `Authorization` header, `Content-Type: application/json` when a body is
/// present and `Wechatpay-Serial` when requested. Returns every response
/// as-is, whatever its status.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with [`HttpConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::HttpError`] if the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self> {
        Self::with_config(&HttpConfig::default())
    }

    /// Creates a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::HttpError`] if the client cannot be built.
    ///
    /// # Examples
    ///
    /// ```
    /// use mch_guard::transport::{HttpConfig, HttpTransport};
    ///
    /// let config = HttpConfig { timeout_secs: 5, ..HttpConfig::default() };
    /// let transport = HttpTransport::with_config(&config).unwrap();
    /// ```
    pub fn with_config(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(GuardError::HttpError)?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }

    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: ApiRequest) -> Result<TransportResponse> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            GuardError::InvalidInput(format!("unsupported HTTP method: {}", request.method))
        })?;
        validate_header("Authorization", &request.authorization)?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .header(ACCEPT, JSON)
            .header(AUTHORIZATION, &request.authorization);

        if let Some(serial) = &request.platform_serial {
            validate_header(HEADER_SERIAL, serial)?;
            builder = builder.header(HEADER_SERIAL, serial);
        }
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, JSON).body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(status, body_len = body.len(), "response received");
        Ok(TransportResponse { status, headers, body })
    }
}

impl Transport for HttpTransport {
    async fn execute<'a>(&'a self, request: ApiRequest) -> Result<TransportResponse> {
        self.send(request).await
    }
}
