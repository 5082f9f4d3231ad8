//! Remote write transport
//!
//! A [`Transport`] delivers one serialized batch to the time-series
//! endpoint. [`HttpTransport`] POSTs the body with a fixed timeout; any
//! transport error or non-2xx status is a [`FlushError`].

use crate::error::FlushError;
use std::time::Duration;

/// Placeholder substituted for the endpoint in error text
pub const REDACTED_ENDPOINT: &str = "http://endpoint";

/// Content type of the write request
pub const CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Delivers a serialized batch to the remote endpoint
pub trait Transport: Send + Sync {
    /// Send `body`; success means the endpoint acknowledged it
    fn send(&self, body: &str) -> Result<(), FlushError>;

    /// Configured endpoint, used for redaction and dry-run output
    fn endpoint(&self) -> &str;
}

/// Replace every occurrence of `endpoint` in `text` with a placeholder
///
/// Write URLs commonly embed credentials as query parameters.
pub fn redact_endpoint(text: &str, endpoint: &str) -> String {
    if endpoint.is_empty() {
        return text.to_string();
    }
    text.replace(endpoint, REDACTED_ENDPOINT)
}

/// HTTP transport settings
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    /// Accept invalid TLS certificates
    pub insecure_tls: bool,
    /// Idle keep-alive connections kept per host
    pub max_idle_connections: usize,
    /// How long an idle connection is kept
    pub idle_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            insecure_tls: false,
            max_idle_connections: 5,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl HttpTransportConfig {
    /// Create a configuration with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Blocking HTTP POST transport
#[cfg(feature = "http")]
#[derive(Debug)]
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    /// Create a transport for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`](crate::error::ConfigError) if the endpoint
    /// is not a URL or the client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        config: HttpTransportConfig,
    ) -> Result<Self, crate::error::ConfigError> {
        use crate::error::ConfigError;

        let endpoint = endpoint.into();
        reqwest::Url::parse(&endpoint).map_err(|e| {
            ConfigError::Invalid(format!("write endpoint is not a valid URL: {}", e))
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_connections)
            .pool_idle_timeout(config.idle_timeout)
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {}", e.without_url())))?;

        Ok(Self { endpoint, client })
    }
}

#[cfg(feature = "http")]
impl Transport for HttpTransport {
    fn send(&self, body: &str) -> Result<(), FlushError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .map_err(|e| {
                let kind = if e.is_timeout() { "timeout: " } else { "" };
                FlushError::Request(redact_endpoint(
                    &format!("{}{}", kind, e.without_url()),
                    &self.endpoint,
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlushError::Rejected {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
