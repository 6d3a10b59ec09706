//! Transport for `ListRecords` requests.
//!
//! The protocol client never builds URLs itself; it hands a [`ListRequest`]
//! to a [`Transport`] and gets the raw response body back. The HTTP
//! implementation talks to a real endpoint, tests substitute a paged fake.

use std::time::Duration;

use super::types::{HarvestError, HarvestResult};

/// Default per-request timeout for the HTTP transport.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// One `ListRecords` request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListRequest {
    /// First page of a listing.
    Initial { set: String, metadata_prefix: String },
    /// Continuation from a resumption token.
    Resume { token: String },
}

impl ListRequest {
    /// Query parameters for this request.
    ///
    /// A resumption request carries only the verb and the token; the
    /// repository rejects any other argument alongside it.
    #[must_use]
    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Initial {
                set,
                metadata_prefix,
            } => vec![
                ("verb", "ListRecords".to_string()),
                ("set", set.clone()),
                ("metadataPrefix", metadata_prefix.clone()),
            ],
            Self::Resume { token } => vec![
                ("verb", "ListRecords".to_string()),
                ("resumptionToken", token.clone()),
            ],
        }
    }
}

/// Fetches raw `ListRecords` responses.
pub trait Transport: Send + Sync {
    /// Issue one request and return the response body.
    fn list_records(
        &self,
        request: &ListRequest,
    ) -> impl std::future::Future<Output = HarvestResult<String>> + Send;
}

/// Transport backed by an HTTP OAI-PMH endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> HarvestResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a transport with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> HarvestResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("oai-harvest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HarvestError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Endpoint this transport talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Transport for HttpTransport {
    async fn list_records(&self, request: &ListRequest) -> HarvestResult<String> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&request.query())
            .send()
            .await
            .map_err(|e| HarvestError::Http(format!("ListRecords request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .text()
            .await
            .map_err(|e| HarvestError::Http(format!("Failed to read ListRecords response: {e}")))
    }
}
