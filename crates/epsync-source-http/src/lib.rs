// # HTTP Endpoint Service
//
// This crate provides the HTTPS client for the provider's endpoint web
// service.
//
// ## Requests
//
// Both lookups are plain GETs carrying the client identity as a query
// parameter:
//
// - `GET {base}/version?ClientRequestId=<identity>`
// - `GET {base}/endpoints/<instance>?ClientRequestId=<identity>`
//
// ## Error Mapping
//
// - Connection failure or timeout: `Error::Transport` without status
// - Non-success status: `Error::Transport` with the status code
// - Body that is not the expected JSON: `Error::MalformedResponse`
//
// Whether a failure is fatal is the engine's decision; this client never
// retries.

use epsync_core::classify::EndpointRecord;
use epsync_core::config::{Instance, SyncConfig};
use epsync_core::identity::ClientIdentity;
use epsync_core::traits::EndpointService;
use epsync_core::version::VersionRecord;
use epsync_core::{Error, Result};

use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Query parameter carrying the client identity
const CLIENT_REQUEST_ID: &str = "ClientRequestId";

/// HTTPS client for the endpoint web service
#[derive(Debug, Clone)]
pub struct HttpEndpointService {
    /// Service root, without trailing slash
    base_url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpEndpointService {
    /// Create a client for the service rooted at `base_url`
    ///
    /// # Parameters
    ///
    /// - `base_url`: Service root (e.g., "https://endpoints.office.com")
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create with a custom request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("epsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use an existing client
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(config.service_url.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` and decode the JSON body
    async fn get_json<T: DeserializeOwned>(&self, path: &str, identity: &ClientIdentity) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[(CLIENT_REQUEST_ID, identity.as_str())])
            .send()
            .await
            .map_err(|e| Error::transport(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport_status(
                status.as_u16(),
                format!("{} returned {}", url, status),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(format!("Failed to read response from {}: {}", url, e)))?;

        serde_json::from_slice(&body)
            .map_err(|e| Error::malformed(format!("Unexpected response from {}: {}", url, e)))
    }
}

#[async_trait::async_trait]
impl EndpointService for HttpEndpointService {
    async fn fetch_versions(&self, identity: &ClientIdentity) -> Result<Vec<VersionRecord>> {
        let records: Vec<VersionRecord> = self.get_json("version", identity).await?;
        tracing::debug!("Received {} version records", records.len());
        Ok(records)
    }

    async fn fetch_endpoints(
        &self,
        instance: Instance,
        identity: &ClientIdentity,
    ) -> Result<Vec<EndpointRecord>> {
        let path = format!("endpoints/{}", instance.as_str());
        let records: Vec<EndpointRecord> = self.get_json(&path, identity).await?;
        tracing::debug!("Received {} endpoint records for {}", records.len(), instance);
        Ok(records)
    }

    fn service_name(&self) -> &'static str {
        "https"
    }
}
