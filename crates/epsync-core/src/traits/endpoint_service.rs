// # Endpoint Service Trait
//
// Defines the interface to the provider's endpoint web service.
//
// ## Implementations
//
// - HTTPS: `epsync-source-http` crate
// - Tests: scripted fakes returning canned records
//
// ## Usage
//
// ```rust,ignore
// use epsync_core::EndpointService;
//
// let versions = service.fetch_versions(&identity).await?;
// let records = service.fetch_endpoints(Instance::Worldwide, &identity).await?;
// ```

use async_trait::async_trait;

use crate::classify::EndpointRecord;
use crate::config::Instance;
use crate::identity::ClientIdentity;
use crate::version::VersionRecord;

/// Trait for endpoint web service implementations
///
/// Implementations own the transport (TLS, timeouts, status handling) and
/// nothing else. They must not retry, cache, or decide whether an update
/// is needed; those decisions belong to the engine.
///
/// # Errors
///
/// - Non-success HTTP status or connection failure: [`crate::Error::Transport`]
/// - Body that does not decode into the expected shape: [`crate::Error::MalformedResponse`]
#[async_trait]
pub trait EndpointService: Send + Sync {
    /// Fetch the per-instance version records
    ///
    /// `GET /version?ClientRequestId=<identity>`
    async fn fetch_versions(
        &self,
        identity: &ClientIdentity,
    ) -> Result<Vec<VersionRecord>, crate::Error>;

    /// Fetch the full endpoint list for one instance
    ///
    /// `GET /endpoints/<instance>?ClientRequestId=<identity>`
    async fn fetch_endpoints(
        &self,
        instance: Instance,
        identity: &ClientIdentity,
    ) -> Result<Vec<EndpointRecord>, crate::Error>;

    /// Get the service name (for logging/debugging)
    fn service_name(&self) -> &'static str;
}
