//! hdm-broker: remote key material for heap dump envelope encryption
//!
//! - `signing`: request a per-file envelope (presigned URLs + data key +
//!   wrapped data key) from the heap dump service
//! - `transit`: wrap/unwrap data keys with the tenant's transit key
//! - `credentials`: service-account token and namespace discovery

pub mod credentials;
pub mod signing;
pub mod transit;

pub use credentials::{CredentialProvider, ServiceAccountCredentials, StaticCredentials};
pub use signing::{EnvelopeSource, SigningClient};
pub use transit::{KeyTransit, VaultTransit, DEFAULT_TRANSIT_MOUNT};

use hdm_core::{HdmError, HdmResult};
use std::time::Duration;

/// Shared HTTP client settings for every outbound call.
///
/// Only the connect phase is bounded; large uploads may legitimately run
/// for minutes.
pub fn http_client() -> HdmResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("heap-dump-management/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| HdmError::Network(format!("building HTTP client: {e}")))
}

/// Body of a rejected response, kept verbatim for the error report.
pub async fn error_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(body) => body,
        Err(e) => format!("<unreadable body: {e}>"),
    }
}
