//! Signing envelope requests against the heap dump service

use hdm_core::types::{SigningEnvelope, SigningRequest};
use hdm_core::{HdmError, HdmResult};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use std::future::Future;
use tracing::debug;

use crate::credentials::CredentialProvider;

const SERVICE: &str = "signing service";

/// Anything that can hand out a per-file signing envelope.
pub trait EnvelopeSource: Send + Sync {
    fn request_envelope(
        &self,
        tenant: &str,
        namespace: &str,
        file_name: &str,
    ) -> impl Future<Output = HdmResult<SigningEnvelope>> + Send;
}

/// HTTP client for the heap dump service's upload-signing endpoint.
pub struct SigningClient<C> {
    http: reqwest::Client,
    endpoint: String,
    credentials: C,
}

impl<C: CredentialProvider> SigningClient<C> {
    pub fn new(endpoint: impl Into<String>, credentials: C) -> HdmResult<Self> {
        Ok(Self::with_client(crate::http_client()?, endpoint, credentials))
    }

    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>, credentials: C) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            credentials,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn credentials(&self) -> &C {
        &self.credentials
    }
}

impl<C: CredentialProvider> EnvelopeSource for SigningClient<C> {
    async fn request_envelope(
        &self,
        tenant: &str,
        namespace: &str,
        file_name: &str,
    ) -> HdmResult<SigningEnvelope> {
        let token = self.credentials.token()?;
        let body = SigningRequest {
            tenant: tenant.to_string(),
            namespace: namespace.to_string(),
            file_name: file_name.to_string(),
        };

        debug!(endpoint = %self.endpoint, tenant, namespace, file_name, "requesting signing envelope");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| HdmError::Network(format!("sending request to {SERVICE}: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = crate::error_body(response).await;
            return Err(HdmError::Protocol {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HdmError::Network(format!("reading {SERVICE} response: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| HdmError::MalformedResponse {
            service: SERVICE,
            reason: e.to_string(),
        })
    }
}
