//! Data key wrap/unwrap through the Vault transit engine
//!
//! The tenant doubles as the transit key name ("topic"), so every tenant's
//! data keys are wrapped by a different remote key.
//!
//! Wire format:
//! ```text
//! POST {addr}/v1/{mount}/encrypt/{tenant}  {"plaintext": "<b64>"}   -> {"data": {"ciphertext": "vault:v1:..."}}
//! POST {addr}/v1/{mount}/decrypt/{tenant}  {"ciphertext": "vault:..."} -> {"data": {"plaintext": "<b64>"}}
//! ```

use hdm_core::{HdmError, HdmResult};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};

/// Transit mount used by the heap dump service
pub const DEFAULT_TRANSIT_MOUNT: &str = "eaas-heap-dump-service";

const SERVICE: &str = "transit engine";

/// Remote key-wrapping service scoped by tenant.
pub trait KeyTransit: Send + Sync {
    /// Wrap a base64 data key; returns the opaque wrapped form.
    fn wrap_key(
        &self,
        tenant: &str,
        plaintext_b64: &str,
    ) -> impl Future<Output = HdmResult<String>> + Send;

    /// Unwrap a key produced by [`KeyTransit::wrap_key`]; returns base64.
    fn unwrap_key(
        &self,
        tenant: &str,
        wrapped: &str,
    ) -> impl Future<Output = HdmResult<String>> + Send;
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    plaintext: &'a str,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    ciphertext: &'a str,
}

#[derive(Deserialize)]
struct TransitResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct EncryptData {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptData {
    plaintext: String,
}

/// Token-authenticated Vault transit client.
pub struct VaultTransit {
    http: reqwest::Client,
    addr: String,
    token: SecretString,
    mount: String,
}

impl VaultTransit {
    pub fn new(
        addr: impl Into<String>,
        token: SecretString,
        mount: impl Into<String>,
    ) -> HdmResult<Self> {
        Ok(Self {
            http: crate::http_client()?,
            addr: addr.into(),
            token,
            mount: mount.into(),
        })
    }

    /// Build from `VAULT_ADDR` and `VAULT_TOKEN`, as left behind by `vault login`.
    pub fn from_env(mount: impl Into<String>) -> HdmResult<Self> {
        let addr = std::env::var("VAULT_ADDR").map_err(|_| {
            HdmError::Config("could not find valid vault URL on env: VAULT_ADDR".into())
        })?;
        let token = std::env::var("VAULT_TOKEN").map_err(|_| {
            HdmError::Auth("could not find valid vault token on env: VAULT_TOKEN".into())
        })?;
        Self::new(addr, SecretString::from(token), mount)
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    fn url(&self, op: &str, tenant: &str) -> String {
        format!(
            "{}/v1/{}/{op}/{tenant}",
            self.addr.trim_end_matches('/'),
            self.mount.trim_matches('/')
        )
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        op: &str,
        tenant: &str,
        body: &B,
    ) -> HdmResult<T> {
        let url = self.url(op, tenant);
        debug!(url = %url, "transit request");

        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| HdmError::Network(format!("sending {op} request to {SERVICE}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = crate::error_body(response).await;
            if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
                return Err(HdmError::Auth(format!(
                    "{SERVICE} denied {op} with key '{tenant}' ({status}): {body}"
                )));
            }
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
        let parsed: TransitResponse<T> =
            serde_json::from_slice(&bytes).map_err(|e| HdmError::MalformedResponse {
                service: SERVICE,
                reason: e.to_string(),
            })?;
        Ok(parsed.data)
    }
}

impl KeyTransit for VaultTransit {
    async fn wrap_key(&self, tenant: &str, plaintext_b64: &str) -> HdmResult<String> {
        let data: EncryptData = self
            .call(
                "encrypt",
                tenant,
                &EncryptRequest {
                    plaintext: plaintext_b64,
                },
            )
            .await?;
        Ok(data.ciphertext)
    }

    async fn unwrap_key(&self, tenant: &str, wrapped: &str) -> HdmResult<String> {
        let result: HdmResult<DecryptData> = self
            .call(
                "decrypt",
                tenant,
                &DecryptRequest {
                    ciphertext: wrapped.trim(),
                },
            )
            .await;
        match result {
            Ok(data) => Ok(data.plaintext),
            Err(e) => {
                warn!(caller = "unwrap_key", tenant, error = %e, "could not decrypt AES key");
                Err(HdmError::KeyUnwrap {
                    tenant: tenant.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_layout() {
        let t = VaultTransit::new(
            "https://vault.example.com:8200/",
            SecretString::from("s.token"),
            "/eaas-heap-dump-service/",
        )
        .unwrap();
        assert_eq!(
            t.url("decrypt", "cloud-beacon"),
            "https://vault.example.com:8200/v1/eaas-heap-dump-service/decrypt/cloud-beacon"
        );
    }
}
