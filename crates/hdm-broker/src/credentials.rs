//! Service-account credential discovery

use hdm_core::config::CredentialsConfig;
use hdm_core::{HdmError, HdmResult};
use secrecy::SecretString;
use std::path::{Path, PathBuf};

/// Source of the bearer token presented to the signing service and of the
/// namespace the workload runs in.
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> HdmResult<SecretString>;
    fn namespace(&self) -> HdmResult<String>;
}

/// Reads the projected Kubernetes service-account files.
#[derive(Debug, Clone)]
pub struct ServiceAccountCredentials {
    token_path: PathBuf,
    namespace_path: PathBuf,
}

impl ServiceAccountCredentials {
    pub fn new(token_path: impl Into<PathBuf>, namespace_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
            namespace_path: namespace_path.into(),
        }
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::new(&config.token_path, &config.namespace_path)
    }
}

impl CredentialProvider for ServiceAccountCredentials {
    fn token(&self) -> HdmResult<SecretString> {
        read_trimmed(&self.token_path, "service account token").map(SecretString::from)
    }

    fn namespace(&self) -> HdmResult<String> {
        read_trimmed(&self.namespace_path, "namespace")
    }
}

fn read_trimmed(path: &Path, what: &str) -> HdmResult<String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| HdmError::Auth(format!("error reading {what} {}: {e}", path.display())))?;
    let value = raw.trim();
    if value.is_empty() {
        return Err(HdmError::Auth(format!("{what} {} is empty", path.display())));
    }
    Ok(value.to_string())
}

/// Fixed credentials, for tests and local runs.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: String,
    namespace: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            namespace: namespace.into(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> HdmResult<SecretString> {
        Ok(SecretString::from(self.token.clone()))
    }

    fn namespace(&self) -> HdmResult<String> {
        Ok(self.namespace.clone())
    }
}
