use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{HdmError, HdmResult};

/// Environment variable holding the path of the sidecar's JSON config file
pub const CONFIG_ENV_VAR: &str = "APP_CONFIG_FILE";

/// Top-level sidecar configuration (loaded from the JSON file named by
/// `APP_CONFIG_FILE`). Unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct SidecarConfig {
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub watch_path: WatchPathConfig,
    pub middleware: MiddlewareConfig,
    pub service_owner: ServiceOwnerConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Staging directory for encrypted payloads and wrapped keys
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct MetricsConfig {
    /// Port of the Prometheus endpoint (bound on all interfaces)
    pub port: u16,
    /// HTTP path of the Prometheus endpoint
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct WatchPathConfig {
    /// Directory the JVM writes heap dumps into
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct MiddlewareConfig {
    /// Signing endpoint of the heap dump service
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ServiceOwnerConfig {
    /// Tenant owning this workload; selects the transit key
    pub tenant: String,
}

/// Completion detection tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct DetectionConfig {
    pub poll_interval_secs: u64,
    /// Files below this size are never treated as heap dumps (default: 16 MiB)
    pub min_size_bytes: u64,
    /// mtime age after which a file is flagged stale
    pub stale_after_secs: u64,
    /// Grace period between the stale flag and deletion
    pub reap_after_secs: u64,
    /// Minimum mtime age before a file may be considered complete
    pub settle_secs: u64,
    /// Minimum spacing between the two size samples compared
    pub min_sample_gap_secs: u64,
}

/// Where the service-account credential and namespace are read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct CredentialsConfig {
    pub token_path: PathBuf,
    pub namespace_path: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            path: "/metrics".into(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            min_size_bytes: 16 * 1024 * 1024,
            stale_after_secs: 60,
            reap_after_secs: 300,
            settle_secs: 15,
            min_sample_gap_secs: 2,
        }
    }
}

impl DetectionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn reap_after(&self) -> Duration {
        Duration::from_secs(self.reap_after_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn min_sample_gap(&self) -> Duration {
        Duration::from_secs(self.min_sample_gap_secs)
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_path: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token"),
            namespace_path: PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/namespace",
            ),
        }
    }
}

impl SidecarConfig {
    /// Load the config file whose path is stored in the environment variable `var`.
    pub fn load_from_env(var: &str) -> HdmResult<Self> {
        let path = std::env::var_os(var).ok_or_else(|| {
            HdmError::Config(format!(
                "environment variable for config file not set: {var}"
            ))
        })?;
        Self::load_from_file(Path::new(&path))
    }

    pub fn load_from_file(path: &Path) -> HdmResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HdmError::Config(format!(
                "failed to load config file '{}': {e}",
                path.display()
            ))
        })?;
        let config: SidecarConfig = serde_json::from_str(&content).map_err(|e| {
            HdmError::Config(format!(
                "failed to parse json data of file '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HdmResult<()> {
        if self.service_owner.tenant.trim().is_empty() {
            return Err(HdmError::Config("ServiceOwner.Tenant must not be empty".into()));
        }
        if self.middleware.endpoint.trim().is_empty() {
            return Err(HdmError::Config("Middleware.Endpoint must not be empty".into()));
        }
        if self.watch_path.path.as_os_str().is_empty() {
            return Err(HdmError::Config("WatchPath.Path must not be empty".into()));
        }
        if !self.metrics.path.starts_with('/') {
            return Err(HdmError::Config(format!(
                "Metrics.Path must start with '/': {}",
                self.metrics.path
            )));
        }
        if self.detection.poll_interval_secs == 0 {
            return Err(HdmError::Config(
                "Detection.PollIntervalSecs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
