use hdm_core::{HdmError, HdmResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Optional defaults for the companion, read from
/// `$HOME/.heap-dump-companion.toml` unless `--config` is given.
///
/// ```toml
/// topic = "cloud-beacon"
/// transit_mount_point = "eaas-heap-dump-service"
/// vault_addr = "https://vault.example.com:8200"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompanionConfig {
    /// Tenant whose transit key wrapped the data key
    pub topic: Option<String>,
    pub transit_mount_point: Option<String>,
    /// Used when `VAULT_ADDR` is not set
    pub vault_addr: Option<String>,
}

pub const CONFIG_FILE_NAME: &str = ".heap-dump-companion.toml";

pub fn default_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(CONFIG_FILE_NAME))
}

impl CompanionConfig {
    /// Load `explicit` if given (it must exist); otherwise the default file
    /// if present, else empty defaults.
    pub fn load(explicit: Option<&Path>) -> HdmResult<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> HdmResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HdmError::Config(format!("reading config {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| HdmError::Config(format!("parsing config {}: {e}", path.display())))
    }
}
