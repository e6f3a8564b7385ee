//! Per-dump pipeline: envelope → encrypt → upload payload → upload key → cleanup
//!
//! One file at a time. The plaintext data key only lives in memory; the only
//! key material written to disk is the transit-wrapped form, in a temp file
//! that exists just long enough to be uploaded.

use chrono::{DateTime, Utc};
use hdm_broker::EnvelopeSource;
use hdm_core::types::SigningEnvelope;
use hdm_core::{HdmError, HdmResult};
use hdm_crypto::DataKey;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::metrics::SidecarMetrics;
use crate::upload::Uploader;

/// Where a dump is in the pipeline. A failure is reported with the last
/// state reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detected,
    EnvelopeRequested,
    Encrypting,
    PayloadUploaded,
    KeyUploaded,
    CleanedUp,
}

impl Stage {
    /// Name of the step that runs when leaving this state; used as the
    /// `caller` log field.
    pub fn step(self) -> &'static str {
        match self {
            Stage::Detected => "request_envelope",
            Stage::EnvelopeRequested => "encrypt_dump",
            Stage::Encrypting => "upload_payload",
            Stage::PayloadUploaded => "upload_key",
            Stage::KeyUploaded => "cleanup",
            Stage::CleanedUp => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.step())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} failed for {path}: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub path: PathBuf,
    #[source]
    pub source: HdmError,
}

/// Identity and staging settings for the pipeline.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub tenant: String,
    pub namespace: String,
    pub pod_name: String,
    pub tmp_dir: PathBuf,
}

/// `POD_NAME` from the downward API, else the hostname.
pub fn pod_name() -> String {
    match std::env::var("POD_NAME") {
        Ok(name) if !name.trim().is_empty() => name,
        _ => hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-pod".into()),
    }
}

/// Object name requested from the signing service:
/// `<pod>-<basename>-<YYYY-MM-DD-HH-MM-SS>.hprof.crypted`
pub fn object_name(pod: &str, basename: &str, at: DateTime<Utc>) -> String {
    format!(
        "{pod}-{basename}-{}.hprof.crypted",
        at.format("%Y-%m-%d-%H-%M-%S")
    )
}

pub struct Orchestrator<S, U> {
    envelopes: S,
    uploader: U,
    settings: OrchestratorSettings,
    metrics: SidecarMetrics,
}

impl<S: EnvelopeSource, U: Uploader> Orchestrator<S, U> {
    pub fn new(
        envelopes: S,
        uploader: U,
        settings: OrchestratorSettings,
        metrics: SidecarMetrics,
    ) -> Self {
        Self {
            envelopes,
            uploader,
            settings,
            metrics,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &SidecarMetrics {
        &self.metrics
    }

    /// Run the pipeline for one completed dump and record the outcome.
    pub async fn handle(&self, path: &Path) -> Result<(), PipelineError> {
        let tenant = &self.settings.tenant;
        match self.process(path).await {
            Ok(()) => {
                info!(
                    caller = "handle_heap_dump",
                    path = %path.display(),
                    tenant = %tenant,
                    "uploaded encrypted heap dump"
                );
                self.metrics.record_handled(tenant);
                Ok(())
            }
            Err(e) => {
                error!(
                    caller = e.stage.step(),
                    path = %path.display(),
                    tenant = %tenant,
                    error = %e.source,
                    "heap dump pipeline failed"
                );
                self.metrics.record_failed(tenant);
                Err(e)
            }
        }
    }

    async fn process(&self, path: &Path) -> Result<(), PipelineError> {
        let fail = |stage: Stage| {
            move |source: HdmError| PipelineError {
                stage,
                path: path.to_path_buf(),
                source,
            }
        };

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                fail(Stage::Detected)(HdmError::Config(format!(
                    "{} has no file name",
                    path.display()
                )))
            })?;

        let name = object_name(&self.settings.pod_name, &basename, Utc::now());
        let envelope = self
            .envelopes
            .request_envelope(&self.settings.tenant, &self.settings.namespace, &name)
            .await
            .map_err(fail(Stage::Detected))?;

        let encrypted = self.settings.tmp_dir.join(format!("{basename}.crypted"));
        let result = self.seal_and_upload(path, &encrypted, &envelope).await;

        match result {
            Ok(key_file) => {
                // attempt all three even if one fails
                let removals = [
                    remove(path),
                    remove(&encrypted),
                    key_file
                        .close()
                        .map_err(HdmError::io("removing wrapped key temp file")),
                ];
                removals
                    .into_iter()
                    .collect::<HdmResult<()>>()
                    .map_err(fail(Stage::KeyUploaded))
            }
            Err((stage, source)) => {
                if let Err(e) = remove(&encrypted) {
                    warn!(caller = "cleanup", path = %encrypted.display(), "{e}");
                }
                Err(fail(stage)(source))
            }
        }
    }

    /// Steps that leave temp artifacts behind. Returns the wrapped key temp
    /// file so the caller decides when it goes away.
    async fn seal_and_upload(
        &self,
        path: &Path,
        encrypted: &Path,
        envelope: &SigningEnvelope,
    ) -> Result<tempfile::NamedTempFile, (Stage, HdmError)> {
        let key = DataKey::from_base64(&envelope.aes_key)
            .map_err(|e| (Stage::EnvelopeRequested, HdmError::Crypto(e)))?;

        let (src, dst) = (path.to_path_buf(), encrypted.to_path_buf());
        let encryption =
            tokio::task::spawn_blocking(move || hdm_crypto::encrypt_file(&key, &src, &dst));
        let summary = encryption
            .await
            .map_err(|e| {
                (
                    Stage::EnvelopeRequested,
                    HdmError::Other(anyhow::anyhow!("encryption task failed: {e}")),
                )
            })?
            .map_err(|e| (Stage::EnvelopeRequested, HdmError::Crypto(e)))?;
        info!(
            caller = "encrypt_dump",
            path = %path.display(),
            chunks = summary.chunks,
            bytes = summary.ciphertext_bytes,
            "encrypted heap dump"
        );

        self.uploader
            .upload(&envelope.url, encrypted)
            .await
            .map_err(|e| (Stage::Encrypting, e))?;

        let mut key_file = tempfile::Builder::new()
            .prefix("key")
            .tempfile_in(&self.settings.tmp_dir)
            .map_err(|e| {
                (
                    Stage::PayloadUploaded,
                    HdmError::io("creating wrapped key temp file")(e),
                )
            })?;
        let key_path = key_file.path().to_path_buf();
        key_file
            .write_all(envelope.encrypted_aes_key.as_bytes())
            .and_then(|()| key_file.flush())
            .map_err(|e| {
                (
                    Stage::PayloadUploaded,
                    HdmError::io(format!("writing {}", key_path.display()))(e),
                )
            })?;

        self.uploader
            .upload(&envelope.encrypted_aes_key_url, &key_path)
            .await
            .map_err(|e| (Stage::PayloadUploaded, e))?;

        Ok(key_file)
    }
}

fn remove(path: &Path) -> HdmResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HdmError::io(format!("removing {}", path.display()))(e)),
    }
}
