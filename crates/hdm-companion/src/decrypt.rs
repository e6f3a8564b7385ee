//! Reverse path: unwrap the data key, decrypt the dump

use hdm_broker::KeyTransit;
use hdm_core::{HdmError, HdmResult};
use hdm_crypto::DataKey;
use std::path::PathBuf;
use tracing::{debug, info};

/// One collected heap dump and where its plaintext should go.
#[derive(Debug, Clone)]
pub struct DecryptJob {
    /// Encrypted payload (`*.hprof.crypted`)
    pub input: PathBuf,
    /// Wrapped data key as uploaded next to the payload
    pub key_file: PathBuf,
    pub output: PathBuf,
    /// Tenant ("topic") whose transit key wrapped the data key
    pub tenant: String,
}

/// Unwrap the job's key through `transit` and decrypt the payload.
///
/// Returns the plaintext size. On any error the output file is not created.
pub async fn decrypt_heap_dump<T: KeyTransit>(transit: &T, job: &DecryptJob) -> HdmResult<u64> {
    let wrapped = tokio::fs::read_to_string(&job.key_file)
        .await
        .map_err(HdmError::io(format!(
            "reading encrypted key {}",
            job.key_file.display()
        )))?;

    let plaintext_b64 = transit.unwrap_key(&job.tenant, wrapped.trim()).await?;
    let key = DataKey::from_base64(&plaintext_b64)?;
    debug!(tenant = %job.tenant, key_bits = key.len() * 8, "data key unwrapped");

    let (input, output) = (job.input.clone(), job.output.clone());
    let decryption =
        tokio::task::spawn_blocking(move || hdm_crypto::decrypt_file(&key, &input, &output));
    let written = decryption
        .await
        .map_err(|e| HdmError::Other(anyhow::anyhow!("decryption task failed: {e}")))??;

    info!(
        input = %job.input.display(),
        output = %job.output.display(),
        bytes = written,
        "heap dump decrypted"
    );
    Ok(written)
}
