use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key size {0}: AES-GCM accepts 16, 24 or 32 byte keys")]
    InvalidKeyLength(usize),

    #[error("data key is not valid base64: {0}")]
    KeyEncoding(String),

    #[error("I/O error while {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("sealing chunk {chunk} failed")]
    Seal { chunk: u64 },

    #[error("authentication failed at chunk {chunk}: wrong key or corrupted ciphertext")]
    Authentication { chunk: u64 },

    #[error("ciphertext truncated: {0}")]
    Truncated(String),
}

impl CryptoError {
    pub(crate) fn io(op: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| CryptoError::Io { op, source }
    }

    /// True for failures caused by the ciphertext itself (tampering,
    /// corruption, truncation or a wrong key).
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::Authentication { .. } | CryptoError::Truncated(_)
        )
    }
}
