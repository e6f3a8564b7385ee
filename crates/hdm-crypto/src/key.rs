//! Per-file data keys

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{CryptoError, ISSUED_KEY_SIZE, VALID_KEY_SIZES};

/// A per-file AES data key of 16, 24 or 32 bytes. Zeroized on drop.
#[derive(Clone)]
pub struct DataKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl DataKey {
    /// Accepts 128, 192 and 256-bit keys; any other length is rejected with
    /// the attempted length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if !VALID_KEY_SIZES.contains(&bytes.len()) {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(Self {
            bytes: Zeroizing::new(bytes.to_vec()),
        })
    }

    /// Decode a standard base64 key as handed out in a signing envelope.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(
            B64.decode(encoded.trim())
                .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?,
        );
        Self::from_slice(&decoded)
    }

    pub fn to_base64(&self) -> String {
        B64.encode(self.bytes.as_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit data key.
pub fn generate_data_key() -> DataKey {
    let mut bytes = Zeroizing::new(vec![0u8; ISSUED_KEY_SIZE]);
    rand::thread_rng().fill_bytes(&mut bytes);
    DataKey { bytes }
}
