use serde::{Deserialize, Serialize};

/// Body of the signing request sent to the heap dump service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    pub tenant: String,
    pub namespace: String,
    #[serde(rename = "filename")]
    pub file_name: String,
}

/// Per-file envelope returned by the signing service.
///
/// `aes_key` is the plaintext data key (base64). It lives in memory only;
/// `encrypted_aes_key` is its transit-wrapped form and is the only one that
/// ever touches disk.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningEnvelope {
    /// Presigned PUT URL for the encrypted payload
    pub url: String,
    #[serde(rename = "encrypted-aes-key")]
    pub encrypted_aes_key: String,
    /// Presigned PUT URL for the wrapped key
    #[serde(rename = "encrypted-aes-key-url")]
    pub encrypted_aes_key_url: String,
    #[serde(rename = "aes-key")]
    pub aes_key: String,
}

impl std::fmt::Debug for SigningEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningEnvelope")
            .field("url", &self.url)
            .field("encrypted_aes_key", &self.encrypted_aes_key)
            .field("encrypted_aes_key_url", &self.encrypted_aes_key_url)
            .field("aes_key", &"[REDACTED]")
            .finish()
    }
}
