//! hdm-crypto: streaming envelope payload encryption for heap dumps
//!
//! Each dump is sealed with a per-file data key (AES-128/192/256-GCM, chosen
//! by key length). The payload is cut into 64 KiB chunks and every chunk is
//! sealed under its own nonce, so memory use stays constant regardless of
//! dump size.
//!
//! Encrypted stream format (binary):
//! ```text
//! [12 bytes: random base nonce N]
//! [chunk 0: ciphertext || 16-byte tag] ... [final chunk: ciphertext || 16-byte tag]
//!
//! nonce(i) = N XOR (0x00000000 || i as u64 big-endian)
//! AAD(i)   = 0x01 for the final chunk, 0x00 otherwise
//! ```
//!
//! Every chunk except the last carries exactly [`CHUNK_SIZE`] plaintext bytes.
//! The last chunk carries fewer (possibly zero), so it is always present and
//! a stream cut at a chunk boundary fails to decrypt.

pub mod error;
pub mod key;
pub mod stream;

pub use error::CryptoError;
pub use key::{generate_data_key, DataKey};
pub use stream::{decrypt, decrypt_file, encrypt, encrypt_file, EncryptSummary};

/// Plaintext bytes per sealed chunk (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Key lengths accepted by [`DataKey`]: AES-128, AES-192 and AES-256
pub const VALID_KEY_SIZES: [usize; 3] = [16, 24, 32];

/// Length of the data key issued by the signing service (AES-256)
pub const ISSUED_KEY_SIZE: usize = 32;
