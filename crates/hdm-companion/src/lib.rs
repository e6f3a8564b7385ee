//! hdm-companion: operator-side decryption of collected heap dumps
//!
//! - `config`: optional TOML defaults (`~/.heap-dump-companion.toml`)
//! - `decrypt`: unwrap the data key via the transit engine, decrypt the payload

pub mod config;
pub mod decrypt;

pub use config::CompanionConfig;
pub use decrypt::{decrypt_heap_dump, DecryptJob};
