//! Chunked AES-GCM encryption/decryption over `Read`/`Write`
//!
//! Memory use is bounded by one chunk buffer regardless of payload size.
//! See the crate docs for the on-disk format.

use aes_gcm::{
    aead::{consts::U12, Aead, KeyInit, Payload},
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm, Nonce,
};
use rand::RngCore;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tracing::debug;

use crate::key::DataKey;
use crate::{CryptoError, CHUNK_SIZE, NONCE_SIZE, TAG_SIZE};

type Aes192Gcm = AesGcm<Aes192, U12>;

const SEALED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

const AAD_MORE: [u8; 1] = [0x00];
const AAD_FINAL: [u8; 1] = [0x01];

/// Result of encrypting one payload
#[derive(Debug, Clone)]
pub struct EncryptSummary {
    /// Base nonce written at the head of the stream
    pub nonce: [u8; NONCE_SIZE],
    pub plaintext_bytes: u64,
    pub ciphertext_bytes: u64,
    pub chunks: u64,
}

enum ChunkCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl ChunkCipher {
    fn new(key: &DataKey) -> Result<Self, CryptoError> {
        let bytes = key.as_bytes();
        let invalid = |_| CryptoError::InvalidKeyLength(bytes.len());
        match bytes.len() {
            16 => Aes128Gcm::new_from_slice(bytes).map(Self::Aes128).map_err(invalid),
            24 => Aes192Gcm::new_from_slice(bytes).map(Self::Aes192).map_err(invalid),
            32 => Aes256Gcm::new_from_slice(bytes).map(Self::Aes256).map_err(invalid),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    fn seal(
        &self,
        nonce: &[u8; NONCE_SIZE],
        last: bool,
        chunk: u64,
        msg: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg,
            aad: if last { &AAD_FINAL[..] } else { &AAD_MORE[..] },
        };
        let sealed = match self {
            Self::Aes128(c) => c.encrypt(nonce, payload),
            Self::Aes192(c) => c.encrypt(nonce, payload),
            Self::Aes256(c) => c.encrypt(nonce, payload),
        };
        sealed.map_err(|_| CryptoError::Seal { chunk })
    }

    fn open(
        &self,
        nonce: &[u8; NONCE_SIZE],
        last: bool,
        chunk: u64,
        sealed: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: sealed,
            aad: if last { &AAD_FINAL[..] } else { &AAD_MORE[..] },
        };
        let opened = match self {
            Self::Aes128(c) => c.decrypt(nonce, payload),
            Self::Aes192(c) => c.decrypt(nonce, payload),
            Self::Aes256(c) => c.decrypt(nonce, payload),
        };
        opened.map_err(|_| CryptoError::Authentication { chunk })
    }
}

/// Derive the nonce of chunk `index` from the stream's base nonce.
fn chunk_nonce(base: &[u8; NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (b, c) in nonce[NONCE_SIZE - 8..].iter_mut().zip(index.to_be_bytes()) {
        *b ^= c;
    }
    nonce
}

/// Fill `buf` from `reader`, stopping early only at EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypt everything `reader` yields into `writer`.
///
/// A fresh random base nonce is generated per call and written once at the
/// head of the output, followed by the sealed chunks.
pub fn encrypt<R: Read, W: Write>(
    key: &DataKey,
    mut reader: R,
    mut writer: W,
) -> Result<EncryptSummary, CryptoError> {
    let cipher = ChunkCipher::new(key)?;

    let mut base = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut base);
    writer
        .write_all(&base)
        .map_err(CryptoError::io("writing nonce header"))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut summary = EncryptSummary {
        nonce: base,
        plaintext_bytes: 0,
        ciphertext_bytes: NONCE_SIZE as u64,
        chunks: 0,
    };

    loop {
        let n = read_full(&mut reader, &mut buf).map_err(CryptoError::io("reading plaintext"))?;
        let last = n < CHUNK_SIZE;
        let index = summary.chunks;

        let sealed = cipher.seal(&chunk_nonce(&base, index), last, index, &buf[..n])?;
        writer
            .write_all(&sealed)
            .map_err(CryptoError::io("writing ciphertext"))?;

        summary.plaintext_bytes += n as u64;
        summary.ciphertext_bytes += sealed.len() as u64;
        summary.chunks += 1;

        if last {
            break;
        }
    }

    writer.flush().map_err(CryptoError::io("flushing ciphertext"))?;
    Ok(summary)
}

/// Decrypt a stream produced by [`encrypt`] into `writer`.
///
/// Only authenticated chunks are ever written, but a failure late in the
/// stream leaves earlier chunks in `writer`. Use [`decrypt_file`] when no
/// partial plaintext may survive a failure.
pub fn decrypt<R: Read, W: Write>(
    key: &DataKey,
    mut reader: R,
    mut writer: W,
) -> Result<u64, CryptoError> {
    let cipher = ChunkCipher::new(key)?;

    let mut base = [0u8; NONCE_SIZE];
    let n = read_full(&mut reader, &mut base).map_err(CryptoError::io("reading nonce header"))?;
    if n < NONCE_SIZE {
        return Err(CryptoError::Truncated(format!(
            "nonce header is {n} bytes, expected {NONCE_SIZE}"
        )));
    }

    let mut buf = vec![0u8; SEALED_CHUNK_SIZE];
    let mut index = 0u64;
    let mut written = 0u64;

    loop {
        let n = read_full(&mut reader, &mut buf).map_err(CryptoError::io("reading ciphertext"))?;
        if n < TAG_SIZE {
            return Err(CryptoError::Truncated(format!(
                "stream ended before the final chunk (chunk {index} has {n} bytes)"
            )));
        }
        // A short read means EOF, so only the final chunk can be short.
        let last = n < SEALED_CHUNK_SIZE;

        let plain = cipher.open(&chunk_nonce(&base, index), last, index, &buf[..n])?;
        writer
            .write_all(&plain)
            .map_err(CryptoError::io("writing plaintext"))?;

        written += plain.len() as u64;
        index += 1;

        if last {
            break;
        }
    }

    writer.flush().map_err(CryptoError::io("flushing plaintext"))?;
    Ok(written)
}

/// Encrypt `src` into `dst`.
///
/// Output is staged in a temporary file next to `dst` and only renamed into
/// place once the whole payload is sealed.
pub fn encrypt_file(
    key: &DataKey,
    src: &Path,
    dst: &Path,
) -> Result<EncryptSummary, CryptoError> {
    let input = File::open(src).map_err(CryptoError::io("opening plaintext file"))?;
    let mut staged = stage_next_to(dst)?;

    let summary = {
        let writer = BufWriter::new(staged.as_file_mut());
        encrypt(key, BufReader::new(input), writer)?
    };

    staged
        .persist(dst)
        .map_err(|e| CryptoError::Io {
            op: "publishing ciphertext file",
            source: e.error,
        })?;

    debug!(
        src = %src.display(),
        dst = %dst.display(),
        bytes = summary.plaintext_bytes,
        chunks = summary.chunks,
        "encrypted file"
    );
    Ok(summary)
}

/// Decrypt `src` into `dst`, failing closed.
///
/// Plaintext is staged in a temporary file next to `dst`; on any error the
/// staging file is removed and `dst` is never created.
pub fn decrypt_file(key: &DataKey, src: &Path, dst: &Path) -> Result<u64, CryptoError> {
    let input = File::open(src).map_err(CryptoError::io("opening ciphertext file"))?;
    let mut staged = stage_next_to(dst)?;

    let written = {
        let writer = BufWriter::new(staged.as_file_mut());
        decrypt(key, BufReader::new(input), writer)?
    };

    staged
        .persist(dst)
        .map_err(|e| CryptoError::Io {
            op: "publishing plaintext file",
            source: e.error,
        })?;

    debug!(src = %src.display(), dst = %dst.display(), bytes = written, "decrypted file");
    Ok(written)
}

fn stage_next_to(dst: &Path) -> Result<tempfile::NamedTempFile, CryptoError> {
    let dir = dst
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tempfile::Builder::new()
        .prefix(".hdm-staging-")
        .tempfile_in(dir)
        .map_err(CryptoError::io("creating staging file"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_data_key;

    fn make_data(size: usize) -> Vec<u8> {
        (0..size)
            .map(|i| (i.wrapping_mul(31) ^ (i >> 5)) as u8)
            .collect()
    }

    fn seal(key: &DataKey, plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt(key, plaintext, &mut out).unwrap();
        out
    }

    fn open(key: &DataKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::new();
        decrypt(key, ciphertext, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip_all_key_sizes_and_boundaries() {
        let lengths = [
            0,
            1,
            CHUNK_SIZE - 1,
            CHUNK_SIZE,
            CHUNK_SIZE + 1,
            2 * CHUNK_SIZE,
            3 * CHUNK_SIZE + 17,
        ];
        for key_size in [16usize, 24, 32] {
            let key = DataKey::from_slice(&vec![0x5Au8; key_size]).unwrap();
            for len in lengths {
                let plaintext = make_data(len);
                let decrypted = open(&key, &seal(&key, &plaintext)).unwrap();
                assert_eq!(decrypted, plaintext, "key {key_size}, len {len}");
            }
        }
    }

    #[test]
    fn test_ciphertext_layout() {
        let key = generate_data_key();
        for (len, chunks) in [(0, 1), (100, 1), (CHUNK_SIZE, 2), (CHUNK_SIZE + 5, 2)] {
            let plaintext = make_data(len);
            let mut out = Vec::new();
            let summary = encrypt(&key, plaintext.as_slice(), &mut out).unwrap();

            assert_eq!(summary.chunks, chunks);
            assert_eq!(summary.plaintext_bytes, len as u64);
            assert_eq!(out.len(), NONCE_SIZE + len + chunks as usize * TAG_SIZE);
            assert_eq!(summary.ciphertext_bytes, out.len() as u64);
            assert_eq!(&out[..NONCE_SIZE], &summary.nonce);
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = generate_data_key();
        let a = seal(&key, b"same payload");
        let b = seal(&key, b"same payload");
        assert_ne!(&a[..NONCE_SIZE], &b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_chunk_nonces_distinct() {
        let base = [0xEEu8; NONCE_SIZE];
        let n0 = chunk_nonce(&base, 0);
        let n1 = chunk_nonce(&base, 1);
        let n2 = chunk_nonce(&base, 1 << 40);
        assert_eq!(n0, base);
        assert_ne!(n0, n1);
        assert_ne!(n1, n2);
        assert_eq!(&n1[..4], &base[..4]);
    }

    #[test]
    fn test_identical_chunks_differ_on_disk() {
        let key = generate_data_key();
        let plaintext = vec![0u8; 2 * CHUNK_SIZE];
        let out = seal(&key, &plaintext);
        let first = &out[NONCE_SIZE..NONCE_SIZE + SEALED_CHUNK_SIZE];
        let second = &out[NONCE_SIZE + SEALED_CHUNK_SIZE..NONCE_SIZE + 2 * SEALED_CHUNK_SIZE];
        assert_ne!(first, second, "equal plaintext chunks must not share a nonce");
    }

    #[test]
    fn test_wrong_key() {
        let plaintext = make_data(1000);
        let out = seal(&generate_data_key(), &plaintext);
        let err = open(&generate_data_key(), &out).unwrap_err();
        assert!(matches!(err, CryptoError::Authentication { chunk: 0 }));
    }

    #[test]
    fn test_tampered_bytes() {
        let key = generate_data_key();
        let out = seal(&key, &make_data(CHUNK_SIZE + 300));
        for pos in [0, NONCE_SIZE - 1, NONCE_SIZE, NONCE_SIZE + CHUNK_SIZE, out.len() - 1] {
            let mut tampered = out.clone();
            tampered[pos] ^= 0x01;
            let err = open(&key, &tampered).unwrap_err();
            assert!(
                matches!(err, CryptoError::Authentication { .. }),
                "flip at {pos} gave {err}"
            );
        }
    }

    #[test]
    fn test_truncated_at_chunk_boundary() {
        let key = generate_data_key();
        let out = seal(&key, &make_data(2 * CHUNK_SIZE + 10));
        // drop the final chunk; what remains is a sequence of full chunks
        let cut = NONCE_SIZE + 2 * SEALED_CHUNK_SIZE;
        let err = open(&key, &out[..cut]).unwrap_err();
        assert!(matches!(err, CryptoError::Truncated(_)), "got {err}");
    }

    #[test]
    fn test_truncated_mid_chunk() {
        let key = generate_data_key();
        let out = seal(&key, &make_data(CHUNK_SIZE + 10));
        let err = open(&key, &out[..out.len() - 3]).unwrap_err();
        assert!(err.is_integrity_failure());
    }

    #[test]
    fn test_missing_header() {
        let key = generate_data_key();
        let err = open(&key, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CryptoError::Truncated(_)));
    }

    #[test]
    fn test_appended_garbage() {
        let key = generate_data_key();
        let mut out = seal(&key, &make_data(500));
        out.extend_from_slice(b"trailing");
        let err = open(&key, &out).unwrap_err();
        assert!(matches!(err, CryptoError::Authentication { .. }));
    }

    #[test]
    fn test_reordered_chunks() {
        let key = generate_data_key();
        let plaintext: Vec<u8> = (0..3 * CHUNK_SIZE).map(|i| (i / CHUNK_SIZE) as u8).collect();
        let out = seal(&key, &plaintext);

        let mut swapped = out.clone();
        let a = NONCE_SIZE..NONCE_SIZE + SEALED_CHUNK_SIZE;
        let b = NONCE_SIZE + SEALED_CHUNK_SIZE..NONCE_SIZE + 2 * SEALED_CHUNK_SIZE;
        swapped[a.clone()].copy_from_slice(&out[b.clone()]);
        swapped[b].copy_from_slice(&out[a]);

        let err = open(&key, &swapped).unwrap_err();
        assert!(matches!(err, CryptoError::Authentication { chunk: 0 }));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("heap.hprof");
        let enc = dir.path().join("heap.hprof.crypted");
        let dec = dir.path().join("heap.out");
        let plaintext = make_data(3 * CHUNK_SIZE + 99);
        std::fs::write(&src, &plaintext).unwrap();

        let key = generate_data_key();
        let summary = encrypt_file(&key, &src, &enc).unwrap();
        assert_eq!(summary.plaintext_bytes, plaintext.len() as u64);

        let written = decrypt_file(&key, &enc, &dec).unwrap();
        assert_eq!(written, plaintext.len() as u64);
        assert_eq!(std::fs::read(&dec).unwrap(), plaintext);
    }

    #[test]
    fn test_decrypt_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("heap.hprof");
        let enc = dir.path().join("heap.hprof.crypted");
        let dec = dir.path().join("heap.out");
        std::fs::write(&src, make_data(2 * CHUNK_SIZE + 1)).unwrap();

        let key = generate_data_key();
        encrypt_file(&key, &src, &enc).unwrap();

        // corrupt only the final chunk so the first two authenticate fine
        let mut bytes = std::fs::read(&enc).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        std::fs::write(&enc, &bytes).unwrap();

        let err = decrypt_file(&key, &enc, &dec).unwrap_err();
        assert!(matches!(err, CryptoError::Authentication { chunk: 2 }));
        assert!(!dec.exists(), "no plaintext may be published on failure");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".hdm-staging-"))
            .collect();
        assert!(leftovers.is_empty(), "staging file must be cleaned up");
    }

    #[test]
    fn test_encrypt_file_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("out.crypted");
        let err = encrypt_file(&generate_data_key(), &dir.path().join("nope"), &dst).unwrap_err();
        assert!(matches!(err, CryptoError::Io { .. }));
        assert!(!dst.exists());
    }
}
