//! Chunked streaming cipher for file bodies
//!
//! Wire format of an encrypted file body:
//! ```text
//! [24 bytes: header]
//! [chunk 0: XChaCha20-Poly1305(tag_byte || plaintext_0) + 16-byte tag]
//! [chunk 1: ...]
//! ...
//! [chunk n: tag_byte = FINAL]
//! ```
//!
//! The header is random and non-secret. A per-stream subkey is derived with
//! HKDF-SHA256(ikm = file key, salt = header), and chunk `i` is sealed with
//! nonce `header[..16] || i as u64 (LE)`. The counter binds each chunk to its
//! position; the encrypted tag byte marks the terminal chunk. Reordering,
//! splicing from another stream, or dropping the tail all fail: the first
//! two at authentication, the last at [`DecryptionStream::finish`].
//!
//! Every ciphertext chunk is exactly [`STREAM_CHUNK_OVERHEAD`] bytes larger
//! than its plaintext.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::secret::NodeKey;
use crate::{KEY_SIZE, NONCE_SIZE, STREAM_CHUNK_OVERHEAD, STREAM_HEADER_SIZE};

const TAG_MESSAGE: u8 = 0x00;
const TAG_FINAL: u8 = 0x03;

const NONCE_PREFIX_SIZE: usize = 16;
const STREAM_DOMAIN: &[u8] = b"nimbus-stream-v1";

/// First bytes of every encrypted file body. Public, but must arrive unaltered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader([u8; STREAM_HEADER_SIZE]);

impl StreamHeader {
    fn generate() -> Self {
        let mut bytes = [0u8; STREAM_HEADER_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; STREAM_HEADER_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::Malformed(format!(
                "stream header must be {STREAM_HEADER_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; STREAM_HEADER_SIZE] {
        &self.0
    }
}

/// State shared by both directions: subkey, nonce prefix, chunk counter.
struct StreamCore {
    subkey: Zeroizing<[u8; KEY_SIZE]>,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u64,
    finished: bool,
}

impl StreamCore {
    fn new(file_key: &NodeKey, header: &StreamHeader) -> CryptoResult<Self> {
        let hkdf = Hkdf::<Sha256>::new(Some(header.as_bytes()), file_key.as_bytes());
        let mut subkey = Zeroizing::new([0u8; KEY_SIZE]);
        hkdf.expand(STREAM_DOMAIN, subkey.as_mut())
            .map_err(|e| CryptoError::Kdf(format!("stream subkey derivation failed: {e}")))?;

        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&header.as_bytes()[..NONCE_PREFIX_SIZE]);

        Ok(Self {
            subkey,
            nonce_prefix,
            counter: 0,
            finished: false,
        })
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(self.subkey.as_ref().into())
    }

    fn nonce(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..NONCE_PREFIX_SIZE].copy_from_slice(&self.nonce_prefix);
        nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&self.counter.to_le_bytes());
        nonce
    }

    fn advance(&mut self) -> CryptoResult<()> {
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| CryptoError::Malformed("stream chunk counter exhausted".into()))?;
        Ok(())
    }
}

/// Encrypting half of a stream. Owned by exactly one file upload.
pub struct EncryptionStream {
    core: StreamCore,
}

/// Decrypting half of a stream. Owned by exactly one download/preview.
pub struct DecryptionStream {
    core: StreamCore,
}

impl std::fmt::Debug for EncryptionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionStream")
            .field("chunks", &self.core.counter)
            .field("finished", &self.core.finished)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for DecryptionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionStream")
            .field("chunks", &self.core.counter)
            .field("finished", &self.core.finished)
            .finish_non_exhaustive()
    }
}

/// One decrypted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledChunk {
    pub plaintext: Vec<u8>,
    pub is_final: bool,
}

/// Start encrypting a file body under `file_key`.
///
/// The returned header must be sent verbatim before the first chunk.
pub fn init_encryption(file_key: &NodeKey) -> CryptoResult<(EncryptionStream, StreamHeader)> {
    let header = StreamHeader::generate();
    let core = StreamCore::new(file_key, &header)?;
    Ok((EncryptionStream { core }, header))
}

/// Start decrypting a file body whose first bytes were `header`.
pub fn init_decryption(header: &[u8], file_key: &NodeKey) -> CryptoResult<DecryptionStream> {
    let header = StreamHeader::from_slice(header)?;
    let core = StreamCore::new(file_key, &header)?;
    Ok(DecryptionStream { core })
}

impl EncryptionStream {
    /// Encrypt the next chunk. The last chunk of the file must set `is_final`.
    pub fn push_chunk(&mut self, plaintext: &[u8], is_final: bool) -> CryptoResult<Vec<u8>> {
        if self.core.finished {
            return Err(CryptoError::StreamFinished);
        }

        let mut buf = Vec::with_capacity(plaintext.len() + STREAM_CHUNK_OVERHEAD);
        buf.push(if is_final { TAG_FINAL } else { TAG_MESSAGE });
        buf.extend_from_slice(plaintext);

        let nonce = self.core.nonce();
        self.core
            .cipher()
            .encrypt_in_place(XNonce::from_slice(&nonce), &[], &mut buf)
            .map_err(|_| CryptoError::Malformed("stream chunk encryption failed".into()))?;

        self.core.advance()?;
        self.core.finished = is_final;
        Ok(buf)
    }

    pub fn is_finished(&self) -> bool {
        self.core.finished
    }

    /// Number of chunks pushed so far.
    pub fn chunks(&self) -> u64 {
        self.core.counter
    }
}

impl DecryptionStream {
    /// Decrypt the next chunk, in stream order.
    pub fn pull_chunk(&mut self, ciphertext: &[u8]) -> CryptoResult<PulledChunk> {
        if self.core.finished {
            return Err(CryptoError::Authentication("data after the final chunk"));
        }
        if ciphertext.len() < STREAM_CHUNK_OVERHEAD {
            return Err(CryptoError::Malformed(format!(
                "stream chunk too short: {} bytes (minimum {STREAM_CHUNK_OVERHEAD})",
                ciphertext.len()
            )));
        }

        let mut buf = ciphertext.to_vec();
        let nonce = self.core.nonce();
        self.core
            .cipher()
            .decrypt_in_place(XNonce::from_slice(&nonce), &[], &mut buf)
            .map_err(|_| {
                CryptoError::Authentication(
                    "stream chunk failed authentication: altered, reordered, or foreign chunk",
                )
            })?;

        let is_final = match buf[0] {
            TAG_MESSAGE => false,
            TAG_FINAL => true,
            other => {
                return Err(CryptoError::Malformed(format!(
                    "unknown stream chunk tag {other:#04x}"
                )))
            }
        };
        buf.drain(..1);

        self.core.advance()?;
        self.core.finished = is_final;
        Ok(PulledChunk {
            plaintext: buf,
            is_final,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.core.finished
    }

    /// Number of chunks pulled so far.
    pub fn chunks(&self) -> u64 {
        self.core.counter
    }

    /// Confirm the stream ended properly. Call once the source is exhausted.
    pub fn finish(&self) -> CryptoResult<()> {
        if self.core.finished {
            Ok(())
        } else {
            Err(CryptoError::Truncated)
        }
    }
}
