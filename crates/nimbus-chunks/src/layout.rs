//! Stream size math
//!
//! For plaintext length `n` and chunk size `C`:
//!   - chunk count: `max(1, ceil(n / C))` (an empty file is one empty final chunk)
//!   - encrypted size: `24 + chunks * 17 + n`
//!
//! Every chunk but the last holds exactly `C` plaintext bytes, so every cipher
//! frame but the last is exactly `C + 17` bytes.

use nimbus_crypto::{DEFAULT_CHUNK_SIZE, STREAM_CHUNK_OVERHEAD, STREAM_HEADER_SIZE};

use crate::FramingError;

const HEADER: u64 = STREAM_HEADER_SIZE as u64;
const OVERHEAD: u64 = STREAM_CHUNK_OVERHEAD as u64;

/// Plaintext chunk size of a stream, and the sizes derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayout {
    chunk_size: usize,
}

impl Default for StreamLayout {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl StreamLayout {
    pub fn new(chunk_size: usize) -> Result<Self, FramingError> {
        if chunk_size == 0 {
            return Err(FramingError::ZeroChunkSize);
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Size of a full ciphertext frame (`chunk_size + 17`)
    pub fn cipher_frame_size(&self) -> usize {
        self.chunk_size + STREAM_CHUNK_OVERHEAD
    }

    /// Number of stream chunks for a plaintext of `plaintext_len` bytes
    pub fn chunk_count(&self, plaintext_len: u64) -> u64 {
        plaintext_len.div_ceil(self.chunk_size as u64).max(1)
    }

    /// Total ciphertext length, header included
    pub fn encrypted_size(&self, plaintext_len: u64) -> u64 {
        HEADER + self.chunk_count(plaintext_len) * OVERHEAD + plaintext_len
    }

    /// Number of upload parts when `frames_per_part` frames go in each part
    pub fn part_count(&self, plaintext_len: u64, frames_per_part: usize) -> u64 {
        self.chunk_count(plaintext_len)
            .div_ceil(frames_per_part.max(1) as u64)
    }

    /// Inverse of [`encrypted_size`](Self::encrypted_size).
    ///
    /// Fails for lengths this layout can never produce, which catches a
    /// mismatched chunk size before any decryption is attempted.
    pub fn plaintext_size(&self, encrypted_len: u64) -> Result<u64, FramingError> {
        let invalid = || FramingError::InvalidEncryptedSize(encrypted_len);

        let body = encrypted_len.checked_sub(HEADER).ok_or_else(invalid)?;
        if body < OVERHEAD {
            return Err(invalid());
        }
        let frame = self.cipher_frame_size() as u64;
        let frames = body.div_ceil(frame);
        let plaintext = body.checked_sub(frames * OVERHEAD).ok_or_else(invalid)?;

        if self.encrypted_size(plaintext) != encrypted_len {
            return Err(invalid());
        }
        Ok(plaintext)
    }
}
