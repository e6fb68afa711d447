//! Streaming pipelines between byte streams and the cipher engine
//!
//! Upload:   reader → FrameAligner(C) → push_chunk → PartCoalescer → transport
//! Download: reader → header → FrameAligner(C + 17) → pull_chunk → writer
//!
//! Memory stays bounded by one read buffer, one frame, and one upload part.
//! Dropping either future mid-way discards the stream state; nothing is
//! persisted except parts already handed to the transport, and those belong
//! to an upload that is never completed.

use bytes::Bytes;
use nimbus_chunks::{FrameAligner, FramingError, PartCoalescer, StreamLayout, UploadPart};
use nimbus_core::types::CompletedPart;
use nimbus_core::{NimbusError, NimbusResult};
use nimbus_crypto::{CryptoError, NodeKey, StreamHeader, STREAM_HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::backend::UploadTransport;
use crate::engine::CipherEngine;

/// Progress callback type (bytes_done, message)
pub type ProgressFn = Box<dyn Fn(u64, &str) + Send + Sync>;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Result of encrypting and uploading one file body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub upload_id: String,
    /// Storage URL returned by the transport on completion
    pub url: String,
    pub parts: Vec<CompletedPart>,
    pub plaintext_size: u64,
    pub encrypted_size: u64,
}

fn framing_error(e: FramingError) -> NimbusError {
    NimbusError::Config(e.to_string())
}

/// Encrypt everything `reader` yields and upload it as a multipart object.
///
/// On any failure the upload is aborted on the transport before the error
/// is returned.
pub async fn encrypt_upload<R, T>(
    engine: &CipherEngine,
    reader: R,
    file_key: &NodeKey,
    layout: StreamLayout,
    frames_per_part: usize,
    transport: &T,
    progress: Option<&ProgressFn>,
) -> NimbusResult<UploadSummary>
where
    R: AsyncRead + Unpin,
    T: UploadTransport,
{
    let upload_id = transport.begin_upload().await?;
    debug!(upload_id = %upload_id, chunk_size = layout.chunk_size(), "upload started");

    match upload_body(
        engine,
        reader,
        file_key,
        layout,
        frames_per_part,
        transport,
        &upload_id,
        progress,
    )
    .await
    {
        Ok(summary) => {
            info!(
                upload_id = %summary.upload_id,
                parts = summary.parts.len(),
                bytes = summary.plaintext_size,
                encrypted_bytes = summary.encrypted_size,
                "uploaded"
            );
            Ok(summary)
        }
        Err(e) => {
            warn!(upload_id = %upload_id, "upload failed, aborting: {e}");
            if let Err(abort_err) = transport.abort_upload(&upload_id).await {
                warn!(upload_id = %upload_id, "abort failed: {abort_err}");
            }
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn upload_body<R, T>(
    engine: &CipherEngine,
    mut reader: R,
    file_key: &NodeKey,
    layout: StreamLayout,
    frames_per_part: usize,
    transport: &T,
    upload_id: &str,
    progress: Option<&ProgressFn>,
) -> NimbusResult<UploadSummary>
where
    R: AsyncRead + Unpin,
    T: UploadTransport,
{
    let (mut stream, header) = engine.init_encryption(file_key.clone()).await?;
    let mut aligner = FrameAligner::new(layout.chunk_size()).map_err(framing_error)?;
    let mut coalescer = PartCoalescer::new(frames_per_part).map_err(framing_error)?;
    coalescer
        .push_header(header.as_bytes())
        .map_err(framing_error)?;

    let mut sink = PartSink {
        transport,
        upload_id,
        parts: Vec::new(),
        bytes: 0,
    };
    let mut plaintext_size = 0u64;
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        plaintext_size += n as u64;

        for frame in aligner.push(&buf[..n]) {
            let (next, ciphertext) = engine.push_chunk(stream, frame, false).await?;
            stream = next;
            if let Some(part) = coalescer.push_frame(&ciphertext) {
                sink.put(part).await?;
            }
        }
        if let Some(report) = progress {
            report(plaintext_size, "encrypting");
        }
    }

    let (stream, ciphertext) = engine.push_chunk(stream, aligner.finish(), true).await?;
    debug_assert!(stream.is_finished());
    debug!(chunks = stream.chunks(), "final chunk encrypted");
    if let Some(part) = coalescer.push_frame(&ciphertext) {
        sink.put(part).await?;
    }
    if let Some(part) = coalescer.finish() {
        sink.put(part).await?;
    }

    let expected = layout.encrypted_size(plaintext_size);
    if sink.bytes != expected {
        return Err(NimbusError::Engine(format!(
            "encrypted {} bytes, layout predicts {expected}",
            sink.bytes
        )));
    }

    let url = transport
        .complete_upload(upload_id, sink.parts.clone())
        .await?;
    if let Some(report) = progress {
        report(plaintext_size, "uploaded");
    }

    Ok(UploadSummary {
        upload_id: upload_id.to_string(),
        url,
        parts: sink.parts,
        plaintext_size,
        encrypted_size: sink.bytes,
    })
}

struct PartSink<'a, T> {
    transport: &'a T,
    upload_id: &'a str,
    parts: Vec<CompletedPart>,
    bytes: u64,
}

impl<T: UploadTransport> PartSink<'_, T> {
    async fn put(&mut self, part: UploadPart) -> NimbusResult<()> {
        let part_number = part.part_number;
        let len = part.data.len() as u64;
        let etag = self.transport.put_part(self.upload_id, part).await?;
        debug!(part = part_number, bytes = len, "part uploaded");
        self.parts.push(CompletedPart { part_number, etag });
        self.bytes += len;
        Ok(())
    }
}

/// Decrypt an encrypted file body from `reader` into `writer`.
///
/// Returns the number of plaintext bytes written. A source that ends before
/// the final chunk fails with [`CryptoError::Truncated`]; plaintext already
/// written to `writer` by then must be discarded by the caller.
pub async fn decrypt_download<R, W>(
    engine: &CipherEngine,
    mut reader: R,
    file_key: &NodeKey,
    layout: StreamLayout,
    mut writer: W,
    progress: Option<&ProgressFn>,
) -> NimbusResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; STREAM_HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => NimbusError::Crypto(CryptoError::Truncated),
            _ => NimbusError::Io(e),
        })?;

    let mut stream = engine
        .init_decryption(StreamHeader::from_slice(&header)?, file_key.clone())
        .await?;
    let mut aligner = FrameAligner::new(layout.cipher_frame_size()).map_err(framing_error)?;
    let mut written = 0u64;
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for frame in aligner.push(&buf[..n]) {
            let (next, chunk) = engine.pull_chunk(stream, frame).await?;
            stream = next;
            writer.write_all(&chunk.plaintext).await?;
            written += chunk.plaintext.len() as u64;
        }
        if let Some(report) = progress {
            report(written, "decrypting");
        }
    }

    let last: Bytes = aligner.finish();
    if !last.is_empty() {
        let (next, chunk) = engine.pull_chunk(stream, last).await?;
        stream = next;
        writer.write_all(&chunk.plaintext).await?;
        written += chunk.plaintext.len() as u64;
    }
    stream.finish()?;
    writer.flush().await?;

    debug!(chunks = stream.chunks(), bytes = written, "download decrypted");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::config::EngineConfig;

    #[tokio::test]
    async fn test_missing_header_is_truncation() {
        let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
        let source: &[u8] = &[0u8; 10];
        let mut out = Vec::new();

        let err = decrypt_download(
            &engine,
            source,
            &NodeKey::generate(),
            StreamLayout::new(16).unwrap(),
            &mut out,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NimbusError::Crypto(CryptoError::Truncated)));
    }

    #[tokio::test]
    async fn test_header_only_is_truncation() {
        let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
        let source: &[u8] = &[0u8; STREAM_HEADER_SIZE];
        let mut out = Vec::new();

        let err = decrypt_download(
            &engine,
            source,
            &NodeKey::generate(),
            StreamLayout::new(16).unwrap(),
            &mut out,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NimbusError::Crypto(CryptoError::Truncated)));
    }
}
