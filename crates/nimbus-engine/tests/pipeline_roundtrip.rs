//! Integration tests for the streaming upload/download pipelines.
//!
//! Runs the encrypt → multipart upload → download → decrypt path against the
//! in-memory object store with deliberately misaligned reads.

mod support;

use std::io::Cursor;

use nimbus_chunks::StreamLayout;
use nimbus_core::config::EngineConfig;
use nimbus_core::NimbusError;
use nimbus_crypto::{CryptoError, NodeKey, STREAM_HEADER_SIZE};
use nimbus_engine::{decrypt_download, encrypt_upload, CipherEngine};
use support::{pattern, ChoppyReader, MemoryStore};

const C: usize = 1024;
const FRAME: usize = C + 17;

fn layout() -> StreamLayout {
    StreamLayout::new(C).unwrap()
}

async fn upload(
    engine: &CipherEngine,
    store: &MemoryStore,
    key: &NodeKey,
    data: &[u8],
) -> Result<String, NimbusError> {
    let summary = encrypt_upload(
        engine,
        ChoppyReader::new(data.to_vec(), 333),
        key,
        layout(),
        2,
        store,
        None,
    )
    .await?;
    assert_eq!(summary.plaintext_size, data.len() as u64);
    assert_eq!(
        summary.encrypted_size,
        layout().encrypted_size(data.len() as u64)
    );
    Ok(summary.url)
}

async fn download(
    engine: &CipherEngine,
    key: &NodeKey,
    ciphertext: Vec<u8>,
) -> Result<Vec<u8>, NimbusError> {
    let mut out = Vec::new();
    decrypt_download(engine, Cursor::new(ciphertext), key, layout(), &mut out, None).await?;
    Ok(out)
}

#[tokio::test]
async fn roundtrip_at_chunk_boundaries() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();

    for n in [0, C - 1, C, C + 1, 5 * C + 1] {
        let store = MemoryStore::default();
        let key = NodeKey::generate();
        let data = pattern(n);

        let url = upload(&engine, &store, &key, &data).await.unwrap();
        let ciphertext = store.object(&url);
        assert_eq!(
            ciphertext.len() as u64,
            layout().encrypted_size(n as u64),
            "n = {n}"
        );

        let plaintext = download(&engine, &key, ciphertext).await.unwrap();
        assert_eq!(plaintext, data, "n = {n}");
    }
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn parts_carry_whole_frames_and_header_once() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
    let store = MemoryStore::default();
    let key = NodeKey::generate();

    // 6 chunks (5 full, 1 byte) → parts of 2, 2, 2 frames
    upload(&engine, &store, &key, &pattern(5 * C + 1))
        .await
        .unwrap();

    assert_eq!(
        store.part_sizes(),
        vec![STREAM_HEADER_SIZE + 2 * FRAME, 2 * FRAME, FRAME + 1 + 17]
    );
}

#[tokio::test]
async fn empty_file_is_header_plus_one_empty_chunk() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
    let store = MemoryStore::default();
    let key = NodeKey::generate();

    let url = upload(&engine, &store, &key, b"").await.unwrap();
    assert_eq!(store.object(&url).len(), STREAM_HEADER_SIZE + 17);
    assert_eq!(store.part_sizes().len(), 1);
}

#[tokio::test]
async fn single_byte_tamper_is_detected() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
    let store = MemoryStore::default();
    let key = NodeKey::generate();
    let url = upload(&engine, &store, &key, &pattern(3 * C)).await.unwrap();
    let original = store.object(&url);

    for offset in [0, STREAM_HEADER_SIZE, STREAM_HEADER_SIZE + FRAME + 5, original.len() - 1] {
        let mut tampered = original.clone();
        tampered[offset] ^= 0x01;
        let err = download(&engine, &key, tampered).await.unwrap_err();
        assert!(err.is_integrity_failure(), "offset {offset}: {err}");
    }
}

#[tokio::test]
async fn truncated_at_frame_boundary_is_rejected() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
    let store = MemoryStore::default();
    let key = NodeKey::generate();
    let url = upload(&engine, &store, &key, &pattern(3 * C)).await.unwrap();

    let mut ciphertext = store.object(&url);
    ciphertext.truncate(STREAM_HEADER_SIZE + 2 * FRAME);

    let err = download(&engine, &key, ciphertext).await.unwrap_err();
    assert!(matches!(err, NimbusError::Crypto(CryptoError::Truncated)));
}

#[tokio::test]
async fn reordered_frames_are_rejected() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
    let store = MemoryStore::default();
    let key = NodeKey::generate();
    let url = upload(&engine, &store, &key, &pattern(3 * C)).await.unwrap();

    let ciphertext = store.object(&url);
    let frames: Vec<&[u8]> = ciphertext[STREAM_HEADER_SIZE..].chunks(FRAME).collect();
    let mut swapped = ciphertext[..STREAM_HEADER_SIZE].to_vec();
    swapped.extend_from_slice(frames[1]);
    swapped.extend_from_slice(frames[0]);
    swapped.extend_from_slice(frames[2]);

    let err = download(&engine, &key, swapped).await.unwrap_err();
    assert!(matches!(
        err,
        NimbusError::Crypto(CryptoError::Authentication(_))
    ));
}

#[tokio::test]
async fn appended_data_is_rejected() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
    let store = MemoryStore::default();
    let key = NodeKey::generate();
    let url = upload(&engine, &store, &key, &pattern(C + 10)).await.unwrap();

    let mut ciphertext = store.object(&url);
    ciphertext.extend_from_slice(&[0u8; 40]);
    assert!(download(&engine, &key, ciphertext).await.is_err());
}

#[tokio::test]
async fn wrong_chunk_size_fails_to_decrypt() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
    let store = MemoryStore::default();
    let key = NodeKey::generate();
    let url = upload(&engine, &store, &key, &pattern(4 * C)).await.unwrap();

    let mut out = Vec::new();
    let result = decrypt_download(
        &engine,
        Cursor::new(store.object(&url)),
        &key,
        StreamLayout::new(C / 2).unwrap(),
        &mut out,
        None,
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn failed_part_aborts_upload() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
    let store = MemoryStore::failing_on_part(2);
    let key = NodeKey::generate();

    let err = upload(&engine, &store, &key, &pattern(5 * C + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, NimbusError::Transport(_)));
    assert!(err.is_retryable());
    assert_eq!(store.aborted_count(), 1);
    assert_eq!(store.open_upload_count(), 0);
    assert_eq!(store.object_count(), 0);
}

#[tokio::test]
async fn concurrent_streams_on_one_engine_stay_independent() {
    let engine = CipherEngine::start(&EngineConfig::default()).unwrap();
    let store = MemoryStore::default();
    let key_a = NodeKey::generate();
    let key_b = NodeKey::generate();
    let data_a = pattern(3 * C + 7);
    let data_b: Vec<u8> = pattern(2 * C).into_iter().rev().collect();

    let (url_a, url_b) = tokio::join!(
        upload(&engine, &store, &key_a, &data_a),
        upload(&engine, &store, &key_b, &data_b),
    );

    let out_a = download(&engine, &key_a, store.object(&url_a.unwrap()))
        .await
        .unwrap();
    let out_b = download(&engine, &key_b, store.object(&url_b.unwrap()))
        .await
        .unwrap();
    assert_eq!(out_a, data_a);
    assert_eq!(out_b, data_b);
}
