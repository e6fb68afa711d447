//! Integration tests across the key hierarchy, node keys, metadata, and streams.

use nimbus_crypto::{
    decrypt_metadata, decrypt_required_keys, encrypt_metadata, generate_node_key,
    generate_required_keys, init_decryption, init_encryption, recover_with_mnemonic,
    rewrap_node_key, unwrap_node_key, CryptoError, KdfParams, NodeKey, NodeMetadata,
};
use secrecy::SecretString;

const FAST: KdfParams = KdfParams::new(1, 1024);

#[test]
fn metadata_under_master_key_scenario() {
    let password = SecretString::from("correct horse battery staple");
    let generated = generate_required_keys(&password, &FAST).unwrap();
    let master_as_key = NodeKey::from_bytes(*generated.keys.master_key.as_bytes());

    let meta = NodeMetadata::file("a.txt", 0);
    let bundle = encrypt_metadata(&master_as_key, &meta).unwrap();
    assert_eq!(decrypt_metadata(&master_as_key, &bundle).unwrap(), meta);

    let other = generate_required_keys(&password, &FAST).unwrap();
    let other_key = NodeKey::from_bytes(*other.keys.master_key.as_bytes());
    assert!(matches!(
        decrypt_metadata(&other_key, &bundle),
        Err(CryptoError::Authentication(_))
    ));
}

#[test]
fn root_node_metadata_scenario() {
    let password = SecretString::from("correct horse battery staple");
    let generated = generate_required_keys(&password, &FAST).unwrap();
    let master = &generated.keys.master_key;

    let (node_key, key_bundle) = generate_node_key(master.into()).unwrap();
    let bundle = encrypt_metadata(&node_key, &NodeMetadata::file("a.txt", 0)).unwrap();

    // unlock from scratch, as a later login would
    let unlocked = decrypt_required_keys(&password, &generated.crypto_properties).unwrap();
    let reopened = unwrap_node_key((&unlocked.master_key).into(), &key_bundle).unwrap();
    let json = serde_json::to_string(&decrypt_metadata(&reopened, &bundle).unwrap()).unwrap();
    assert_eq!(json, r#"{"name":"a.txt","size":0}"#);

    let stranger = generate_required_keys(&password, &FAST).unwrap();
    assert!(unwrap_node_key((&stranger.keys.master_key).into(), &key_bundle).is_err());
}

#[test]
fn recovered_account_still_opens_file_bodies() {
    let generated = generate_required_keys(&SecretString::from("lost"), &FAST).unwrap();
    let master = &generated.keys.master_key;
    let (folder_key, folder_bundle) = generate_node_key(master.into()).unwrap();
    let (file_key, file_bundle) = generate_node_key((&folder_key).into()).unwrap();

    let (mut enc, header) = init_encryption(&file_key).unwrap();
    let chunk = enc.push_chunk(b"body survives recovery", true).unwrap();

    let props = recover_with_mnemonic(
        &generated.recovery_mnemonic,
        &SecretString::from("found"),
        &generated.crypto_properties,
        &FAST,
    )
    .unwrap();
    let unlocked = decrypt_required_keys(&SecretString::from("found"), &props).unwrap();

    let folder = unwrap_node_key((&unlocked.master_key).into(), &folder_bundle).unwrap();
    let file = unwrap_node_key((&folder).into(), &file_bundle).unwrap();
    let mut dec = init_decryption(header.as_bytes(), &file).unwrap();
    assert_eq!(dec.pull_chunk(&chunk).unwrap().plaintext, b"body survives recovery");
    dec.finish().unwrap();
}

#[test]
fn moved_file_body_decrypts_unchanged() {
    let generated = generate_required_keys(&SecretString::from("pw"), &FAST).unwrap();
    let master = &generated.keys.master_key;
    let (src, _) = generate_node_key(master.into()).unwrap();
    let (dst, _) = generate_node_key(master.into()).unwrap();
    let (file_key, _) = generate_node_key((&src).into()).unwrap();

    let (mut enc, header) = init_encryption(&file_key).unwrap();
    let c0 = enc.push_chunk(b"first ", false).unwrap();
    let c1 = enc.push_chunk(b"second", true).unwrap();

    let moved = rewrap_node_key((&dst).into(), &file_key).unwrap();
    let after = unwrap_node_key((&dst).into(), &moved).unwrap();
    assert_eq!(after.as_bytes(), file_key.as_bytes());

    let mut dec = init_decryption(header.as_bytes(), &after).unwrap();
    let mut body = dec.pull_chunk(&c0).unwrap().plaintext;
    body.extend(dec.pull_chunk(&c1).unwrap().plaintext);
    assert_eq!(body, b"first second");
}
