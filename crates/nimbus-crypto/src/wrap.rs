//! Symmetric key wrapping with XChaCha20-Poly1305
//!
//! A [`KeyBundle`] is `{ nonce, encryptedKey }`: one secret sealed under
//! another key with a fresh random 192-bit nonce. Opening it with the wrong
//! key fails the Poly1305 check; it never yields garbage bytes.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::encoding::{b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// A secret wrapped under another key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBundle {
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64")]
    pub encrypted_key: Vec<u8>,
}

pub(crate) fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under `key` with a fresh nonce.
///
/// Returns `(nonce, ciphertext || tag)`.
pub(crate) fn seal(
    key: &[u8; KEY_SIZE],
    plaintext: &[u8],
) -> CryptoResult<([u8; NONCE_SIZE], Vec<u8>)> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = random_nonce();
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Malformed("XChaCha20-Poly1305 encryption failed".into()))?;
    Ok((nonce, ciphertext))
}

/// Inverse of [`seal`]. The plaintext is zeroized when dropped.
pub(crate) fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    what: &'static str,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Malformed(format!(
            "ciphertext too short: {} bytes (minimum {TAG_SIZE})",
            ciphertext.len()
        )));
    }
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Authentication(what))
}

/// Wrap (encrypt) a secret under `wrapping_key`.
pub fn wrap_secret(wrapping_key: &[u8; KEY_SIZE], secret: &[u8]) -> CryptoResult<KeyBundle> {
    let (nonce, encrypted_key) = seal(wrapping_key, secret)?;
    Ok(KeyBundle {
        nonce,
        encrypted_key,
    })
}

/// Unwrap (decrypt) a secret previously produced by [`wrap_secret`].
pub fn unwrap_secret(
    wrapping_key: &[u8; KEY_SIZE],
    bundle: &KeyBundle,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    open(
        wrapping_key,
        &bundle.nonce,
        &bundle.encrypted_key,
        "key unwrapping failed: wrong key or corrupted bundle",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let kek = [42u8; KEY_SIZE];
        let secret = [9u8; KEY_SIZE];

        let bundle = wrap_secret(&kek, &secret).unwrap();
        let unwrapped = unwrap_secret(&kek, &bundle).unwrap();

        assert_eq!(unwrapped.as_slice(), &secret);
    }

    #[test]
    fn test_wrapped_key_size() {
        let bundle = wrap_secret(&[1u8; KEY_SIZE], &[2u8; KEY_SIZE]).unwrap();
        // key (32) + tag (16)
        assert_eq!(bundle.encrypted_key.len(), KEY_SIZE + TAG_SIZE);
    }

    #[test]
    fn test_unwrap_wrong_key() {
        let bundle = wrap_secret(&[1u8; KEY_SIZE], &[3u8; KEY_SIZE]).unwrap();
        let result = unwrap_secret(&[2u8; KEY_SIZE], &bundle);
        assert!(matches!(result, Err(CryptoError::Authentication(_))));
    }

    #[test]
    fn test_fresh_nonce_per_wrap() {
        let kek = [1u8; KEY_SIZE];
        let a = wrap_secret(&kek, &[5u8; KEY_SIZE]).unwrap();
        let b = wrap_secret(&kek, &[5u8; KEY_SIZE]).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.encrypted_key, b.encrypted_key);
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let kek = [1u8; KEY_SIZE];
        let bundle = wrap_secret(&kek, &[5u8; KEY_SIZE]).unwrap();

        for byte in 0..bundle.encrypted_key.len() {
            for bit in 0..8 {
                let mut tampered = bundle.clone();
                tampered.encrypted_key[byte] ^= 1 << bit;
                assert!(
                    unwrap_secret(&kek, &tampered).is_err(),
                    "flip at byte {byte} bit {bit} must fail"
                );
            }
        }
    }

    #[test]
    fn test_truncated_bundle_is_malformed() {
        let bundle = KeyBundle {
            nonce: [0u8; NONCE_SIZE],
            encrypted_key: vec![0u8; 4],
        };
        assert!(matches!(
            unwrap_secret(&[0u8; KEY_SIZE], &bundle),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_bundle_json_shape() {
        let bundle = wrap_secret(&[1u8; KEY_SIZE], &[2u8; KEY_SIZE]).unwrap();
        let value = serde_json::to_value(&bundle).unwrap();
        assert!(value.get("nonce").unwrap().is_string());
        assert!(value.get("encryptedKey").unwrap().is_string());

        let back: KeyBundle = serde_json::from_value(value).unwrap();
        assert_eq!(back, bundle);
    }
}
