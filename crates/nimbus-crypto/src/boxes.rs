//! Public-key authenticated encryption (box)
//!
//! Static-static X25519 between the sender and the recipient, HKDF-SHA256
//! over the shared secret with both public keys bound into the info string,
//! then XChaCha20-Poly1305. The server uses this to address the login access
//! token to the account's box public key.
//!
//! Because the sender's public key is part of the derivation, opening a box
//! with the wrong claimed sender key fails authentication.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::secret::BoxSecretKey;
use crate::wrap::{open, seal};
use crate::{KEY_SIZE, NONCE_SIZE};

/// X25519 public key bytes
pub type BoxPublicKey = [u8; KEY_SIZE];

const BOX_DOMAIN: &[u8] = b"nimbus-box-v1";

/// Fresh X25519 keypair.
pub fn box_keypair() -> (BoxSecretKey, BoxPublicKey) {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);
    (BoxSecretKey::from_bytes(secret.to_bytes()), public.to_bytes())
}

/// Public half of a box secret key.
pub fn box_public_key(secret: &BoxSecretKey) -> BoxPublicKey {
    let secret = StaticSecret::from(*secret.as_bytes());
    PublicKey::from(&secret).to_bytes()
}

fn box_key(
    own_secret: &BoxSecretKey,
    peer_public: &BoxPublicKey,
    sender_public: &BoxPublicKey,
    recipient_public: &BoxPublicKey,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let secret = StaticSecret::from(*own_secret.as_bytes());
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_public));
    if !shared.was_contributory() {
        return Err(CryptoError::Malformed(
            "peer public key is a low-order point".into(),
        ));
    }

    let mut info = Vec::with_capacity(BOX_DOMAIN.len() + 2 * KEY_SIZE);
    info.extend_from_slice(BOX_DOMAIN);
    info.extend_from_slice(sender_public);
    info.extend_from_slice(recipient_public);

    let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(&info, key.as_mut())
        .map_err(|e| CryptoError::Kdf(format!("HKDF expand failed: {e}")))?;
    Ok(key)
}

/// Encrypt `plaintext` from `sender_secret` to `recipient_public`.
///
/// Returns `(nonce, ciphertext)`.
pub fn asymmetric_encrypt(
    plaintext: &[u8],
    recipient_public: &BoxPublicKey,
    sender_secret: &BoxSecretKey,
) -> CryptoResult<([u8; NONCE_SIZE], Vec<u8>)> {
    let sender_public = box_public_key(sender_secret);
    let key = box_key(sender_secret, recipient_public, &sender_public, recipient_public)?;
    seal(&key, plaintext)
}

/// Open a box addressed to `recipient_secret` from `sender_public`.
pub fn asymmetric_decrypt(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    sender_public: &BoxPublicKey,
    recipient_secret: &BoxSecretKey,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let recipient_public = box_public_key(recipient_secret);
    let key = box_key(recipient_secret, sender_public, sender_public, &recipient_public)?;
    open(
        &key,
        nonce,
        ciphertext,
        "box decryption failed: wrong keys or tampered message",
    )
}
