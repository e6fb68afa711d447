//! Ed25519 signing keypair

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{CryptoError, CryptoResult};
use crate::secret::SigningSecretKey;
use crate::KEY_SIZE;

/// Ed25519 verifying key bytes
pub type SigningPublicKey = [u8; KEY_SIZE];

pub const SIGNATURE_SIZE: usize = 64;

pub fn signing_keypair() -> (SigningSecretKey, SigningPublicKey) {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let public = key.verifying_key().to_bytes();
    (SigningSecretKey::from_bytes(key.to_bytes()), public)
}

pub fn signing_public_key(secret: &SigningSecretKey) -> SigningPublicKey {
    SigningKey::from_bytes(secret.as_bytes())
        .verifying_key()
        .to_bytes()
}

pub fn sign_detached(secret: &SigningSecretKey, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
    SigningKey::from_bytes(secret.as_bytes())
        .sign(message)
        .to_bytes()
}

pub fn verify_detached(
    public: &SigningPublicKey,
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> CryptoResult<()> {
    let key = VerifyingKey::from_bytes(public)
        .map_err(|e| CryptoError::Malformed(format!("invalid Ed25519 public key: {e}")))?;
    key.verify(message, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::Authentication("signature verification failed"))
}
