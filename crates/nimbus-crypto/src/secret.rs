//! In-memory secret key types
//!
//! Every secret is a fixed 32-byte newtype, zeroized on drop, redacted in
//! `Debug`, and deliberately not `Serialize`: the only way to get one onto
//! the wire is to wrap it into a [`KeyBundle`](crate::wrap::KeyBundle).

use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

macro_rules! secret_key {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self { bytes }
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.bytes
            }

            /// Fresh key from the OS RNG.
            pub fn generate() -> Self {
                let mut bytes = [0u8; KEY_SIZE];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self { bytes }
            }

            /// Copy out of an unwrapped buffer, rejecting the wrong length.
            pub(crate) fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
                let bytes: [u8; KEY_SIZE] = slice.try_into().map_err(|_| {
                    CryptoError::Malformed(format!(
                        "{}: expected {} bytes, got {}",
                        stringify!($name),
                        KEY_SIZE,
                        slice.len()
                    ))
                })?;
                Ok(Self { bytes })
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.bytes.zeroize();
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.bytes[..].ct_eq(&other.bytes[..]).into()
            }
        }

        impl Eq for $name {}

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

secret_key!(
    /// Argon2id output; used only to unwrap the master and recovery keys.
    PasswordHash
);
secret_key!(
    /// Root symmetric secret of an account.
    MasterKey
);
secret_key!(
    /// Independent secret that wraps a second copy of the master key.
    RecoveryKey
);
secret_key!(
    /// Per-folder or per-file symmetric key.
    NodeKey
);
secret_key!(
    /// X25519 private key of the account's box keypair.
    BoxSecretKey
);
secret_key!(
    /// Ed25519 seed of the account's signing keypair.
    SigningSecretKey
);
