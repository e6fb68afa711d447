//! nimbus-crypto: client-side E2E encryption for the Nimbus drive
//!
//! Nothing that leaves this crate towards the backend is plaintext: file
//! bodies, file names, and every key are wrapped before they are serialized.
//!
//! Key hierarchy:
//! ```text
//! Password ──Argon2id(salt)──▶ Password Hash
//!   ├── Master Key (256-bit random, wrapped by password hash)
//!   │   ├── Box secret key (X25519, wrapped by master key)
//!   │   ├── Signing secret key (Ed25519, wrapped by master key)
//!   │   └── Root node keys (wrapped by master key)
//!   │       └── Child node keys (wrapped by the parent folder's key)
//!   │           ├── Metadata: XChaCha20-Poly1305(node key, random nonce)
//!   │           └── File body: chunked stream cipher (node key, 24-byte header)
//!   └── Recovery Key (256-bit random, wrapped by password hash)
//!       └── Master Key (second copy, wrapped by recovery key)
//! ```

pub mod boxes;
pub mod encoding;
pub mod error;
pub mod hierarchy;
pub mod kdf;
pub mod metadata;
pub mod nodes;
pub mod recovery;
pub mod secret;
pub mod signing;
pub mod stream;
pub mod wrap;

pub use boxes::{asymmetric_decrypt, asymmetric_encrypt, BoxPublicKey};
pub use error::{CryptoError, CryptoResult};
pub use hierarchy::{
    change_password, decrypt_required_keys, generate_required_keys, recover_with_mnemonic,
    recovery_mnemonic, AsymmetricKeyBundle, GeneratedKeys, UnlockedKeys, UserCryptoProperties,
};
pub use kdf::{derive_from_password, generate_salt, KdfParams};
pub use metadata::{decrypt_metadata, encrypt_metadata, MetadataBundle, NodeMetadata};
pub use nodes::{generate_node_key, rewrap_node_key, unwrap_breadcrumbs, unwrap_node_key, ParentKey};
pub use recovery::{mnemonic_to_recovery_key, recovery_key_to_mnemonic};
pub use secret::{BoxSecretKey, MasterKey, NodeKey, PasswordHash, RecoveryKey, SigningSecretKey};
pub use signing::{sign_detached, verify_detached};
pub use stream::{
    init_decryption, init_encryption, DecryptionStream, EncryptionStream, PulledChunk,
    StreamHeader,
};
pub use wrap::{unwrap_secret, wrap_secret, KeyBundle};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of an Argon2id salt
pub const SALT_SIZE: usize = 16;

/// Size of the stream header sent as the first bytes of every file body
pub const STREAM_HEADER_SIZE: usize = 24;

/// Per-chunk stream overhead: one encrypted tag byte plus the Poly1305 tag
pub const STREAM_CHUNK_OVERHEAD: usize = 1 + TAG_SIZE;

/// Default plaintext chunk size for the stream cipher (4 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;
