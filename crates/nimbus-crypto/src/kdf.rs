//! Key derivation: Argon2id password → password hash

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};
use crate::secret::PasswordHash;
use crate::{KEY_SIZE, SALT_SIZE};

/// Argon2id cost parameters.
///
/// Stored alongside the account's crypto properties so that login runs the
/// same derivation that registration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// Time cost / iterations
    pub ops_limit: u32,
    /// Memory cost in KiB
    pub mem_limit_kib: u32,
}

impl KdfParams {
    /// Interactive login (2 passes, 64 MiB)
    pub const INTERACTIVE: KdfParams = KdfParams {
        ops_limit: 2,
        mem_limit_kib: 64 * 1024,
    };

    /// 3 passes, 256 MiB
    pub const MODERATE: KdfParams = KdfParams {
        ops_limit: 3,
        mem_limit_kib: 256 * 1024,
    };

    /// 4 passes, 1 GiB
    pub const SENSITIVE: KdfParams = KdfParams {
        ops_limit: 4,
        mem_limit_kib: 1024 * 1024,
    };

    pub const fn new(ops_limit: u32, mem_limit_kib: u32) -> Self {
        Self {
            ops_limit,
            mem_limit_kib,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::INTERACTIVE
    }
}

/// Random per-account salt. Not secret; generated once at registration.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive the 256-bit password hash from a password and salt using Argon2id.
///
/// Only fails on invalid parameters. A wrong password surfaces later, as an
/// authentication failure when the master key bundle is opened.
pub fn derive_from_password(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> CryptoResult<PasswordHash> {
    let argon2_params = Params::new(params.mem_limit_kib, params.ops_limit, 1, Some(KEY_SIZE))
        .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Kdf(format!("Argon2id failed: {e}")))?;

    Ok(PasswordHash::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Use fast params for testing
    const FAST: KdfParams = KdfParams::new(1, 1024);

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("test-password-123");
        let salt = [1u8; SALT_SIZE];

        let h1 = derive_from_password(&password, &salt, &FAST).unwrap();
        let h2 = derive_from_password(&password, &salt, &FAST).unwrap();

        assert_eq!(h1.as_bytes(), h2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; SALT_SIZE];

        let h1 = derive_from_password(&SecretString::from("password-a"), &salt, &FAST).unwrap();
        let h2 = derive_from_password(&SecretString::from("password-b"), &salt, &FAST).unwrap();

        assert_ne!(h1.as_bytes(), h2.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");

        let h1 = derive_from_password(&password, &[1u8; SALT_SIZE], &FAST).unwrap();
        let h2 = derive_from_password(&password, &[2u8; SALT_SIZE], &FAST).unwrap();

        assert_ne!(
            h1.as_bytes(),
            h2.as_bytes(),
            "different salts must produce different hashes"
        );
    }

    #[test]
    fn test_kdf_rejects_invalid_params() {
        let password = SecretString::from("pw");
        let result = derive_from_password(&password, &[0u8; SALT_SIZE], &KdfParams::new(0, 1024));
        assert!(matches!(result, Err(CryptoError::Kdf(_))));
    }

    #[test]
    fn test_params_serde_shape() {
        let json = serde_json::to_string(&KdfParams::INTERACTIVE).unwrap();
        assert_eq!(json, r#"{"opsLimit":2,"memLimitKib":65536}"#);
    }
}
