//! Account key hierarchy: register, unlock, recover, change password
//!
//! The server stores [`UserCryptoProperties`]; everything in it is either
//! public (salt, public keys) or wrapped. Two independent paths lead to the
//! master key:
//!
//! - password → Argon2id → password hash → `masterKeyBundle`
//! - mnemonic → recovery key → `recoveryMasterKeyBundle`
//!
//! Every operation that changes the password rewrites both, so neither path
//! goes stale.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::boxes::{box_keypair, box_public_key, BoxPublicKey};
use crate::encoding::{b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_from_password, generate_salt, KdfParams};
use crate::recovery::{mnemonic_to_recovery_key, recovery_key_to_mnemonic};
use crate::secret::{BoxSecretKey, MasterKey, PasswordHash, RecoveryKey, SigningSecretKey};
use crate::signing::{signing_keypair, signing_public_key, SigningPublicKey};
use crate::wrap::{unwrap_secret, wrap_secret, KeyBundle};
use crate::{KEY_SIZE, NONCE_SIZE, SALT_SIZE};

/// A private key wrapped under the master key, next to its public half.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsymmetricKeyBundle {
    #[serde(with = "b64_array")]
    pub public_key: [u8; KEY_SIZE],
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64")]
    pub encrypted_private_key: Vec<u8>,
}

impl AsymmetricKeyBundle {
    fn seal(
        master: &MasterKey,
        public_key: [u8; KEY_SIZE],
        secret: &[u8; KEY_SIZE],
    ) -> CryptoResult<Self> {
        let wrapped = wrap_secret(master.as_bytes(), secret)?;
        Ok(Self {
            public_key,
            nonce: wrapped.nonce,
            encrypted_private_key: wrapped.encrypted_key,
        })
    }

    fn key_bundle(&self) -> KeyBundle {
        KeyBundle {
            nonce: self.nonce,
            encrypted_key: self.encrypted_private_key.clone(),
        }
    }
}

/// The durable, server-stored crypto record of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCryptoProperties {
    #[serde(with = "b64_array")]
    pub salt: [u8; SALT_SIZE],
    /// Argon2id parameters the password hash was derived with
    #[serde(default)]
    pub kdf: KdfParams,
    /// Master key wrapped under the password hash
    pub master_key_bundle: KeyBundle,
    /// Master key wrapped under the recovery key
    pub recovery_master_key_bundle: KeyBundle,
    /// Recovery key wrapped under the password hash
    pub recovery_key_bundle: KeyBundle,
    /// X25519 keypair, private half wrapped under the master key
    pub asymmetric_key_bundle: AsymmetricKeyBundle,
    /// Ed25519 keypair, private half wrapped under the master key
    pub signing_key_bundle: AsymmetricKeyBundle,
}

/// Plaintext secrets held in memory for the duration of a session.
#[derive(Debug, Clone)]
pub struct UnlockedKeys {
    pub master_key: MasterKey,
    pub box_secret_key: BoxSecretKey,
    pub box_public_key: BoxPublicKey,
    pub signing_secret_key: SigningSecretKey,
    pub signing_public_key: SigningPublicKey,
}

/// Output of [`generate_required_keys`].
#[derive(Debug)]
pub struct GeneratedKeys {
    pub crypto_properties: UserCryptoProperties,
    /// Show once, never store
    pub recovery_mnemonic: SecretString,
    pub keys: UnlockedKeys,
}

/// Wrap every secret of the hierarchy under a freshly salted password hash.
fn seal_properties(
    password: &SecretString,
    params: &KdfParams,
    keys: &UnlockedKeys,
    recovery_key: &RecoveryKey,
) -> CryptoResult<UserCryptoProperties> {
    let salt = generate_salt();
    let password_hash = derive_from_password(password, &salt, params)?;

    Ok(UserCryptoProperties {
        salt,
        kdf: *params,
        master_key_bundle: wrap_secret(password_hash.as_bytes(), keys.master_key.as_bytes())?,
        recovery_master_key_bundle: wrap_secret(
            recovery_key.as_bytes(),
            keys.master_key.as_bytes(),
        )?,
        recovery_key_bundle: wrap_secret(password_hash.as_bytes(), recovery_key.as_bytes())?,
        asymmetric_key_bundle: AsymmetricKeyBundle::seal(
            &keys.master_key,
            keys.box_public_key,
            keys.box_secret_key.as_bytes(),
        )?,
        signing_key_bundle: AsymmetricKeyBundle::seal(
            &keys.master_key,
            keys.signing_public_key,
            keys.signing_secret_key.as_bytes(),
        )?,
    })
}

/// Unwrap both private keys with the master key and check them against the
/// stored public keys.
fn open_private_keys(
    master_key: MasterKey,
    props: &UserCryptoProperties,
) -> CryptoResult<UnlockedKeys> {
    let box_raw = unwrap_secret(master_key.as_bytes(), &props.asymmetric_key_bundle.key_bundle())?;
    let box_secret_key = BoxSecretKey::from_slice(&box_raw)?;
    if box_public_key(&box_secret_key) != props.asymmetric_key_bundle.public_key {
        return Err(CryptoError::KeyMismatch(
            "box private key does not match stored public key",
        ));
    }

    let signing_raw = unwrap_secret(master_key.as_bytes(), &props.signing_key_bundle.key_bundle())?;
    let signing_secret_key = SigningSecretKey::from_slice(&signing_raw)?;
    if signing_public_key(&signing_secret_key) != props.signing_key_bundle.public_key {
        return Err(CryptoError::KeyMismatch(
            "signing private key does not match stored public key",
        ));
    }

    Ok(UnlockedKeys {
        master_key,
        box_public_key: props.asymmetric_key_bundle.public_key,
        box_secret_key,
        signing_public_key: props.signing_key_bundle.public_key,
        signing_secret_key,
    })
}

fn open_master_with_password(
    password: &SecretString,
    props: &UserCryptoProperties,
) -> CryptoResult<(MasterKey, PasswordHash)> {
    let password_hash = derive_from_password(password, &props.salt, &props.kdf)?;
    let raw = unwrap_secret(password_hash.as_bytes(), &props.master_key_bundle)
        .map_err(|e| match e {
            CryptoError::Authentication(_) => {
                CryptoError::Authentication("wrong password or corrupted master key bundle")
            }
            other => other,
        })?;
    Ok((MasterKey::from_slice(&raw)?, password_hash))
}

/// Generate a complete key set for a new account.
pub fn generate_required_keys(
    password: &SecretString,
    params: &KdfParams,
) -> CryptoResult<GeneratedKeys> {
    let (box_secret_key, box_public_key) = box_keypair();
    let (signing_secret_key, signing_public_key) = signing_keypair();
    let keys = UnlockedKeys {
        master_key: MasterKey::generate(),
        box_secret_key,
        box_public_key,
        signing_secret_key,
        signing_public_key,
    };
    let recovery_key = RecoveryKey::generate();

    let crypto_properties = seal_properties(password, params, &keys, &recovery_key)?;
    let recovery_mnemonic = recovery_key_to_mnemonic(&recovery_key)?;
    debug!(
        ops_limit = params.ops_limit,
        mem_limit_kib = params.mem_limit_kib,
        "generated account key hierarchy"
    );

    Ok(GeneratedKeys {
        crypto_properties,
        recovery_mnemonic,
        keys,
    })
}

/// Unlock an account's secrets with its password.
///
/// A wrong password is reported as [`CryptoError::Authentication`].
pub fn decrypt_required_keys(
    password: &SecretString,
    props: &UserCryptoProperties,
) -> CryptoResult<UnlockedKeys> {
    let (master_key, _) = open_master_with_password(password, props)?;
    open_private_keys(master_key, props)
}

/// Re-display the recovery mnemonic of an unlocked account.
pub fn recovery_mnemonic(
    password: &SecretString,
    props: &UserCryptoProperties,
) -> CryptoResult<SecretString> {
    let (_, password_hash) = open_master_with_password(password, props)?;
    let raw = unwrap_secret(password_hash.as_bytes(), &props.recovery_key_bundle)?;
    recovery_key_to_mnemonic(&RecoveryKey::from_slice(&raw)?)
}

/// Reset the password using the recovery mnemonic.
///
/// The master key, both keypairs, and the recovery key keep their values;
/// only the wrapping changes (new salt, new nonces).
pub fn recover_with_mnemonic(
    mnemonic: &SecretString,
    new_password: &SecretString,
    props: &UserCryptoProperties,
    params: &KdfParams,
) -> CryptoResult<UserCryptoProperties> {
    let recovery_key = mnemonic_to_recovery_key(mnemonic.expose_secret())?;
    let raw = unwrap_secret(recovery_key.as_bytes(), &props.recovery_master_key_bundle)
        .map_err(|e| match e {
            CryptoError::Authentication(_) => {
                CryptoError::Authentication("recovery mnemonic does not belong to this account")
            }
            other => other,
        })?;
    let keys = open_private_keys(MasterKey::from_slice(&raw)?, props)?;

    debug!("re-wrapping key hierarchy after mnemonic recovery");
    seal_properties(new_password, params, &keys, &recovery_key)
}

/// Change the password, keeping the recovery path valid.
pub fn change_password(
    old_password: &SecretString,
    new_password: &SecretString,
    props: &UserCryptoProperties,
    params: &KdfParams,
) -> CryptoResult<UserCryptoProperties> {
    let (master_key, password_hash) = open_master_with_password(old_password, props)?;
    let recovery_raw = unwrap_secret(password_hash.as_bytes(), &props.recovery_key_bundle)?;
    let recovery_key = RecoveryKey::from_slice(&recovery_raw)?;
    let keys = open_private_keys(master_key, props)?;

    seal_properties(new_password, params, &keys, &recovery_key)
}
