//! Identity session
//!
//! ```text
//!            register / unlock / recover             confirm(challenge)
//!   NoKeys ───────────────────────────▶ Unauthenticated ───────────────▶ Authenticated
//!     ▲                                        │                              │
//!     └──────────────── logout ────────────────┴──────────────────────────────┘
//! ```
//!
//! Keys live in memory only while a session holds them; readers get an `Arc`
//! snapshot, and `logout` drops the session's copy of every secret.

use std::sync::Arc;

use nimbus_core::types::LoginChallenge;
use nimbus_core::{NimbusError, NimbusResult};
use nimbus_crypto::{KdfParams, UnlockedKeys, UserCryptoProperties};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use zeroize::Zeroizing;

use crate::engine::CipherEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoKeys,
    /// Keys in memory, server has not yet accepted the login
    Unauthenticated,
    /// Keys in memory, access token obtained
    Authenticated,
}

struct Unlocked {
    keys: Arc<UnlockedKeys>,
    properties: UserCryptoProperties,
    access_token: Option<Zeroizing<Vec<u8>>>,
}

pub struct Session {
    engine: CipherEngine,
    unlocked: Option<Unlocked>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

impl Session {
    pub fn new(engine: CipherEngine) -> Self {
        Self {
            engine,
            unlocked: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.unlocked {
            None => SessionState::NoKeys,
            Some(u) if u.access_token.is_some() => SessionState::Authenticated,
            Some(_) => SessionState::Unauthenticated,
        }
    }

    fn require_no_keys(&self, op: &'static str) -> NimbusResult<()> {
        match self.state() {
            SessionState::NoKeys => Ok(()),
            _ => Err(NimbusError::InvalidState(op)),
        }
    }

    fn unlocked(&self, op: &'static str) -> NimbusResult<&Unlocked> {
        self.unlocked.as_ref().ok_or(NimbusError::InvalidState(op))
    }

    /// Create a new account's keys. Returns the properties to store server-side
    /// and the recovery mnemonic to show the user once.
    pub async fn register(
        &mut self,
        password: SecretString,
        params: KdfParams,
    ) -> NimbusResult<(UserCryptoProperties, SecretString)> {
        self.require_no_keys("register requires a session without keys")?;
        let generated = self.engine.generate_required_keys(password, params).await?;

        self.unlocked = Some(Unlocked {
            keys: Arc::new(generated.keys),
            properties: generated.crypto_properties.clone(),
            access_token: None,
        });
        info!("account keys generated");
        Ok((generated.crypto_properties, generated.recovery_mnemonic))
    }

    /// Unlock existing keys with the password.
    pub async fn unlock(
        &mut self,
        password: SecretString,
        properties: UserCryptoProperties,
    ) -> NimbusResult<()> {
        self.require_no_keys("unlock requires a session without keys")?;
        let keys = self
            .engine
            .decrypt_required_keys(password, properties.clone())
            .await?;

        self.unlocked = Some(Unlocked {
            keys: Arc::new(keys),
            properties,
            access_token: None,
        });
        info!("account keys unlocked");
        Ok(())
    }

    /// Open the server's login challenge with the box secret key.
    pub async fn confirm(&mut self, challenge: &LoginChallenge) -> NimbusResult<()> {
        if self.state() != SessionState::Unauthenticated {
            return Err(NimbusError::InvalidState(
                "confirm requires unlocked, unauthenticated keys",
            ));
        }
        let keys = Arc::clone(&self.unlocked("confirm")?.keys);
        let token = self
            .engine
            .asymmetric_decrypt(
                challenge.encrypted_access_token.clone(),
                challenge.access_token_nonce,
                challenge.server_public_key,
                keys.box_secret_key.clone(),
            )
            .await?;

        if let Some(unlocked) = self.unlocked.as_mut() {
            unlocked.access_token = Some(token);
        }
        info!("login confirmed");
        Ok(())
    }

    /// Reset the password with the recovery mnemonic and unlock with the new one.
    ///
    /// Returns the re-wrapped properties to store server-side.
    pub async fn recover(
        &mut self,
        mnemonic: SecretString,
        new_password: SecretString,
        properties: UserCryptoProperties,
        params: KdfParams,
    ) -> NimbusResult<UserCryptoProperties> {
        self.require_no_keys("recover requires a session without keys")?;
        let recovered = self
            .engine
            .recover_with_mnemonic(mnemonic, copy_secret(&new_password), properties, params)
            .await?;
        let keys = self
            .engine
            .decrypt_required_keys(new_password, recovered.clone())
            .await?;

        self.unlocked = Some(Unlocked {
            keys: Arc::new(keys),
            properties: recovered.clone(),
            access_token: None,
        });
        info!("account recovered with mnemonic");
        Ok(recovered)
    }

    /// Re-wrap the key hierarchy under a new password.
    pub async fn change_password(
        &mut self,
        old_password: SecretString,
        new_password: SecretString,
        params: KdfParams,
    ) -> NimbusResult<UserCryptoProperties> {
        let properties = self
            .unlocked("change_password requires unlocked keys")?
            .properties
            .clone();
        let updated = self
            .engine
            .change_password(old_password, new_password, properties, params)
            .await?;

        if let Some(unlocked) = self.unlocked.as_mut() {
            unlocked.properties = updated.clone();
        }
        info!("password changed");
        Ok(updated)
    }

    /// Shared-read snapshot of the unlocked keys.
    pub fn keys(&self) -> NimbusResult<Arc<UnlockedKeys>> {
        Ok(Arc::clone(&self.unlocked("keys requires unlocked keys")?.keys))
    }

    pub fn properties(&self) -> Option<&UserCryptoProperties> {
        self.unlocked.as_ref().map(|u| &u.properties)
    }

    pub fn access_token(&self) -> Option<&[u8]> {
        self.unlocked
            .as_ref()
            .and_then(|u| u.access_token.as_deref())
            .map(Vec::as_slice)
    }

    /// Drop every secret this session holds.
    ///
    /// Snapshots handed out by [`keys`](Self::keys) stay valid until their
    /// holders drop them.
    pub fn logout(&mut self) {
        if self.unlocked.take().is_some() {
            info!("logged out");
        }
    }
}
