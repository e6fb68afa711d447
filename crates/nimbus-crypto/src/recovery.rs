//! BIP-39 encoding of the recovery key
//!
//! The recovery key's 256 bits of entropy map to a 24-word mnemonic and back,
//! deterministically. The mnemonic is shown to the user once at registration
//! and is never stored digitally.

use bip39::{Language, Mnemonic};
use secrecy::SecretString;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::secret::RecoveryKey;

/// 24 words = 256 bits of entropy
pub const MNEMONIC_WORDS: usize = 24;

/// Encode a recovery key as a 24-word English mnemonic.
pub fn recovery_key_to_mnemonic(key: &RecoveryKey) -> CryptoResult<SecretString> {
    let mnemonic = Mnemonic::from_entropy_in(Language::English, key.as_bytes())
        .map_err(|e| CryptoError::Malformed(format!("BIP-39 encoding failed: {e}")))?;
    Ok(SecretString::from(mnemonic.to_string()))
}

/// Decode a 24-word mnemonic back into the recovery key.
///
/// Word count is checked before anything else; case and extra whitespace are
/// tolerated. Unknown words or a bad checksum are malformed input.
pub fn mnemonic_to_recovery_key(words: &str) -> CryptoResult<RecoveryKey> {
    let normalized: Vec<String> = words.split_whitespace().map(str::to_lowercase).collect();
    if normalized.len() != MNEMONIC_WORDS {
        return Err(CryptoError::Malformed(format!(
            "recovery mnemonic must have {MNEMONIC_WORDS} words, got {}",
            normalized.len()
        )));
    }
    let mut joined = normalized.join(" ");

    let parsed = Mnemonic::parse_in_normalized(Language::English, &joined)
        .map_err(|e| CryptoError::Malformed(format!("invalid BIP-39 mnemonic: {e}")));
    joined.zeroize();
    let mnemonic = parsed?;

    let mut entropy = mnemonic.to_entropy();
    let key = RecoveryKey::from_slice(&entropy);
    entropy.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_mnemonic_has_24_words() {
        let words = recovery_key_to_mnemonic(&RecoveryKey::generate()).unwrap();
        assert_eq!(words.expose_secret().split_whitespace().count(), MNEMONIC_WORDS);
    }

    #[test]
    fn test_mnemonic_roundtrip() {
        let key = RecoveryKey::generate();
        let words = recovery_key_to_mnemonic(&key).unwrap();
        let decoded = mnemonic_to_recovery_key(words.expose_secret()).unwrap();
        assert_eq!(decoded, key, "decoded key must match original");
    }

    #[test]
    fn test_mnemonic_is_deterministic() {
        let key = RecoveryKey::from_bytes([0u8; 32]);
        let words = recovery_key_to_mnemonic(&key).unwrap();
        // all-zero entropy: 23 x "abandon" + checksum word "art"
        let expected = format!("{}art", "abandon ".repeat(23));
        assert_eq!(words.expose_secret(), expected);
    }

    #[test]
    fn test_tolerates_case_and_spacing() {
        let key = RecoveryKey::generate();
        let words = recovery_key_to_mnemonic(&key).unwrap();
        let messy = format!("  {}\n", words.expose_secret().to_uppercase().replace(' ', "   "));
        assert_eq!(mnemonic_to_recovery_key(&messy).unwrap(), key);
    }

    #[test]
    fn test_wrong_word_count_rejected() {
        let result = mnemonic_to_recovery_key("abandon abandon abandon");
        match result {
            Err(CryptoError::Malformed(msg)) => assert!(msg.contains("24 words")),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let words = "abandon ".repeat(24);
        assert!(matches!(
            mnemonic_to_recovery_key(&words),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_word_rejected() {
        let words = format!("{}notaword", "abandon ".repeat(23));
        assert!(mnemonic_to_recovery_key(&words).is_err());
    }
}
