use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures raised by the crypto core.
///
/// `Authentication` is the only signal for a wrong password, a wrong key, or a
/// tampered bundle/chunk. None of these are retried inside the crate.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("authentication failed: {0}")]
    Authentication(&'static str),

    #[error("stream truncated: source ended before the final chunk")]
    Truncated,

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("key mismatch: {0}")]
    KeyMismatch(&'static str),

    #[error("breadcrumb chain broken at depth {depth}")]
    BrokenChain { depth: usize },

    #[error("stream already finished")]
    StreamFinished,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl CryptoError {
    /// True for failures that mean "this data cannot be trusted",
    /// as opposed to caller mistakes.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::Authentication(_)
                | CryptoError::Truncated
                | CryptoError::KeyMismatch(_)
                | CryptoError::BrokenChain { .. }
        )
    }
}
