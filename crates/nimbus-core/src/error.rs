use nimbus_crypto::CryptoError;
use thiserror::Error;

pub type NimbusResult<T> = Result<T, NimbusError>;

#[derive(Debug, Error)]
pub enum NimbusError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("upload transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cipher engine error: {0}")]
    Engine(String),

    #[error("operation not valid in the current session state: {0}")]
    InvalidState(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NimbusError {
    /// Whether a caller may retry the failed operation unchanged.
    ///
    /// Crypto failures never are: the same inputs fail the same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            NimbusError::Backend(_) | NimbusError::Transport(_) | NimbusError::Io(_) => true,
            NimbusError::Crypto(_)
            | NimbusError::Config(_)
            | NimbusError::Engine(_)
            | NimbusError::InvalidState(_)
            | NimbusError::Other(_) => false,
        }
    }

    /// True for authentication, truncation and broken-chain failures.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, NimbusError::Crypto(e) if e.is_integrity_failure())
    }
}
