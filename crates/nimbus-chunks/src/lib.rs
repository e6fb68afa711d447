//! nimbus-chunks: chunk framing between byte streams and the stream cipher
//!
//! # Overview
//! - `layout`: chunk size, cipher frame size, and encrypted/plaintext size math
//! - `framing`: re-align arbitrary reads into exact frames, and group cipher
//!   frames into numbered upload parts
//!
//! Nothing here touches key material; frames go in and out as opaque bytes.

pub mod framing;
pub mod layout;

pub use framing::{FrameAligner, PartCoalescer, UploadPart};
pub use layout::StreamLayout;

/// Framing configuration errors
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("frames per part must be greater than zero")]
    ZeroFramesPerPart,

    #[error("stream header must be pushed before the first frame")]
    HeaderAfterFrames,

    #[error("{0} bytes is not a valid encrypted stream length for this layout")]
    InvalidEncryptedSize(u64),
}
