//! nimbus-engine: async drive operations over the nimbus crypto core
//!
//! - `engine`: [`CipherEngine`], a dedicated worker thread that runs every
//!   CPU-heavy crypto call; callers `await` results
//! - `session`: identity state machine holding the unlocked keys
//! - `backend`: traits for the drive API and the object-store transport
//! - `pipeline`: streaming encrypt-and-upload, download-and-decrypt
//! - `drive`: folder/file operations tying the pieces together

pub mod backend;
pub mod drive;
pub mod engine;
pub mod pipeline;
pub mod session;

pub use backend::{DriveBackend, ObjectSource, UploadTransport};
pub use drive::{Drive, FolderListing, ListedNode, UnreadableNode};
pub use engine::{CipherEngine, EnginePool, ParentSecret};
pub use pipeline::{decrypt_download, encrypt_upload, ProgressFn, UploadSummary};
pub use session::{Session, SessionState};
