//! Seams to the outside world
//!
//! The drive API and the object store are external collaborators. They only
//! ever receive and return ciphertext and wrapped keys.

use std::future::Future;

use nimbus_chunks::UploadPart;
use nimbus_core::types::{CompletedPart, MoveRequest, NewNode, NodeId, NodeRecord, RenameRequest};
use nimbus_core::NimbusResult;
use tokio::io::AsyncRead;

/// Node records as stored by the drive API.
pub trait DriveBackend: Send + Sync {
    fn create_node(&self, node: NewNode) -> impl Future<Output = NimbusResult<NodeRecord>> + Send;

    fn get_node(&self, id: &NodeId) -> impl Future<Output = NimbusResult<NodeRecord>> + Send;

    /// Direct children of `parent` (None: root level)
    fn list_children(
        &self,
        parent: Option<&NodeId>,
    ) -> impl Future<Output = NimbusResult<Vec<NodeRecord>>> + Send;

    /// Folder chain from the root down to and including `folder`
    fn breadcrumbs(
        &self,
        folder: &NodeId,
    ) -> impl Future<Output = NimbusResult<Vec<NodeRecord>>> + Send;

    /// Replace parent and key bundle; metadata and body stay as they are
    fn move_node(&self, request: MoveRequest)
        -> impl Future<Output = NimbusResult<NodeRecord>> + Send;

    /// Replace the metadata bundle only
    fn rename_node(
        &self,
        request: RenameRequest,
    ) -> impl Future<Output = NimbusResult<NodeRecord>> + Send;
}

/// Multipart upload of opaque encrypted byte ranges.
pub trait UploadTransport: Send + Sync {
    /// Returns the upload id for subsequent calls
    fn begin_upload(&self) -> impl Future<Output = NimbusResult<String>> + Send;

    /// Returns the part's ETag
    fn put_part(
        &self,
        upload_id: &str,
        part: UploadPart,
    ) -> impl Future<Output = NimbusResult<String>> + Send;

    /// Returns the storage URL of the assembled object
    fn complete_upload(
        &self,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> impl Future<Output = NimbusResult<String>> + Send;

    fn abort_upload(&self, upload_id: &str) -> impl Future<Output = NimbusResult<()>> + Send;
}

/// Byte-stream access to a stored encrypted object.
pub trait ObjectSource: Send + Sync {
    type Reader: AsyncRead + Unpin + Send;

    fn open_object(&self, url: &str) -> impl Future<Output = NimbusResult<Self::Reader>> + Send;
}
