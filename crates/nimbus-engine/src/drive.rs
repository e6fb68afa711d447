//! Drive node operations
//!
//! Every operation resolves the keys it needs by walking the breadcrumb
//! chain from the master key down, so nothing but the user's unlocked keys
//! is held between calls. Records are never edited in place: rename and move
//! send a new bundle to the backend and return the record it stores.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use nimbus_chunks::StreamLayout;
use nimbus_core::config::NimbusConfig;
use nimbus_core::types::{MoveRequest, NewNode, NodeId, NodeKind, NodeRecord, RenameRequest};
use nimbus_core::{NimbusError, NimbusResult};
use nimbus_crypto::{CryptoError, NodeKey, NodeMetadata, UnlockedKeys};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::backend::{DriveBackend, ObjectSource, UploadTransport};
use crate::engine::{CipherEngine, EnginePool, ParentSecret};
use crate::pipeline::{decrypt_download, encrypt_upload, ProgressFn};

/// A child node together with its decrypted metadata
#[derive(Debug, Clone)]
pub struct ListedNode {
    pub record: NodeRecord,
    pub metadata: NodeMetadata,
}

/// A child whose key or metadata failed to decrypt
#[derive(Debug)]
pub struct UnreadableNode {
    pub record: NodeRecord,
    pub error: NimbusError,
}

/// Result of listing a folder. Children that fail authentication are
/// reported in `unreadable`, never dropped.
#[derive(Debug, Default)]
pub struct FolderListing {
    pub nodes: Vec<ListedNode>,
    pub unreadable: Vec<UnreadableNode>,
}

impl FolderListing {
    /// True when every child decrypted.
    pub fn is_complete(&self) -> bool {
        self.unreadable.is_empty()
    }
}

pub struct Drive<B, T> {
    engines: EnginePool,
    backend: B,
    transport: T,
    keys: Arc<UnlockedKeys>,
    layout: StreamLayout,
    frames_per_part: usize,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl<B, T> Drive<B, T>
where
    B: DriveBackend,
    T: UploadTransport + ObjectSource,
{
    pub fn new(
        engines: EnginePool,
        backend: B,
        transport: T,
        keys: Arc<UnlockedKeys>,
        config: &NimbusConfig,
    ) -> NimbusResult<Self> {
        let layout = StreamLayout::new(config.stream.chunk_size)
            .map_err(|e| NimbusError::Config(e.to_string()))?;
        Ok(Self {
            engines,
            backend,
            transport,
            keys,
            layout,
            frames_per_part: config.upload.frames_per_part,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn layout(&self) -> StreamLayout {
        self.layout
    }

    fn engine(&self) -> &CipherEngine {
        self.engines.next()
    }

    fn master(&self) -> ParentSecret {
        ParentSecret::Master(self.keys.master_key.clone())
    }

    /// The key children of `folder` are wrapped under.
    async fn parent_secret(&self, folder: Option<&NodeId>) -> NimbusResult<ParentSecret> {
        let Some(folder) = folder else {
            return Ok(self.master());
        };
        let (_, mut keys) = self.unwrap_path(folder).await?;
        keys.pop()
            .map(ParentSecret::Folder)
            .ok_or_else(|| NimbusError::Backend(format!("empty breadcrumb chain for {folder}")))
    }

    async fn unwrap_path(&self, folder: &NodeId) -> NimbusResult<(Vec<NodeRecord>, Vec<NodeKey>)> {
        let chain = self.backend.breadcrumbs(folder).await?;
        if chain.iter().any(|r| r.kind != NodeKind::Folder) {
            return Err(NimbusError::Backend(format!(
                "breadcrumb chain for {folder} contains a file"
            )));
        }
        let bundles = chain.iter().map(|r| r.key_bundle.clone()).collect();
        let keys = self
            .engine()
            .unwrap_breadcrumbs(self.keys.master_key.clone(), bundles)
            .await?;
        Ok((chain, keys))
    }

    /// Unwrap a node's own key under its current parent.
    async fn node_key(&self, record: &NodeRecord) -> NimbusResult<NodeKey> {
        let parent = self.parent_secret(record.parent_id.as_ref()).await?;
        self.engine()
            .unwrap_node_key(parent, record.key_bundle.clone())
            .await
    }

    pub async fn create_folder(
        &self,
        parent: Option<&NodeId>,
        name: &str,
    ) -> NimbusResult<NodeRecord> {
        let parent_secret = self.parent_secret(parent).await?;
        let engine = self.engine();
        let (folder_key, key_bundle) = engine.generate_node_key(parent_secret).await?;
        let now = now_millis();
        let metadata_bundle = engine
            .encrypt_metadata(folder_key, NodeMetadata::folder(name).with_timestamps(now, now))
            .await?;

        let record = self
            .backend
            .create_node(NewNode {
                parent_id: parent.cloned(),
                kind: NodeKind::Folder,
                key_bundle,
                metadata_bundle,
                encrypted_size: None,
                url: None,
            })
            .await?;
        info!(id = %record.id, "folder created");
        Ok(record)
    }

    /// Encrypt and upload `reader`, then create the file's node record.
    ///
    /// The record is only created once the upload has completed, so a failed
    /// upload leaves nothing behind in the drive.
    pub async fn upload_file<R>(
        &self,
        parent: Option<&NodeId>,
        name: &str,
        mime_type: Option<&str>,
        reader: R,
        progress: Option<&ProgressFn>,
    ) -> NimbusResult<NodeRecord>
    where
        R: AsyncRead + Unpin,
    {
        let parent_secret = self.parent_secret(parent).await?;
        let engine = self.engine();
        let (file_key, key_bundle) = engine.generate_node_key(parent_secret).await?;

        let summary = encrypt_upload(
            engine,
            reader,
            &file_key,
            self.layout,
            self.frames_per_part,
            &self.transport,
            progress,
        )
        .await?;

        let now = now_millis();
        let mut metadata =
            NodeMetadata::file(name, summary.plaintext_size).with_timestamps(now, now);
        if let Some(mime) = mime_type {
            metadata = metadata.with_mime_type(mime);
        }
        let metadata_bundle = engine.encrypt_metadata(file_key, metadata).await?;

        let record = self
            .backend
            .create_node(NewNode {
                parent_id: parent.cloned(),
                kind: NodeKind::File,
                key_bundle,
                metadata_bundle,
                encrypted_size: Some(summary.encrypted_size),
                url: Some(summary.url),
            })
            .await?;
        info!(
            id = %record.id,
            bytes = summary.plaintext_size,
            parts = summary.parts.len(),
            "file uploaded"
        );
        Ok(record)
    }

    /// Stream-decrypt a file's body into `writer`. Returns the plaintext size.
    pub async fn download_file<W>(
        &self,
        id: &NodeId,
        writer: W,
        progress: Option<&ProgressFn>,
    ) -> NimbusResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let record = self.backend.get_node(id).await?;
        if record.kind != NodeKind::File {
            return Err(NimbusError::Backend(format!("{id} is not a file")));
        }
        let url = record
            .url
            .as_deref()
            .ok_or_else(|| NimbusError::Backend(format!("file {id} has no storage url")))?;
        if let Some(size) = record.encrypted_size {
            self.layout.plaintext_size(size).map_err(|e| {
                CryptoError::Malformed(format!("file {id} does not fit this chunk size: {e}"))
            })?;
        }

        let file_key = self.node_key(&record).await?;
        let reader = self.transport.open_object(url).await?;
        let bytes = decrypt_download(
            self.engine(),
            reader,
            &file_key,
            self.layout,
            writer,
            progress,
        )
        .await?;
        debug!(id = %id, bytes, "file downloaded");
        Ok(bytes)
    }

    pub async fn read_metadata(&self, id: &NodeId) -> NimbusResult<NodeMetadata> {
        let record = self.backend.get_node(id).await?;
        let node_key = self.node_key(&record).await?;
        self.engine()
            .decrypt_metadata(node_key, record.metadata_bundle)
            .await
    }

    /// New name, same key: only the metadata bundle changes.
    pub async fn rename(&self, id: &NodeId, new_name: &str) -> NimbusResult<NodeRecord> {
        let record = self.backend.get_node(id).await?;
        let node_key = self.node_key(&record).await?;
        let engine = self.engine();

        let metadata = engine
            .decrypt_metadata(node_key.clone(), record.metadata_bundle.clone())
            .await?;
        let renamed = NodeMetadata {
            modified: Some(now_millis()),
            ..metadata.renamed(new_name)
        };
        let metadata_bundle = engine.encrypt_metadata(node_key, renamed).await?;

        let updated = self
            .backend
            .rename_node(RenameRequest {
                node_id: id.clone(),
                metadata_bundle,
            })
            .await?;
        info!(id = %id, "node renamed");
        Ok(updated)
    }

    /// New parent, same key: only the key bundle changes; the body and
    /// metadata ciphertext are untouched.
    pub async fn move_node(
        &self,
        id: &NodeId,
        new_parent: Option<&NodeId>,
    ) -> NimbusResult<NodeRecord> {
        let record = self.backend.get_node(id).await?;

        if let Some(target) = new_parent {
            let chain = self.backend.breadcrumbs(target).await?;
            if chain.iter().any(|r| &r.id == id) {
                return Err(NimbusError::InvalidState(
                    "cannot move a folder into itself or one of its descendants",
                ));
            }
        }

        let node_key = self.node_key(&record).await?;
        let new_parent_secret = self.parent_secret(new_parent).await?;
        let key_bundle = self
            .engine()
            .rewrap_node_key(new_parent_secret, node_key)
            .await?;

        let updated = self
            .backend
            .move_node(MoveRequest {
                node_id: id.clone(),
                new_parent_id: new_parent.cloned(),
                key_bundle,
            })
            .await?;
        info!(id = %id, "node moved");
        Ok(updated)
    }

    /// Decrypted folder chain from the root down to `folder`.
    ///
    /// A break anywhere in the chain fails the whole call; no partial path
    /// is returned.
    pub async fn open_folder_path(&self, folder: &NodeId) -> NimbusResult<Vec<ListedNode>> {
        let (chain, keys) = self.unwrap_path(folder).await?;
        let engine = self.engine();

        let mut path = Vec::with_capacity(chain.len());
        for (record, key) in chain.into_iter().zip(keys) {
            let metadata = engine
                .decrypt_metadata(key, record.metadata_bundle.clone())
                .await?;
            path.push(ListedNode { record, metadata });
        }
        Ok(path)
    }

    /// Children of `folder` with decrypted metadata.
    ///
    /// A child whose key or metadata fails to decrypt does not fail the whole
    /// listing; it comes back in [`FolderListing::unreadable`] with its error.
    pub async fn list_folder(&self, folder: Option<&NodeId>) -> NimbusResult<FolderListing> {
        let parent = self.parent_secret(folder).await?;
        let engine = self.engine();

        let mut listing = FolderListing::default();
        for record in self.backend.list_children(folder).await? {
            let opened = async {
                let key = engine
                    .unwrap_node_key(parent.clone(), record.key_bundle.clone())
                    .await?;
                engine
                    .decrypt_metadata(key, record.metadata_bundle.clone())
                    .await
            }
            .await;
            match opened {
                Ok(metadata) => listing.nodes.push(ListedNode { record, metadata }),
                Err(error) => {
                    warn!(id = %record.id, "undecryptable node in listing: {error}");
                    listing.unreadable.push(UnreadableNode { record, error });
                }
            }
        }
        Ok(listing)
    }
}
