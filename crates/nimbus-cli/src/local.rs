//! Local filesystem stand-ins for the drive API and object store
//!
//! `nimbus encrypt` produces a standalone root-level file: the ciphertext at
//! the output path and its node record beside it as `<out>.node.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use nimbus_chunks::UploadPart;
use nimbus_core::types::{CompletedPart, MoveRequest, NewNode, NodeId, NodeRecord, RenameRequest};
use nimbus_core::{NimbusError, NimbusResult};
use nimbus_crypto::encoding::b64_array;
use nimbus_crypto::signing::SIGNATURE_SIZE;
use nimbus_crypto::{sign_detached, verify_detached, SigningSecretKey, UnlockedKeys};
use nimbus_engine::{DriveBackend, ObjectSource, UploadTransport};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const RECORD_SUFFIX: &str = ".node.json";

const URL_SCHEME: &str = "file://";

pub fn record_path_for(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(RECORD_SUFFIX);
    PathBuf::from(name)
}

pub fn file_url(path: &Path) -> String {
    format!("{URL_SCHEME}{}", path.display())
}

fn url_path(url: &str) -> NimbusResult<PathBuf> {
    url.strip_prefix(URL_SCHEME)
        .map(PathBuf::from)
        .ok_or_else(|| NimbusError::Backend(format!("not a local object url: {url}")))
}

// ── Object store ──────────────────────────────────────────────────────────────

/// Multipart store that assembles every completed upload at one target path.
///
/// Parts are staged as files under `<target>.parts/<upload id>/` until
/// `complete_upload` stitches them together in part-number order.
pub struct LocalStore {
    target: PathBuf,
    etags: Mutex<BTreeMap<(String, u32), String>>,
}

impl LocalStore {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            etags: Mutex::new(BTreeMap::new()),
        }
    }

    fn staging_root(&self) -> PathBuf {
        let mut name = self.target.as_os_str().to_owned();
        name.push(".parts");
        PathBuf::from(name)
    }

    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.staging_root().join(upload_id)
    }

    fn recorded_etags(&self, upload_id: &str) -> NimbusResult<BTreeMap<u32, String>> {
        let etags = self
            .etags
            .lock()
            .map_err(|_| NimbusError::Transport("etag table poisoned".into()))?;
        Ok(etags
            .iter()
            .filter(|((id, _), _)| id == upload_id)
            .map(|((_, n), tag)| (*n, tag.clone()))
            .collect())
    }

    fn forget(&self, upload_id: &str) {
        if let Ok(mut etags) = self.etags.lock() {
            etags.retain(|(id, _), _| id != upload_id);
        }
    }

    /// Concatenate validated parts into the target.
    async fn assemble(&self, upload_id: &str, parts: &[CompletedPart]) -> NimbusResult<()> {
        let dir = self.staging_dir(upload_id);
        let mut out = tokio::fs::File::create(&self.target)
            .await
            .map_err(transport)?;
        for part in parts {
            let data = tokio::fs::read(dir.join(format!("{:05}.part", part.part_number)))
                .await
                .map_err(transport)?;
            out.write_all(&data).await.map_err(transport)?;
        }
        out.flush().await.map_err(transport)?;
        out.sync_all().await.map_err(transport)?;
        Ok(())
    }

    async fn remove_staging(&self, upload_id: &str) {
        let _ = tokio::fs::remove_dir_all(self.staging_dir(upload_id)).await;
        // only succeeds once no other upload is staged
        let _ = tokio::fs::remove_dir(self.staging_root()).await;
    }
}

fn transport(e: std::io::Error) -> NimbusError {
    NimbusError::Transport(e.to_string())
}

impl UploadTransport for LocalStore {
    async fn begin_upload(&self) -> NimbusResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        tokio::fs::create_dir_all(self.staging_dir(&id))
            .await
            .map_err(transport)?;
        debug!(upload_id = %id, target = %self.target.display(), "upload started");
        Ok(id)
    }

    async fn put_part(&self, upload_id: &str, part: UploadPart) -> NimbusResult<String> {
        let path = self
            .staging_dir(upload_id)
            .join(format!("{:05}.part", part.part_number));
        tokio::fs::write(&path, &part.data).await.map_err(transport)?;

        let etag = blake3::hash(&part.data).to_hex().to_string();
        self.etags
            .lock()
            .map_err(|_| NimbusError::Transport("etag table poisoned".into()))?
            .insert((upload_id.to_string(), part.part_number), etag.clone());
        Ok(etag)
    }

    async fn complete_upload(
        &self,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> NimbusResult<String> {
        let recorded = self.recorded_etags(upload_id)?;
        if recorded.len() != parts.len() {
            return Err(NimbusError::Transport(format!(
                "upload {upload_id}: {} parts staged, {} listed",
                recorded.len(),
                parts.len()
            )));
        }

        for (index, part) in parts.iter().enumerate() {
            if part.part_number as usize != index + 1 {
                return Err(NimbusError::Transport(format!(
                    "upload {upload_id}: part {} listed at position {}",
                    part.part_number,
                    index + 1
                )));
            }
            if recorded.get(&part.part_number) != Some(&part.etag) {
                return Err(NimbusError::Transport(format!(
                    "upload {upload_id}: etag mismatch on part {}",
                    part.part_number
                )));
            }
        }

        if let Err(e) = self.assemble(upload_id, &parts).await {
            let _ = tokio::fs::remove_file(&self.target).await;
            return Err(e);
        }

        self.forget(upload_id);
        self.remove_staging(upload_id).await;
        Ok(file_url(&self.target))
    }

    async fn abort_upload(&self, upload_id: &str) -> NimbusResult<()> {
        self.forget(upload_id);
        self.remove_staging(upload_id).await;
        debug!(upload_id, "upload staging removed");
        Ok(())
    }
}

impl ObjectSource for LocalStore {
    type Reader = tokio::fs::File;

    async fn open_object(&self, url: &str) -> NimbusResult<Self::Reader> {
        let path = url_path(url)?;
        tokio::fs::File::open(&path)
            .await
            .map_err(|e| NimbusError::Backend(format!("opening {}: {e}", path.display())))
    }
}

// ── Node record ───────────────────────────────────────────────────────────────

/// On-disk form of a record file: the node plus an Ed25519 signature over
/// its JSON made with the account's signing key.
#[derive(Serialize, Deserialize)]
struct SignedRecord {
    record: NodeRecord,
    #[serde(with = "b64_array")]
    signature: [u8; SIGNATURE_SIZE],
}

/// A drive holding exactly one root-level node, persisted as signed JSON.
///
/// The signature covers the fields the server would see in the clear (`url`,
/// `encryptedSize`, parent and bundles), so an edited record is refused
/// before any ciphertext is read.
pub struct RecordFile {
    path: PathBuf,
    signer: SigningSecretKey,
    record: Mutex<Option<NodeRecord>>,
}

fn record_bytes(record: &NodeRecord) -> NimbusResult<Vec<u8>> {
    serde_json::to_vec(record)
        .map_err(|e| NimbusError::Backend(format!("serializing node record: {e}")))
}

impl RecordFile {
    /// An empty drive that will write its node to `path`.
    pub fn create(path: impl Into<PathBuf>, keys: &UnlockedKeys) -> Self {
        Self {
            path: path.into(),
            signer: keys.signing_secret_key.clone(),
            record: Mutex::new(None),
        }
    }

    /// Load and verify an existing record. When the ciphertext has moved since
    /// it was written, `relocated` replaces the stored url in memory.
    pub fn open(
        path: impl Into<PathBuf>,
        relocated: Option<&Path>,
        keys: &UnlockedKeys,
    ) -> NimbusResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)?;
        let signed: SignedRecord = serde_json::from_str(&content)
            .map_err(|e| NimbusError::Backend(format!("parsing {}: {e}", path.display())))?;
        verify_detached(
            &keys.signing_public_key,
            &record_bytes(&signed.record)?,
            &signed.signature,
        )?;

        let mut record = signed.record;
        if let Some(object) = relocated {
            record.url = Some(file_url(object));
        }
        Ok(Self {
            path,
            signer: keys.signing_secret_key.clone(),
            record: Mutex::new(Some(record)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> NimbusResult<NodeRecord> {
        self.lock()?
            .clone()
            .ok_or_else(|| NimbusError::Backend(format!("{} holds no node", self.path.display())))
    }

    fn lock(&self) -> NimbusResult<std::sync::MutexGuard<'_, Option<NodeRecord>>> {
        self.record
            .lock()
            .map_err(|_| NimbusError::Backend("record lock poisoned".into()))
    }

    fn persist(&self, record: &NodeRecord) -> NimbusResult<()> {
        let signed = SignedRecord {
            record: record.clone(),
            signature: sign_detached(&self.signer, &record_bytes(record)?),
        };
        let json = serde_json::to_string_pretty(&signed)
            .map_err(|e| NimbusError::Backend(format!("serializing node record: {e}")))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn update(&self, id: &NodeId, apply: impl FnOnce(&mut NodeRecord)) -> NimbusResult<NodeRecord> {
        let mut slot = self.lock()?;
        let record = slot
            .as_mut()
            .filter(|r| &r.id == id)
            .ok_or_else(|| NimbusError::Backend(format!("no such node: {id}")))?;
        apply(record);
        self.persist(record)?;
        Ok(record.clone())
    }
}

impl DriveBackend for RecordFile {
    async fn create_node(&self, node: NewNode) -> NimbusResult<NodeRecord> {
        if node.parent_id.is_some() {
            return Err(NimbusError::Backend(
                "a record file only holds root-level nodes".into(),
            ));
        }
        let mut slot = self.lock()?;
        if slot.is_some() {
            return Err(NimbusError::Backend(format!(
                "{} already holds a node",
                self.path.display()
            )));
        }
        let record = node.into_record(uuid::Uuid::new_v4().to_string());
        self.persist(&record)?;
        *slot = Some(record.clone());
        Ok(record)
    }

    async fn get_node(&self, id: &NodeId) -> NimbusResult<NodeRecord> {
        self.lock()?
            .as_ref()
            .filter(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| NimbusError::Backend(format!("no such node: {id}")))
    }

    async fn list_children(&self, parent: Option<&NodeId>) -> NimbusResult<Vec<NodeRecord>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|r| r.parent_id.as_ref() == parent)
            .cloned()
            .collect())
    }

    async fn breadcrumbs(&self, folder: &NodeId) -> NimbusResult<Vec<NodeRecord>> {
        Err(NimbusError::Backend(format!(
            "record file has no folders (asked for {folder})"
        )))
    }

    async fn move_node(&self, request: MoveRequest) -> NimbusResult<NodeRecord> {
        if request.new_parent_id.is_some() {
            return Err(NimbusError::Backend(
                "a record file only holds root-level nodes".into(),
            ));
        }
        self.update(&request.node_id, |r| r.key_bundle = request.key_bundle)
    }

    async fn rename_node(&self, request: RenameRequest) -> NimbusResult<NodeRecord> {
        self.update(&request.node_id, |r| {
            r.metadata_bundle = request.metadata_bundle
        })
    }
}
