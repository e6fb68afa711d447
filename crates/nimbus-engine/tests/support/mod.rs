//! In-memory drive backend and object store for integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::Mutex;

use bytes::Bytes;
use nimbus_chunks::UploadPart;
use nimbus_core::types::{CompletedPart, MoveRequest, NewNode, NodeId, NodeRecord, RenameRequest};
use nimbus_core::{NimbusError, NimbusResult};
use nimbus_engine::{DriveBackend, ObjectSource, UploadTransport};

#[derive(Default)]
pub struct MemoryBackend {
    nodes: Mutex<HashMap<NodeId, NodeRecord>>,
}

impl MemoryBackend {
    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn snapshot(&self, id: &NodeId) -> NodeRecord {
        self.nodes.lock().unwrap()[id].clone()
    }

    pub fn replace(&self, record: NodeRecord) {
        self.nodes.lock().unwrap().insert(record.id.clone(), record);
    }
}

fn missing(id: &NodeId) -> NimbusError {
    NimbusError::Backend(format!("no such node: {id}"))
}

impl DriveBackend for MemoryBackend {
    async fn create_node(&self, node: NewNode) -> NimbusResult<NodeRecord> {
        let record = node.into_record(uuid::Uuid::new_v4().to_string());
        self.nodes
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_node(&self, id: &NodeId) -> NimbusResult<NodeRecord> {
        self.nodes
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| missing(id))
    }

    async fn list_children(&self, parent: Option<&NodeId>) -> NimbusResult<Vec<NodeRecord>> {
        let nodes = self.nodes.lock().unwrap();
        let mut children: Vec<NodeRecord> = nodes
            .values()
            .filter(|r| r.parent_id.as_ref() == parent)
            .cloned()
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    async fn breadcrumbs(&self, folder: &NodeId) -> NimbusResult<Vec<NodeRecord>> {
        let nodes = self.nodes.lock().unwrap();
        let mut chain = Vec::new();
        let mut cursor = Some(folder.clone());
        while let Some(id) = cursor {
            let record = nodes.get(&id).cloned().ok_or_else(|| missing(&id))?;
            cursor = record.parent_id.clone();
            chain.push(record);
        }
        chain.reverse();
        Ok(chain)
    }

    async fn move_node(&self, request: MoveRequest) -> NimbusResult<NodeRecord> {
        let mut nodes = self.nodes.lock().unwrap();
        let record = nodes
            .get_mut(&request.node_id)
            .ok_or_else(|| missing(&request.node_id))?;
        record.parent_id = request.new_parent_id;
        record.key_bundle = request.key_bundle;
        Ok(record.clone())
    }

    async fn rename_node(&self, request: RenameRequest) -> NimbusResult<NodeRecord> {
        let mut nodes = self.nodes.lock().unwrap();
        let record = nodes
            .get_mut(&request.node_id)
            .ok_or_else(|| missing(&request.node_id))?;
        record.metadata_bundle = request.metadata_bundle;
        Ok(record.clone())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    uploads: Mutex<HashMap<String, BTreeMap<u32, Bytes>>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    aborted: Mutex<HashSet<String>>,
    part_sizes: Mutex<Vec<usize>>,
    /// Fail `put_part` for this part number
    pub fail_on_part: Option<u32>,
}

impl MemoryStore {
    pub fn failing_on_part(part: u32) -> Self {
        Self {
            fail_on_part: Some(part),
            ..Self::default()
        }
    }

    pub fn object(&self, url: &str) -> Vec<u8> {
        self.objects.lock().unwrap()[url].clone()
    }

    pub fn put_object(&self, url: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(url.to_string(), data);
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn aborted_count(&self) -> usize {
        self.aborted.lock().unwrap().len()
    }

    pub fn open_upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn part_sizes(&self) -> Vec<usize> {
        self.part_sizes.lock().unwrap().clone()
    }
}

impl UploadTransport for MemoryStore {
    async fn begin_upload(&self) -> NimbusResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.uploads
            .lock()
            .unwrap()
            .insert(id.clone(), BTreeMap::new());
        Ok(id)
    }

    async fn put_part(&self, upload_id: &str, part: UploadPart) -> NimbusResult<String> {
        if self.fail_on_part == Some(part.part_number) {
            return Err(NimbusError::Transport(format!(
                "injected failure on part {}",
                part.part_number
            )));
        }
        self.part_sizes.lock().unwrap().push(part.data.len());
        let etag = format!("etag-{}-{}", upload_id, part.part_number);
        self.uploads
            .lock()
            .unwrap()
            .get_mut(upload_id)
            .ok_or_else(|| NimbusError::Transport(format!("unknown upload {upload_id}")))?
            .insert(part.part_number, part.data);
        Ok(etag)
    }

    async fn complete_upload(
        &self,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> NimbusResult<String> {
        let stored = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| NimbusError::Transport(format!("unknown upload {upload_id}")))?;
        if parts.len() != stored.len() {
            return Err(NimbusError::Transport("part list mismatch".into()));
        }
        let mut body = Vec::new();
        for (expected, part) in parts.iter().enumerate() {
            if part.part_number as usize != expected + 1 {
                return Err(NimbusError::Transport("parts out of order".into()));
            }
            body.extend_from_slice(&stored[&part.part_number]);
        }
        let url = format!("mem://{upload_id}");
        self.objects.lock().unwrap().insert(url.clone(), body);
        Ok(url)
    }

    async fn abort_upload(&self, upload_id: &str) -> NimbusResult<()> {
        self.uploads.lock().unwrap().remove(upload_id);
        self.aborted.lock().unwrap().insert(upload_id.to_string());
        Ok(())
    }
}

impl ObjectSource for MemoryStore {
    type Reader = Cursor<Vec<u8>>;

    async fn open_object(&self, url: &str) -> NimbusResult<Self::Reader> {
        self.objects
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .map(Cursor::new)
            .ok_or_else(|| NimbusError::Backend(format!("no such object: {url}")))
    }
}

/// Hands out reads of a fixed size, to exercise frame re-alignment.
pub struct ChoppyReader {
    data: Vec<u8>,
    pos: usize,
    step: usize,
}

impl ChoppyReader {
    pub fn new(data: Vec<u8>, step: usize) -> Self {
        Self { data, pos: 0, step }
    }
}

impl tokio::io::AsyncRead for ChoppyReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let take = self.step.min(buf.remaining());
        let end = (self.pos + take).min(self.data.len());
        buf.put_slice(&self.data[self.pos..end]);
        self.pos = end;
        std::task::Poll::Ready(Ok(()))
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 5)) as u8).collect()
}
