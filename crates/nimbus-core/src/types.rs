use nimbus_crypto::encoding::{b64, b64_array};
use nimbus_crypto::{BoxPublicKey, KeyBundle, MetadataBundle, NONCE_SIZE};
use serde::{Deserialize, Serialize};

/// Opaque backend-assigned node identifier
pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

/// A folder or file as stored by the backend. Holds ciphertext only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: NodeId,
    /// None for root-level nodes, whose key is wrapped under the master key
    pub parent_id: Option<NodeId>,
    pub kind: NodeKind,
    pub key_bundle: KeyBundle,
    pub metadata_bundle: MetadataBundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_size: Option<u64>,
    /// Object storage location of the encrypted body (files only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Node creation request; the backend assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNode {
    pub parent_id: Option<NodeId>,
    pub kind: NodeKind,
    pub key_bundle: KeyBundle,
    pub metadata_bundle: MetadataBundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl NewNode {
    pub fn into_record(self, id: NodeId) -> NodeRecord {
        NodeRecord {
            id,
            parent_id: self.parent_id,
            kind: self.kind,
            key_bundle: self.key_bundle,
            metadata_bundle: self.metadata_bundle,
            encrypted_size: self.encrypted_size,
            url: self.url,
        }
    }
}

/// Move a node: new parent plus its key re-wrapped under the new parent's key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub node_id: NodeId,
    pub new_parent_id: Option<NodeId>,
    pub key_bundle: KeyBundle,
}

/// Rename a node: metadata re-encrypted under the unchanged node key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub node_id: NodeId,
    pub metadata_bundle: MetadataBundle,
}

/// Server login challenge: an access token boxed to the user's public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginChallenge {
    #[serde(with = "b64")]
    pub encrypted_access_token: Vec<u8>,
    #[serde(with = "b64_array")]
    pub access_token_nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64_array")]
    pub server_public_key: BoxPublicKey,
}

/// ETag returned by the object store for one uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}
