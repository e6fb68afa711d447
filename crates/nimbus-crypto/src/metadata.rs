//! Node metadata cipher
//!
//! Names, timestamps, sizes and mime types are serialized to JSON and sealed
//! under the node's own key. Metadata and key wrapping are independent:
//! renaming re-encrypts the metadata and leaves the [`KeyBundle`] alone,
//! moving re-wraps the key and leaves the [`MetadataBundle`] alone.
//!
//! [`KeyBundle`]: crate::wrap::KeyBundle

use serde::{Deserialize, Serialize};

use crate::encoding::{b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::secret::NodeKey;
use crate::wrap::{open, seal};
use crate::NONCE_SIZE;

/// Plaintext metadata of a folder or file. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub name: String,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    /// Plaintext size in bytes (files only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl NodeMetadata {
    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created: None,
            modified: None,
            size: None,
            mime_type: None,
        }
    }

    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::folder(name)
        }
    }

    pub fn with_mime_type(self, mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: Some(mime_type.into()),
            ..self
        }
    }

    pub fn with_timestamps(self, created: u64, modified: u64) -> Self {
        Self {
            created: Some(created),
            modified: Some(modified),
            ..self
        }
    }

    /// A copy with a new name; the original is left untouched.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Metadata sealed under a node key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataBundle {
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64")]
    pub encrypted_metadata: Vec<u8>,
}

/// Serialize and seal `metadata` under `node_key` with a fresh nonce.
pub fn encrypt_metadata(
    node_key: &NodeKey,
    metadata: &NodeMetadata,
) -> CryptoResult<MetadataBundle> {
    let json = serde_json::to_vec(metadata)
        .map_err(|e| CryptoError::Encoding(format!("metadata serialization: {e}")))?;
    let (nonce, encrypted_metadata) = seal(node_key.as_bytes(), &json)?;
    Ok(MetadataBundle {
        nonce,
        encrypted_metadata,
    })
}

/// Open a metadata bundle.
///
/// Tamper or a wrong key is an authentication failure; callers must not fall
/// back to displaying anything for the node.
pub fn decrypt_metadata(node_key: &NodeKey, bundle: &MetadataBundle) -> CryptoResult<NodeMetadata> {
    let json = open(
        node_key.as_bytes(),
        &bundle.nonce,
        &bundle.encrypted_metadata,
        "metadata decryption failed: wrong key or tampered bundle",
    )?;
    serde_json::from_slice(&json)
        .map_err(|e| CryptoError::Malformed(format!("decrypted metadata is not valid JSON: {e}")))
}
