//! Node key service: per-folder / per-file keys wrapped under their parent
//!
//! Root-level nodes wrap under the master key; everything else wraps under
//! the key of its containing folder. A move re-wraps the existing key under
//! the new parent, so the node's ciphertext never changes.

use crate::error::{CryptoError, CryptoResult};
use crate::secret::{MasterKey, NodeKey};
use crate::wrap::{unwrap_secret, wrap_secret, KeyBundle};
use crate::KEY_SIZE;

/// The key a node's own key is wrapped under.
#[derive(Debug, Clone, Copy)]
pub enum ParentKey<'a> {
    /// Root-level node
    Master(&'a MasterKey),
    /// Node inside a folder
    Folder(&'a NodeKey),
}

impl ParentKey<'_> {
    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        match self {
            ParentKey::Master(k) => k.as_bytes(),
            ParentKey::Folder(k) => k.as_bytes(),
        }
    }
}

impl<'a> From<&'a MasterKey> for ParentKey<'a> {
    fn from(key: &'a MasterKey) -> Self {
        ParentKey::Master(key)
    }
}

impl<'a> From<&'a NodeKey> for ParentKey<'a> {
    fn from(key: &'a NodeKey) -> Self {
        ParentKey::Folder(key)
    }
}

/// Generate a fresh node key and wrap it under `parent`.
pub fn generate_node_key(parent: ParentKey<'_>) -> CryptoResult<(NodeKey, KeyBundle)> {
    let node_key = NodeKey::generate();
    let wrapped = wrap_secret(parent.as_bytes(), node_key.as_bytes())?;
    Ok((node_key, wrapped))
}

/// Unwrap a node key with its parent's key.
pub fn unwrap_node_key(parent: ParentKey<'_>, wrapped: &KeyBundle) -> CryptoResult<NodeKey> {
    let raw = unwrap_secret(parent.as_bytes(), wrapped)?;
    NodeKey::from_slice(&raw)
}

/// Re-wrap an already-known node key under a new parent (fresh nonce).
pub fn rewrap_node_key(new_parent: ParentKey<'_>, node_key: &NodeKey) -> CryptoResult<KeyBundle> {
    wrap_secret(new_parent.as_bytes(), node_key.as_bytes())
}

/// Unwrap a root-to-leaf chain of folder key bundles, strictly in order.
///
/// Entry 0 is unwrapped with the master key and each following entry with the
/// previous entry's key. The first failure stops the walk and is reported as
/// [`CryptoError::BrokenChain`] at that depth.
pub fn unwrap_breadcrumbs(master: &MasterKey, chain: &[KeyBundle]) -> CryptoResult<Vec<NodeKey>> {
    let mut keys: Vec<NodeKey> = Vec::with_capacity(chain.len());
    for (depth, bundle) in chain.iter().enumerate() {
        let parent = match keys.last() {
            Some(folder) => ParentKey::Folder(folder),
            None => ParentKey::Master(master),
        };
        let key = unwrap_node_key(parent, bundle).map_err(|e| match e {
            CryptoError::Authentication(_) => CryptoError::BrokenChain { depth },
            other => other,
        })?;
        keys.push(key);
    }
    Ok(keys)
}
