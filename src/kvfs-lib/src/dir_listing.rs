use crate::{FsError, FsResult, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Payload of a directory inode: the mapping from child name to child node
/// id. Encodes to a JSON object, so an empty directory is a real (non-empty)
/// blob and stays distinguishable from a missing key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirListing(pub BTreeMap<String, NodeId>);

impl DirListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&NodeId> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: String, id: NodeId) -> Option<NodeId> {
        self.0.insert(name, id)
    }

    pub fn remove(&mut self, name: &str) -> Option<NodeId> {
        self.0.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn encode(&self) -> FsResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| FsError::DecodeError(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> FsResult<Self> {
        serde_json::from_slice(data).map_err(|e| FsError::DecodeError(e.to_string()))
    }
}
