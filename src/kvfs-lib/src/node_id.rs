use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The reserved store key of the root directory inode.
pub const ROOT_NODE_ID: &str = "/";

/// Store key of one filesystem object. The root inode lives under the
/// reserved key `/`; every other id is a 36-character hyphenated UUID-v4.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn root() -> Self {
        NodeId(ROOT_NODE_ID.to_string())
    }

    pub fn random() -> Self {
        NodeId(Uuid::new_v4().to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_NODE_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
