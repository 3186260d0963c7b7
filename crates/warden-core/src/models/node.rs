//! Node domain model.
//!
//! Nodes form the hierarchical asset inventory. Every node is addressed by
//! a colon-delimited path key (`"1:4:9"`); single-segment keys are tenant
//! roots. `assets_amount` is a materialized aggregate: the number of
//! distinct assets reachable anywhere in the node's subtree. It is mutated
//! only by the aggregate-maintenance algorithm in `warden-engine`, never by
//! direct edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Colon-delimited path of numeric segments.
    pub key: String,
    /// Display name.
    pub value: String,
    /// Count of distinct assets reachable in this node's subtree.
    pub assets_amount: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Derived parent key; `None` for a tenant root.
    pub fn parent_key(&self) -> Option<&str> {
        key::parent_key_of(&self.key)
    }

    pub fn is_root(&self) -> bool {
        self.parent_key().is_none()
    }

    /// Ancestor keys of this node, nearest first.
    pub fn ancestor_keys(&self, with_self: bool) -> Vec<String> {
        key::ancestor_keys_of(&self.key, with_self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNode {
    pub tenant_id: Uuid,
    pub key: String,
    pub value: String,
}
