//! Asset domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A leaf manageable resource (host, database, device). An asset may sit
/// under multiple nodes simultaneously; the relation rows live in the
/// `asset_node` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Network address (hostname or IP).
    pub address: String,
    /// Platform label (e.g., `linux`, `windows`).
    pub platform: String,
    pub is_active: bool,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAsset {
    pub tenant_id: Uuid,
    pub name: String,
    pub address: String,
    pub platform: String,
    pub comment: String,
}

/// One asset↔node relation row, denormalized with the node's key so
/// subtree queries are pure prefix matches on the relation table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetNodeRelation {
    pub asset_id: Uuid,
    pub node_id: Uuid,
    pub node_key: String,
}
