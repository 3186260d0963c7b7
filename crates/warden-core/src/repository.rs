//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Tenant-scoped repositories require
//! a `tenant_id` parameter to enforce data isolation. Owned argument types
//! (`Vec`, `String`) are used where backends need `'static` bindings.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::WardenResult;
use crate::events::{ChangeKind, GrantField};
use crate::models::{
    asset::{Asset, AssetNodeRelation, CreateAsset},
    grant::{CreateGrant, Grant, UpdateGrant},
    group::{CreateGroup, Group},
    node::Node,
    tenant::{CreateTenant, Tenant},
    user::{CreateUser, User},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// One asset↔node relation row to insert or delete.
#[derive(Debug, Clone)]
pub struct RelationWrite {
    pub asset_id: Uuid,
    pub node_id: Uuid,
    pub node_key: String,
}

pub trait TenantRepository: Send + Sync {
    /// Create a tenant together with its root node (key `"1"`), atomically.
    fn create(&self, input: CreateTenant) -> impl Future<Output = WardenResult<Tenant>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = WardenResult<Tenant>> + Send;
    fn get_by_slug(&self, slug: &str) -> impl Future<Output = WardenResult<Tenant>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = WardenResult<PaginatedResult<Tenant>>> + Send;
}

pub trait UserRepository: Send + Sync {
    fn create(&self, input: CreateUser) -> impl Future<Output = WardenResult<User>> + Send;
    fn get_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = WardenResult<User>> + Send;
    fn list(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> impl Future<Output = WardenResult<PaginatedResult<User>>> + Send;
}

pub trait GroupRepository: Send + Sync {
    fn create(&self, input: CreateGroup) -> impl Future<Output = WardenResult<Group>> + Send;
    fn get_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = WardenResult<Group>> + Send;

    fn add_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        group_id: Uuid,
    ) -> impl Future<Output = WardenResult<()>> + Send;
    fn remove_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        group_id: Uuid,
    ) -> impl Future<Output = WardenResult<()>> + Send;

    /// All groups a user belongs to.
    fn get_user_group_ids(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = WardenResult<Vec<Uuid>>> + Send;

    /// Distinct user ids across the given groups.
    fn get_member_ids(
        &self,
        tenant_id: Uuid,
        group_ids: Vec<Uuid>,
    ) -> impl Future<Output = WardenResult<Vec<Uuid>>> + Send;
}

pub trait NodeRepository: Send + Sync {
    /// Create the tenant root node (key `"1"`). Errors if one exists.
    fn create_root(
        &self,
        tenant_id: Uuid,
        value: String,
    ) -> impl Future<Output = WardenResult<Node>> + Send;

    /// Create a child under `parent_id`, assigning the next free child key.
    fn create_child(
        &self,
        tenant_id: Uuid,
        parent_id: Uuid,
        value: String,
    ) -> impl Future<Output = WardenResult<Node>> + Send;

    fn get_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = WardenResult<Node>> + Send;
    fn get_by_key(
        &self,
        tenant_id: Uuid,
        key: &str,
    ) -> impl Future<Output = WardenResult<Node>> + Send;
    fn get_by_keys(
        &self,
        tenant_id: Uuid,
        keys: Vec<String>,
    ) -> impl Future<Output = WardenResult<Vec<Node>>> + Send;
    fn list_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> impl Future<Output = WardenResult<Vec<Node>>> + Send;

    /// Delete a leaf node. Errors with `Validation` if the node still has
    /// children or attached assets.
    fn delete(&self, tenant_id: Uuid, id: Uuid) -> impl Future<Output = WardenResult<()>> + Send;

    /// Apply a relation change and its aggregate deltas in one transaction.
    ///
    /// Inserts (or deletes) the given relation rows and adds each
    /// `(key, delta)` to that node's `assets_amount`. If any statement
    /// fails the whole batch rolls back: a half-applied aggregate update
    /// silently desynchronizes counts with no self-healing path.
    fn apply_relation_change(
        &self,
        tenant_id: Uuid,
        writes: Vec<RelationWrite>,
        kind: ChangeKind,
        amount_deltas: Vec<(String, i64)>,
    ) -> impl Future<Output = WardenResult<()>> + Send;

    /// Overwrite `assets_amount` for the given keys (recount repair).
    fn set_assets_amounts(
        &self,
        tenant_id: Uuid,
        amounts: Vec<(String, i64)>,
    ) -> impl Future<Output = WardenResult<()>> + Send;
}

pub trait AssetRepository: Send + Sync {
    fn create(&self, input: CreateAsset) -> impl Future<Output = WardenResult<Asset>> + Send;
    fn get_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = WardenResult<Asset>> + Send;
    fn list(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> impl Future<Output = WardenResult<PaginatedResult<Asset>>> + Send;

    /// All asset↔node relation rows of a tenant (snapshot load).
    fn list_relations(
        &self,
        tenant_id: Uuid,
    ) -> impl Future<Output = WardenResult<Vec<AssetNodeRelation>>> + Send;

    /// Relation rows matching both id sets (idempotence filtering).
    fn existing_relations(
        &self,
        tenant_id: Uuid,
        asset_ids: Vec<Uuid>,
        node_ids: Vec<Uuid>,
    ) -> impl Future<Output = WardenResult<Vec<AssetNodeRelation>>> + Send;

    /// Whether `asset_id` is attached anywhere in the subtree rooted at
    /// `node_key` (self or `key:` prefix), ignoring relations to the
    /// excluded nodes. Must be a consistent read against the primary store.
    fn asset_exists_under(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        node_key: &str,
        exclude_node_ids: Vec<Uuid>,
    ) -> impl Future<Output = WardenResult<bool>> + Send;

    /// Subset of `asset_ids` attached anywhere under `node_key`, ignoring
    /// relations to the excluded nodes.
    fn assets_present_under(
        &self,
        tenant_id: Uuid,
        asset_ids: Vec<Uuid>,
        node_key: &str,
        exclude_node_ids: Vec<Uuid>,
    ) -> impl Future<Output = WardenResult<Vec<Uuid>>> + Send;

    /// Distinct asset ids attached under any of the given subtree keys.
    fn assets_under_keys(
        &self,
        tenant_id: Uuid,
        keys: Vec<String>,
    ) -> impl Future<Output = WardenResult<Vec<Uuid>>> + Send;

    /// Keys of the nodes an asset is directly attached to.
    fn node_keys_of(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
    ) -> impl Future<Output = WardenResult<Vec<String>>> + Send;
}

pub trait GrantRepository: Send + Sync {
    fn create(&self, input: CreateGrant) -> impl Future<Output = WardenResult<Grant>> + Send;
    fn get_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = WardenResult<Grant>> + Send;
    fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdateGrant,
    ) -> impl Future<Output = WardenResult<Grant>> + Send;
    fn delete(&self, tenant_id: Uuid, id: Uuid) -> impl Future<Output = WardenResult<()>> + Send;
    fn list(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> impl Future<Output = WardenResult<PaginatedResult<Grant>>> + Send;

    /// Add ids to one of the grant's membership fields.
    fn add_members(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        field: GrantField,
        ids: Vec<Uuid>,
    ) -> impl Future<Output = WardenResult<Grant>> + Send;
    fn remove_members(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        field: GrantField,
        ids: Vec<Uuid>,
    ) -> impl Future<Output = WardenResult<Grant>> + Send;

    /// Grants applicable to a user: user in `user_ids`, or any of the
    /// user's groups in `group_ids`. With `valid_only`, restricted to
    /// currently valid grants.
    fn grants_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        group_ids: Vec<Uuid>,
        valid_only: bool,
    ) -> impl Future<Output = WardenResult<Vec<Grant>>> + Send;

    /// Grants whose targets intersect the given node or asset ids.
    fn grants_covering(
        &self,
        tenant_id: Uuid,
        node_ids: Vec<Uuid>,
        asset_ids: Vec<Uuid>,
    ) -> impl Future<Output = WardenResult<Vec<Grant>>> + Send;

    /// Grants (across all tenants) whose `date_expired` falls in
    /// `(from, to]` — the periodic expiry sweep window.
    fn grants_expiring_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = WardenResult<Vec<Grant>>> + Send;
}
