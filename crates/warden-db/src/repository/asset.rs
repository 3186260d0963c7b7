//! SurrealDB implementation of [`AssetRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::key;
use warden_core::models::asset::{Asset, AssetNodeRelation, CreateAsset};
use warden_core::repository::{AssetRepository, PaginatedResult, Pagination};

use crate::error::DbError;
use crate::repository::{parse_uuid, parse_uuid_list};

#[derive(Debug, SurrealValue)]
struct AssetRow {
    tenant_id: String,
    name: String,
    address: String,
    platform: String,
    is_active: bool,
    comment: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct AssetRowWithId {
    record_id: String,
    tenant_id: String,
    name: String,
    address: String,
    platform: String,
    is_active: bool,
    comment: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AssetRowWithId {
    fn try_into_asset(self) -> Result<Asset, DbError> {
        Ok(Asset {
            id: parse_uuid(&self.record_id, "asset")?,
            tenant_id: parse_uuid(&self.tenant_id, "tenant")?,
            name: self.name,
            address: self.address,
            platform: self.platform,
            is_active: self.is_active,
            comment: self.comment,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct RelationRow {
    asset_id: String,
    node_id: String,
    node_key: String,
}

impl RelationRow {
    fn try_into_relation(self) -> Result<AssetNodeRelation, DbError> {
        Ok(AssetNodeRelation {
            asset_id: parse_uuid(&self.asset_id, "asset")?,
            node_id: parse_uuid(&self.node_id, "node")?,
            node_key: self.node_key,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// Builds the subtree filter `(node_key = k OR starts_with(node_key, "k:"))
/// OR ...` over the cleaned key set. Keys are internal path strings.
fn subtree_filter(keys: &[String]) -> String {
    let clauses: Vec<String> = keys
        .iter()
        .map(|k| format!("(node_key = '{k}' OR string::starts_with(node_key, '{k}:'))"))
        .collect();
    clauses.join(" OR ")
}

/// SurrealDB implementation of the Asset repository.
///
/// Relation rows carry the node key, so every "is this asset anywhere
/// under that subtree" question is a prefix match on `asset_node` with
/// no join back to `node`.
#[derive(Clone)]
pub struct SurrealAssetRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAssetRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AssetRepository for SurrealAssetRepository<C> {
    async fn create(&self, input: CreateAsset) -> WardenResult<Asset> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('asset', $id) SET \
                 tenant_id = $tenant_id, name = $name, address = $address, \
                 platform = $platform, is_active = true, comment = $comment",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("name", input.name))
            .bind(("address", input.address))
            .bind(("platform", input.platform))
            .bind(("comment", input.comment))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<AssetRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "asset".into(),
            id: id_str,
        })?;

        Ok(Asset {
            id,
            tenant_id: parse_uuid(&row.tenant_id, "tenant")?,
            name: row.name,
            address: row.address,
            platform: row.platform,
            is_active: row.is_active,
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> WardenResult<Asset> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('asset', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AssetRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "asset".into(),
            id: id_str,
        })?;

        Ok(Asset {
            id,
            tenant_id,
            name: row.name,
            address: row.address,
            platform: row.platform,
            is_active: row.is_active,
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> WardenResult<PaginatedResult<Asset>> {
        let tenant_id_str = tenant_id.to_string();

        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM asset \
                 WHERE tenant_id = $tenant_id GROUP ALL",
            )
            .bind(("tenant_id", tenant_id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM asset \
                 WHERE tenant_id = $tenant_id \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("tenant_id", tenant_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AssetRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_asset())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn list_relations(&self, tenant_id: Uuid) -> WardenResult<Vec<AssetNodeRelation>> {
        let mut result = self
            .db
            .query(
                "SELECT asset_id, node_id, node_key FROM asset_node \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RelationRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| row.try_into_relation())
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn existing_relations(
        &self,
        tenant_id: Uuid,
        asset_ids: Vec<Uuid>,
        node_ids: Vec<Uuid>,
    ) -> WardenResult<Vec<AssetNodeRelation>> {
        if asset_ids.is_empty() || node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let asset_id_strs: Vec<String> = asset_ids.iter().map(|a| a.to_string()).collect();
        let node_id_strs: Vec<String> = node_ids.iter().map(|n| n.to_string()).collect();

        let mut result = self
            .db
            .query(
                "SELECT asset_id, node_id, node_key FROM asset_node \
                 WHERE tenant_id = $tenant_id \
                 AND asset_id IN $asset_ids AND node_id IN $node_ids",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("asset_ids", asset_id_strs))
            .bind(("node_ids", node_id_strs))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RelationRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| row.try_into_relation())
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn asset_exists_under(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        node_key: &str,
        exclude_node_ids: Vec<Uuid>,
    ) -> WardenResult<bool> {
        let prefix = format!("{node_key}:");
        let excluded: Vec<String> = exclude_node_ids.iter().map(|n| n.to_string()).collect();

        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM asset_node \
                 WHERE tenant_id = $tenant_id AND asset_id = $asset_id \
                 AND (node_key = $key OR string::starts_with(node_key, $prefix)) \
                 AND node_id NOT IN $excluded GROUP ALL",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("asset_id", asset_id.to_string()))
            .bind(("key", node_key.to_string()))
            .bind(("prefix", prefix))
            .bind(("excluded", excluded))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0) > 0)
    }

    async fn assets_present_under(
        &self,
        tenant_id: Uuid,
        asset_ids: Vec<Uuid>,
        node_key: &str,
        exclude_node_ids: Vec<Uuid>,
    ) -> WardenResult<Vec<Uuid>> {
        if asset_ids.is_empty() {
            return Ok(Vec::new());
        }
        let prefix = format!("{node_key}:");
        let asset_id_strs: Vec<String> = asset_ids.iter().map(|a| a.to_string()).collect();
        let excluded: Vec<String> = exclude_node_ids.iter().map(|n| n.to_string()).collect();

        let mut result = self
            .db
            .query(
                "SELECT VALUE asset_id FROM asset_node \
                 WHERE tenant_id = $tenant_id AND asset_id IN $asset_ids \
                 AND (node_key = $key OR string::starts_with(node_key, $prefix)) \
                 AND node_id NOT IN $excluded",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("asset_ids", asset_id_strs))
            .bind(("key", node_key.to_string()))
            .bind(("prefix", prefix))
            .bind(("excluded", excluded))
            .await
            .map_err(DbError::from)?;

        let mut ids: Vec<String> = result.take(0).map_err(DbError::from)?;
        ids.sort();
        ids.dedup();
        parse_uuid_list(ids, "asset").map_err(Into::into)
    }

    async fn assets_under_keys(
        &self,
        tenant_id: Uuid,
        keys: Vec<String>,
    ) -> WardenResult<Vec<Uuid>> {
        let cleaned = key::clean_children_keys(keys);
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT VALUE asset_id FROM asset_node \
             WHERE tenant_id = $tenant_id AND ({})",
            subtree_filter(&cleaned),
        );

        let mut result = self
            .db
            .query(query)
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let mut ids: Vec<String> = result.take(0).map_err(DbError::from)?;
        ids.sort();
        ids.dedup();
        parse_uuid_list(ids, "asset").map_err(Into::into)
    }

    async fn node_keys_of(&self, tenant_id: Uuid, asset_id: Uuid) -> WardenResult<Vec<String>> {
        let mut result = self
            .db
            .query(
                "SELECT VALUE node_key FROM asset_node \
                 WHERE tenant_id = $tenant_id AND asset_id = $asset_id",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("asset_id", asset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let keys: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(keys)
    }
}
