//! SurrealDB implementation of [`NodeRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;
use warden_core::error::{WardenError, WardenResult};
use warden_core::events::ChangeKind;
use warden_core::key;
use warden_core::models::node::Node;
use warden_core::repository::{NodeRepository, RelationWrite};

use crate::error::DbError;
use crate::repository::parse_uuid;

#[derive(Debug, SurrealValue)]
struct NodeRow {
    tenant_id: String,
    key: String,
    value: String,
    assets_amount: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct NodeRowWithId {
    record_id: String,
    tenant_id: String,
    key: String,
    value: String,
    assets_amount: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NodeRowWithId {
    fn try_into_node(self) -> Result<Node, DbError> {
        Ok(Node {
            id: parse_uuid(&self.record_id, "node")?,
            tenant_id: parse_uuid(&self.tenant_id, "tenant")?,
            key: self.key,
            value: self.value,
            assets_amount: self.assets_amount,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// SurrealDB implementation of the Node repository.
///
/// Keys are validated and assigned here; `assets_amount` is only ever
/// written through [`apply_relation_change`] / [`set_assets_amounts`],
/// which the engine calls under the tenant lock.
///
/// [`apply_relation_change`]: NodeRepository::apply_relation_change
/// [`set_assets_amounts`]: NodeRepository::set_assets_amounts
#[derive(Clone)]
pub struct SurrealNodeRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealNodeRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn create_with_key(&self, tenant_id: Uuid, node_key: String, value: String) -> WardenResult<Node> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('node', $id) SET \
                 tenant_id = $tenant_id, key = $key, value = $value, \
                 assets_amount = 0",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("key", node_key))
            .bind(("value", value))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<NodeRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "node".into(),
            id: id_str,
        })?;

        Ok(Node {
            id,
            tenant_id,
            key: row.key,
            value: row.value,
            assets_amount: row.assets_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Keys of the direct children of `parent_key`.
    async fn child_keys(&self, tenant_id: Uuid, parent_key: &str) -> WardenResult<Vec<String>> {
        let prefix = format!("{parent_key}:");

        let mut result = self
            .db
            .query(
                "SELECT VALUE key FROM node \
                 WHERE tenant_id = $tenant_id \
                 AND string::starts_with(key, $prefix)",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("prefix", prefix))
            .await
            .map_err(DbError::from)?;

        let keys: Vec<String> = result.take(0).map_err(DbError::from)?;
        let child_depth = key::depth_of(parent_key) + 1;
        Ok(keys
            .into_iter()
            .filter(|k| key::depth_of(k) == child_depth)
            .collect())
    }
}

impl<C: Connection> NodeRepository for SurrealNodeRepository<C> {
    async fn create_root(&self, tenant_id: Uuid, value: String) -> WardenResult<Node> {
        if self.get_by_key(tenant_id, "1").await.is_ok() {
            return Err(WardenError::AlreadyExists {
                entity: "root node".into(),
            });
        }
        self.create_with_key(tenant_id, "1".to_string(), value).await
    }

    async fn create_child(&self, tenant_id: Uuid, parent_id: Uuid, value: String) -> WardenResult<Node> {
        let parent = self.get_by_id(tenant_id, parent_id).await?;

        let siblings = self.child_keys(tenant_id, &parent.key).await?;
        let next_suffix = siblings
            .iter()
            .filter_map(|k| k.rsplit(':').next())
            .filter_map(|seg| seg.parse::<u64>().ok())
            .max()
            .map_or(1, |max| max + 1);

        let child_key = format!("{}:{next_suffix}", parent.key);
        self.create_with_key(tenant_id, child_key, value).await
    }

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> WardenResult<Node> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('node', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<NodeRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "node".into(),
            id: id_str,
        })?;

        Ok(Node {
            id,
            tenant_id,
            key: row.key,
            value: row.value,
            assets_amount: row.assets_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn get_by_key(&self, tenant_id: Uuid, node_key: &str) -> WardenResult<Node> {
        let node_key = node_key.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM node \
                 WHERE tenant_id = $tenant_id AND key = $key",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("key", node_key.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<NodeRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "node".into(),
            id: node_key,
        })?;

        row.try_into_node().map_err(Into::into)
    }

    async fn get_by_keys(&self, tenant_id: Uuid, keys: Vec<String>) -> WardenResult<Vec<Node>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM node \
                 WHERE tenant_id = $tenant_id AND key IN $keys",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("keys", keys))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<NodeRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| row.try_into_node())
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> WardenResult<Vec<Node>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM node \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<NodeRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| row.try_into_node())
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> WardenResult<()> {
        let node = self.get_by_id(tenant_id, id).await?;
        let tenant_id_str = tenant_id.to_string();
        let id_str = id.to_string();
        let prefix = format!("{}:", node.key);

        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM node \
                 WHERE tenant_id = $tenant_id \
                 AND string::starts_with(key, $prefix) GROUP ALL; \
                 SELECT count() AS total FROM asset_node \
                 WHERE node_id = $node_id GROUP ALL",
            )
            .bind(("tenant_id", tenant_id_str.clone()))
            .bind(("prefix", prefix))
            .bind(("node_id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let children: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let relations: Vec<CountRow> = result.take(1).map_err(DbError::from)?;
        let child_count = children.first().map(|r| r.total).unwrap_or(0);
        let relation_count = relations.first().map(|r| r.total).unwrap_or(0);

        if child_count > 0 || relation_count > 0 {
            return Err(WardenError::Validation {
                message: format!(
                    "node {} still has {child_count} children and {relation_count} attached assets",
                    node.key
                ),
            });
        }

        self.db
            .query("DELETE type::record('node', $id) WHERE tenant_id = $tenant_id")
            .bind(("id", id_str))
            .bind(("tenant_id", tenant_id_str))
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn apply_relation_change(
        &self,
        tenant_id: Uuid,
        writes: Vec<RelationWrite>,
        kind: ChangeKind,
        amount_deltas: Vec<(String, i64)>,
    ) -> WardenResult<()> {
        if writes.is_empty() && amount_deltas.is_empty() {
            return Ok(());
        }

        // All values interpolated here are internally generated (UUIDs and
        // numeric path keys), never user input.
        let tenant = tenant_id.to_string();
        let mut statements = vec!["BEGIN TRANSACTION;".to_string()];

        for w in &writes {
            match kind {
                ChangeKind::Add => statements.push(format!(
                    "INSERT IGNORE INTO asset_node {{ tenant_id: '{tenant}', \
                     asset_id: '{}', node_id: '{}', node_key: '{}' }};",
                    w.asset_id, w.node_id, w.node_key,
                )),
                ChangeKind::Remove => statements.push(format!(
                    "DELETE asset_node WHERE asset_id = '{}' AND node_id = '{}';",
                    w.asset_id, w.node_id,
                )),
            }
        }

        for (node_key, delta) in &amount_deltas {
            statements.push(format!(
                "UPDATE node SET assets_amount += {delta}, \
                 updated_at = time::now() \
                 WHERE tenant_id = '{tenant}' AND key = '{node_key}';",
            ));
        }

        statements.push("COMMIT TRANSACTION;".to_string());

        self.db
            .query(statements.join("\n"))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn set_assets_amounts(
        &self,
        tenant_id: Uuid,
        amounts: Vec<(String, i64)>,
    ) -> WardenResult<()> {
        if amounts.is_empty() {
            return Ok(());
        }

        let tenant = tenant_id.to_string();
        let mut statements = vec!["BEGIN TRANSACTION;".to_string()];
        for (node_key, amount) in &amounts {
            statements.push(format!(
                "UPDATE node SET assets_amount = {amount}, \
                 updated_at = time::now() \
                 WHERE tenant_id = '{tenant}' AND key = '{node_key}';",
            ));
        }
        statements.push("COMMIT TRANSACTION;".to_string());

        self.db
            .query(statements.join("\n"))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Transaction(e.to_string()))?;

        Ok(())
    }
}
