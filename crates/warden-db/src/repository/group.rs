//! SurrealDB implementation of [`GroupRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::models::group::{CreateGroup, Group};
use warden_core::repository::GroupRepository;

use crate::error::DbError;
use crate::repository::{parse_uuid, parse_uuid_list};

#[derive(Debug, SurrealValue)]
struct GroupRow {
    tenant_id: String,
    name: String,
    comment: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// SurrealDB implementation of the Group repository.
///
/// User↔group membership lives in the `user_group` table; a unique index
/// on `(user_id, group_id)` plus `INSERT IGNORE` makes `add_member`
/// idempotent.
#[derive(Clone)]
pub struct SurrealGroupRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealGroupRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> GroupRepository for SurrealGroupRepository<C> {
    async fn create(&self, input: CreateGroup) -> WardenResult<Group> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('usergroup', $id) SET \
                 tenant_id = $tenant_id, name = $name, comment = $comment",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("name", input.name))
            .bind(("comment", input.comment))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<GroupRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "group".into(),
            id: id_str,
        })?;

        Ok(Group {
            id,
            tenant_id: parse_uuid(&row.tenant_id, "tenant")?,
            name: row.name,
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> WardenResult<Group> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('usergroup', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GroupRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "group".into(),
            id: id_str,
        })?;

        Ok(Group {
            id,
            tenant_id,
            name: row.name,
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn add_member(&self, tenant_id: Uuid, user_id: Uuid, group_id: Uuid) -> WardenResult<()> {
        self.db
            .query(
                "INSERT IGNORE INTO user_group { \
                 tenant_id: $tenant_id, user_id: $user_id, \
                 group_id: $group_id }",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("group_id", group_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn remove_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        group_id: Uuid,
    ) -> WardenResult<()> {
        self.db
            .query(
                "DELETE user_group WHERE tenant_id = $tenant_id \
                 AND user_id = $user_id AND group_id = $group_id",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("group_id", group_id.to_string()))
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn get_user_group_ids(&self, tenant_id: Uuid, user_id: Uuid) -> WardenResult<Vec<Uuid>> {
        let mut result = self
            .db
            .query(
                "SELECT VALUE group_id FROM user_group \
                 WHERE tenant_id = $tenant_id AND user_id = $user_id",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let ids: Vec<String> = result.take(0).map_err(DbError::from)?;
        parse_uuid_list(ids, "group").map_err(Into::into)
    }

    async fn get_member_ids(&self, tenant_id: Uuid, group_ids: Vec<Uuid>) -> WardenResult<Vec<Uuid>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let group_id_strs: Vec<String> = group_ids.iter().map(|g| g.to_string()).collect();

        let mut result = self
            .db
            .query(
                "SELECT VALUE user_id FROM user_group \
                 WHERE tenant_id = $tenant_id AND group_id IN $group_ids",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("group_ids", group_id_strs))
            .await
            .map_err(DbError::from)?;

        let mut ids: Vec<String> = result.take(0).map_err(DbError::from)?;
        ids.sort();
        ids.dedup();
        parse_uuid_list(ids, "user").map_err(Into::into)
    }
}
