//! SurrealDB implementation of [`GrantRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::events::GrantField;
use warden_core::models::action::ActionSet;
use warden_core::models::grant::{CreateGrant, Grant, UpdateGrant};
use warden_core::repository::{GrantRepository, PaginatedResult, Pagination};

use crate::error::DbError;
use crate::repository::{parse_uuid, parse_uuid_list};

#[derive(Debug, SurrealValue)]
struct GrantRowWithId {
    record_id: String,
    tenant_id: String,
    name: String,
    user_ids: Vec<String>,
    group_ids: Vec<String>,
    node_ids: Vec<String>,
    asset_ids: Vec<String>,
    accounts: Vec<String>,
    actions: i64,
    date_start: DateTime<Utc>,
    date_expired: DateTime<Utc>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GrantRowWithId {
    fn try_into_grant(self) -> Result<Grant, DbError> {
        Ok(Grant {
            id: parse_uuid(&self.record_id, "grant")?,
            tenant_id: parse_uuid(&self.tenant_id, "tenant")?,
            name: self.name,
            user_ids: parse_uuid_list(self.user_ids, "user")?,
            group_ids: parse_uuid_list(self.group_ids, "group")?,
            node_ids: parse_uuid_list(self.node_ids, "node")?,
            asset_ids: parse_uuid_list(self.asset_ids, "asset")?,
            accounts: self.accounts,
            actions: ActionSet::from_bits(self.actions as u32),
            date_start: self.date_start,
            date_expired: self.date_expired,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn field_column(field: GrantField) -> &'static str {
    match field {
        GrantField::Users => "user_ids",
        GrantField::Groups => "group_ids",
        GrantField::Nodes => "node_ids",
        GrantField::Assets => "asset_ids",
    }
}

/// SurrealDB implementation of the Grant repository.
///
/// Grantees and targets live in array columns on the `grant` row itself;
/// membership edits go through `array::union` / `array::complement` so a
/// replayed add or remove is a no-op.
#[derive(Clone)]
pub struct SurrealGrantRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealGrantRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> GrantRepository for SurrealGrantRepository<C> {
    async fn create(&self, input: CreateGrant) -> WardenResult<Grant> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let to_strs = |ids: &[Uuid]| ids.iter().map(|i| i.to_string()).collect::<Vec<_>>();

        self.db
            .query(
                "CREATE type::record('grant', $id) SET \
                 tenant_id = $tenant_id, name = $name, \
                 user_ids = $user_ids, group_ids = $group_ids, \
                 node_ids = $node_ids, asset_ids = $asset_ids, \
                 accounts = $accounts, actions = $actions, \
                 date_start = $date_start, date_expired = $date_expired, \
                 is_active = $is_active",
            )
            .bind(("id", id_str))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("name", input.name))
            .bind(("user_ids", to_strs(&input.user_ids)))
            .bind(("group_ids", to_strs(&input.group_ids)))
            .bind(("node_ids", to_strs(&input.node_ids)))
            .bind(("asset_ids", to_strs(&input.asset_ids)))
            .bind(("accounts", input.accounts))
            .bind(("actions", input.actions.bits() as i64))
            .bind(("date_start", input.date_start))
            .bind(("date_expired", input.date_expired))
            .bind(("is_active", input.is_active))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        self.get_by_id(input.tenant_id, id).await
    }

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> WardenResult<Grant> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('grant', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "grant".into(),
            id: id_str,
        })?;

        row.try_into_grant().map_err(Into::into)
    }

    async fn update(&self, tenant_id: Uuid, id: Uuid, input: UpdateGrant) -> WardenResult<Grant> {
        // Only touch the fields the caller set.
        let mut clauses: Vec<&str> = Vec::new();
        if input.name.is_some() {
            clauses.push("name = $name");
        }
        if input.accounts.is_some() {
            clauses.push("accounts = $accounts");
        }
        if input.actions.is_some() {
            clauses.push("actions = $actions");
        }
        if input.date_start.is_some() {
            clauses.push("date_start = $date_start");
        }
        if input.date_expired.is_some() {
            clauses.push("date_expired = $date_expired");
        }
        if input.is_active.is_some() {
            clauses.push("is_active = $is_active");
        }

        if clauses.is_empty() {
            return self.get_by_id(tenant_id, id).await;
        }

        let query = format!(
            "UPDATE type::record('grant', $id) SET {}, updated_at = time::now() \
             WHERE tenant_id = $tenant_id",
            clauses.join(", "),
        );

        let mut query = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("tenant_id", tenant_id.to_string()));

        if let Some(name) = input.name {
            query = query.bind(("name", name));
        }
        if let Some(accounts) = input.accounts {
            query = query.bind(("accounts", accounts));
        }
        if let Some(actions) = input.actions {
            query = query.bind(("actions", actions.bits() as i64));
        }
        if let Some(date_start) = input.date_start {
            query = query.bind(("date_start", date_start));
        }
        if let Some(date_expired) = input.date_expired {
            query = query.bind(("date_expired", date_expired));
        }
        if let Some(is_active) = input.is_active {
            query = query.bind(("is_active", is_active));
        }

        query
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        self.get_by_id(tenant_id, id).await
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> WardenResult<()> {
        self.db
            .query("DELETE type::record('grant', $id) WHERE tenant_id = $tenant_id")
            .bind(("id", id.to_string()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> WardenResult<PaginatedResult<Grant>> {
        let tenant_id_str = tenant_id.to_string();

        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM grant \
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
                "SELECT meta::id(id) AS record_id, * FROM grant \
                 WHERE tenant_id = $tenant_id \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("tenant_id", tenant_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_grant())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn add_members(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        field: GrantField,
        ids: Vec<Uuid>,
    ) -> WardenResult<Grant> {
        if ids.is_empty() {
            return self.get_by_id(tenant_id, id).await;
        }
        let column = field_column(field);
        let id_strs: Vec<String> = ids.iter().map(|i| i.to_string()).collect();

        let query = format!(
            "UPDATE type::record('grant', $id) \
             SET {column} = array::union({column}, $ids), \
             updated_at = time::now() \
             WHERE tenant_id = $tenant_id",
        );

        self.db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("ids", id_strs))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        self.get_by_id(tenant_id, id).await
    }

    async fn remove_members(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        field: GrantField,
        ids: Vec<Uuid>,
    ) -> WardenResult<Grant> {
        if ids.is_empty() {
            return self.get_by_id(tenant_id, id).await;
        }
        let column = field_column(field);
        let id_strs: Vec<String> = ids.iter().map(|i| i.to_string()).collect();

        let query = format!(
            "UPDATE type::record('grant', $id) \
             SET {column} = array::complement({column}, $ids), \
             updated_at = time::now() \
             WHERE tenant_id = $tenant_id",
        );

        self.db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("ids", id_strs))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        self.get_by_id(tenant_id, id).await
    }

    async fn grants_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        group_ids: Vec<Uuid>,
        valid_only: bool,
    ) -> WardenResult<Vec<Grant>> {
        let group_id_strs: Vec<String> = group_ids.iter().map(|g| g.to_string()).collect();

        let validity = if valid_only {
            " AND is_active = true \
             AND date_start <= time::now() AND date_expired > time::now()"
        } else {
            ""
        };
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM grant \
             WHERE tenant_id = $tenant_id \
             AND (user_ids CONTAINS $user_id \
             OR group_ids CONTAINSANY $group_ids){validity}",
        );

        let mut result = self
            .db
            .query(query)
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("group_ids", group_id_strs))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| row.try_into_grant())
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn grants_covering(
        &self,
        tenant_id: Uuid,
        node_ids: Vec<Uuid>,
        asset_ids: Vec<Uuid>,
    ) -> WardenResult<Vec<Grant>> {
        if node_ids.is_empty() && asset_ids.is_empty() {
            return Ok(Vec::new());
        }
        let node_id_strs: Vec<String> = node_ids.iter().map(|n| n.to_string()).collect();
        let asset_id_strs: Vec<String> = asset_ids.iter().map(|a| a.to_string()).collect();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM grant \
                 WHERE tenant_id = $tenant_id \
                 AND (node_ids CONTAINSANY $node_ids \
                 OR asset_ids CONTAINSANY $asset_ids)",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("node_ids", node_id_strs))
            .bind(("asset_ids", asset_id_strs))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| row.try_into_grant())
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn grants_expiring_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> WardenResult<Vec<Grant>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM grant \
                 WHERE date_expired > $from AND date_expired <= $to",
            )
            .bind(("from", from))
            .bind(("to", to))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| row.try_into_grant())
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }
}
