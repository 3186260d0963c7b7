//! SurrealDB repository implementations.

mod asset;
mod grant;
mod group;
mod node;
mod tenant;
mod user;

pub use asset::SurrealAssetRepository;
pub use grant::SurrealGrantRepository;
pub use group::SurrealGroupRepository;
pub use node::SurrealNodeRepository;
pub use tenant::SurrealTenantRepository;
pub use user::SurrealUserRepository;

use uuid::Uuid;

use crate::error::DbError;

/// Parse a UUID stored as a string column.
fn parse_uuid(value: &str, what: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::Migration(format!("invalid {what} UUID: {e}")))
}

fn parse_uuid_list(values: Vec<String>, what: &str) -> Result<Vec<Uuid>, DbError> {
    values.iter().map(|v| parse_uuid(v, what)).collect()
}
