//! Grant (asset permission) domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::action::ActionSet;

/// Account alias granting every account on the covered assets.
pub const ACCOUNT_ALIAS_ALL: &str = "@ALL";

/// A time-bounded authorization linking grantees (users and groups) to
/// targets (nodes and assets) with an action set and an account list.
///
/// Validity is never a stored state machine: it is recomputed from the
/// current clock on every read (`is_valid`). No event fires at expiry,
/// which is why the engine runs a periodic expiry sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Unique per tenant.
    pub name: String,
    pub user_ids: Vec<Uuid>,
    pub group_ids: Vec<Uuid>,
    pub node_ids: Vec<Uuid>,
    pub asset_ids: Vec<Uuid>,
    /// Account usernames this grant covers; may contain [`ACCOUNT_ALIAS_ALL`].
    pub accounts: Vec<String>,
    pub actions: ActionSet,
    pub date_start: DateTime<Utc>,
    pub date_expired: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Grant {
    /// `is_active && date_start <= now < date_expired`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.date_start <= now && now < self.date_expired
    }

    /// Whether this grant covers the given account name.
    pub fn covers_account(&self, account: &str) -> bool {
        self.accounts
            .iter()
            .any(|a| a == account || a == ACCOUNT_ALIAS_ALL)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGrant {
    pub tenant_id: Uuid,
    pub name: String,
    pub user_ids: Vec<Uuid>,
    pub group_ids: Vec<Uuid>,
    pub node_ids: Vec<Uuid>,
    pub asset_ids: Vec<Uuid>,
    pub accounts: Vec<String>,
    pub actions: ActionSet,
    pub date_start: DateTime<Utc>,
    pub date_expired: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateGrant {
    pub name: Option<String>,
    pub accounts: Option<Vec<String>>,
    pub actions: Option<ActionSet>,
    pub date_start: Option<DateTime<Utc>>,
    pub date_expired: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(start_offset: i64, end_offset: i64, active: bool) -> Grant {
        let now = Utc::now();
        Grant {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "g".into(),
            user_ids: vec![],
            group_ids: vec![],
            node_ids: vec![],
            asset_ids: vec![],
            accounts: vec![],
            actions: ActionSet::CONNECT,
            date_start: now + Duration::hours(start_offset),
            date_expired: now + Duration::hours(end_offset),
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn validity_is_recomputed_from_clock() {
        let now = Utc::now();
        assert!(grant(-1, 1, true).is_valid(now));
        assert!(!grant(-1, 1, false).is_valid(now));
        assert!(!grant(1, 2, true).is_valid(now), "not yet started");
        assert!(!grant(-2, -1, true).is_valid(now), "already expired");
    }

    #[test]
    fn all_alias_covers_any_account() {
        let mut g = grant(-1, 1, true);
        g.accounts = vec![ACCOUNT_ALIAS_ALL.to_string()];
        assert!(g.covers_account("root"));
        g.accounts = vec!["deploy".to_string()];
        assert!(g.covers_account("deploy"));
        assert!(!g.covers_account("root"));
    }
}
