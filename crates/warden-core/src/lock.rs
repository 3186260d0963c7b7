//! Mutual-exclusion abstraction for aggregate updates.
//!
//! All `assets_amount` mutations within one tenant are serialized behind a
//! named lock, because ancestor chains of concurrent relation changes can
//! overlap unpredictably. The trait is backend-agnostic: `warden-engine`
//! ships an in-process implementation; a multi-node deployment can provide
//! one over its coordination store.

use std::time::Duration;

use crate::error::WardenResult;

/// An owner token identifies the logical holder of a lock. Re-acquiring a
/// held lock with the same owner must succeed (reentrancy), so nested
/// maintenance calls inside one transaction do not deadlock.
pub type OwnerToken = String;

pub trait MutexProvider: Send + Sync {
    /// Acquire `name` for `owner`, waiting at most `wait`. The lock expires
    /// on its own after `ttl` if never released (crash safety).
    ///
    /// Errors with [`WardenError::LockUnavailable`] once `wait` elapses;
    /// callers should treat that as retryable, never block indefinitely.
    ///
    /// [`WardenError::LockUnavailable`]: crate::error::WardenError::LockUnavailable
    fn acquire(
        &self,
        name: &str,
        owner: &OwnerToken,
        ttl: Duration,
        wait: Duration,
    ) -> impl Future<Output = WardenResult<()>> + Send;

    /// Release one hold of `name` by `owner`. The lock frees once release
    /// count matches acquire count.
    fn release(&self, name: &str, owner: &OwnerToken) -> impl Future<Output = WardenResult<()>> + Send;
}

/// Lock name guarding a tenant's node tree aggregates.
pub fn tenant_tree_lock_name(tenant_id: uuid::Uuid) -> String {
    format!("node_tree:{tenant_id}")
}
