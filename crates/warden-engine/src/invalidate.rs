//! Event-driven invalidation of cached authorization views.
//!
//! Writers publish [`DomainEvent`]s onto the [`EventBus`]; the
//! [`InvalidationController`] maps each event to the set of affected
//! users and marks their cached views stale. Nothing is recomputed on
//! the write path. Time-based grant expiry fires no event at all, so
//! the [`ExpirySweeper`] periodically scans for grants whose expiry
//! fell inside the window since its last pass.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_core::error::{WardenError, WardenResult};
use warden_core::events::{DomainEvent, GrantField};
use warden_core::key;
use warden_core::models::grant::Grant;
use warden_core::repository::{GrantRepository, GroupRepository, NodeRepository};

use crate::resolve::ResolvedView;

enum BusMessage {
    Event(DomainEvent),
    Shutdown,
}

/// Sender half of the engine's event channel. Cheap to clone; injected
/// into every component that mutates authorization-relevant state.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// Receiver half, consumed by [`InvalidationController::start`].
pub struct BusReceiver {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl EventBus {
    pub fn channel() -> (EventBus, BusReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventBus { tx }, BusReceiver { rx })
    }

    /// Publish an event. A closed channel (controller already shut down)
    /// is logged, not surfaced: the store mutation has already committed
    /// and must not be failed retroactively.
    pub fn publish(&self, event: DomainEvent) {
        if self.tx.send(BusMessage::Event(event)).is_err() {
            warn!("event bus closed, invalidation event dropped");
        }
    }

    /// Ask the controller loop to stop after draining queued events.
    pub fn shutdown(&self) {
        let _ = self.tx.send(BusMessage::Shutdown);
    }
}

/// Cache of resolved views keyed by `(tenant, user)`.
///
/// Entries never expire on their own; staleness is purely event-driven.
pub trait ViewCache: Send + Sync {
    fn get(&self, tenant_id: Uuid, user_id: Uuid) -> Option<Arc<ResolvedView>>;
    fn put(&self, view: Arc<ResolvedView>);
    fn invalidate_user(&self, tenant_id: Uuid, user_id: Uuid);
    fn invalidate_users(&self, tenant_id: Uuid, user_ids: &[Uuid]);
    fn invalidate_tenant(&self, tenant_id: Uuid);
}

/// In-process [`ViewCache`] over a `RwLock`ed map.
#[derive(Default)]
pub struct MemoryViewCache {
    views: RwLock<HashMap<(Uuid, Uuid), Arc<ResolvedView>>>,
}

impl MemoryViewCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewCache for MemoryViewCache {
    fn get(&self, tenant_id: Uuid, user_id: Uuid) -> Option<Arc<ResolvedView>> {
        self.views
            .read()
            .ok()
            .and_then(|views| views.get(&(tenant_id, user_id)).cloned())
    }

    fn put(&self, view: Arc<ResolvedView>) {
        if let Ok(mut views) = self.views.write() {
            views.insert((view.tenant_id, view.user_id), view);
        }
    }

    fn invalidate_user(&self, tenant_id: Uuid, user_id: Uuid) {
        if let Ok(mut views) = self.views.write() {
            views.remove(&(tenant_id, user_id));
        }
    }

    fn invalidate_users(&self, tenant_id: Uuid, user_ids: &[Uuid]) {
        if let Ok(mut views) = self.views.write() {
            for user_id in user_ids {
                views.remove(&(tenant_id, *user_id));
            }
        }
    }

    fn invalidate_tenant(&self, tenant_id: Uuid) {
        if let Ok(mut views) = self.views.write() {
            views.retain(|(t, _), _| *t != tenant_id);
        }
    }
}

/// Maps domain events to the users whose cached views they stale.
pub struct InvalidationController<G, Gr, N, C> {
    grants: G,
    groups: Gr,
    nodes: N,
    cache: Arc<C>,
}

impl<G, Gr, N, C> InvalidationController<G, Gr, N, C>
where
    G: GrantRepository + 'static,
    Gr: GroupRepository + 'static,
    N: NodeRepository + 'static,
    C: ViewCache + 'static,
{
    pub fn new(grants: G, groups: Gr, nodes: N, cache: Arc<C>) -> Self {
        Self {
            grants,
            groups,
            nodes,
            cache,
        }
    }

    /// Consume the bus until shutdown. Handler errors are logged and the
    /// affected tenant is invalidated wholesale as a fallback.
    pub fn start(self: Arc<Self>, mut receiver: BusReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("invalidation controller started");
            while let Some(message) = receiver.rx.recv().await {
                match message {
                    BusMessage::Event(event) => {
                        let tenant_id = event.tenant_id();
                        if let Err(error) = self.handle(event).await {
                            warn!(%tenant_id, %error, "invalidation failed, flushing tenant");
                            self.cache.invalidate_tenant(tenant_id);
                        }
                    }
                    BusMessage::Shutdown => break,
                }
            }
            info!("invalidation controller stopped");
        })
    }

    pub async fn handle(&self, event: DomainEvent) -> WardenResult<()> {
        match event {
            DomainEvent::AssetNodesChanged {
                tenant_id,
                asset_id,
                node_ids,
                ..
            } => {
                self.invalidate_by_targets(tenant_id, node_ids, vec![asset_id])
                    .await
            }
            DomainEvent::NodeAssetsChanged {
                tenant_id,
                node_id,
                asset_ids,
                ..
            } => {
                self.invalidate_by_targets(tenant_id, vec![node_id], asset_ids)
                    .await
            }
            DomainEvent::GrantChanged {
                tenant_id,
                grant_id,
                ..
            } => self.invalidate_grant_users(tenant_id, grant_id, &[]).await,
            DomainEvent::GrantMembersChanged {
                tenant_id,
                grant_id,
                field,
                ids,
                ..
            } => {
                // Changed grantee ids are affected even after removal.
                let extra = match field {
                    GrantField::Users => ids,
                    GrantField::Groups => self.groups.get_member_ids(tenant_id, ids).await?,
                    GrantField::Nodes | GrantField::Assets => Vec::new(),
                };
                self.invalidate_grant_users(tenant_id, grant_id, &extra)
                    .await
            }
            DomainEvent::UserGroupsChanged {
                tenant_id, user_id, ..
            } => {
                self.cache.invalidate_user(tenant_id, user_id);
                Ok(())
            }
        }
    }

    /// Relation changes affect grants on the changed nodes, their
    /// ancestors (subtree contents shifted beneath them), and the assets
    /// themselves.
    async fn invalidate_by_targets(
        &self,
        tenant_id: Uuid,
        node_ids: Vec<Uuid>,
        asset_ids: Vec<Uuid>,
    ) -> WardenResult<()> {
        let mut ancestor_keys: HashSet<String> = HashSet::new();
        let mut all_node_ids: Vec<Uuid> = node_ids.clone();
        for node_id in node_ids {
            let node = self.nodes.get_by_id(tenant_id, node_id).await?;
            ancestor_keys.extend(key::ancestor_keys_of(&node.key, false));
        }
        let ancestors = self
            .nodes
            .get_by_keys(tenant_id, ancestor_keys.into_iter().collect())
            .await?;
        all_node_ids.extend(ancestors.iter().map(|n| n.id));

        let grants = self
            .grants
            .grants_covering(tenant_id, all_node_ids, asset_ids)
            .await?;
        let mut users: HashSet<Uuid> = HashSet::new();
        for grant in &grants {
            users.extend(self.grant_users(grant).await?);
        }
        debug!(
            %tenant_id,
            grants = grants.len(),
            users = users.len(),
            "relation change invalidation"
        );
        self.cache
            .invalidate_users(tenant_id, &users.into_iter().collect::<Vec<_>>());
        Ok(())
    }

    async fn invalidate_grant_users(
        &self,
        tenant_id: Uuid,
        grant_id: Uuid,
        extra_users: &[Uuid],
    ) -> WardenResult<()> {
        let mut users: HashSet<Uuid> = extra_users.iter().copied().collect();
        match self.grants.get_by_id(tenant_id, grant_id).await {
            Ok(grant) => {
                users.extend(self.grant_users(&grant).await?);
            }
            Err(WardenError::NotFound { .. }) => {
                // Deleted grant: its grantees are unknown now, flush the
                // whole tenant.
                self.cache.invalidate_tenant(tenant_id);
                return Ok(());
            }
            Err(other) => return Err(other),
        }
        self.cache
            .invalidate_users(tenant_id, &users.into_iter().collect::<Vec<_>>());
        Ok(())
    }

    async fn grant_users(&self, grant: &Grant) -> WardenResult<Vec<Uuid>> {
        let mut users = grant.user_ids.clone();
        users.extend(
            self.groups
                .get_member_ids(grant.tenant_id, grant.group_ids.clone())
                .await?,
        );
        Ok(users)
    }
}

/// Periodic sweep for time-based grant expiry.
pub struct ExpirySweeper<G, Gr, C> {
    grants: G,
    groups: Gr,
    cache: Arc<C>,
}

impl<G, Gr, C> ExpirySweeper<G, Gr, C>
where
    G: GrantRepository + 'static,
    Gr: GroupRepository + 'static,
    C: ViewCache + 'static,
{
    pub fn new(grants: G, groups: Gr, cache: Arc<C>) -> Self {
        Self {
            grants,
            groups,
            cache,
        }
    }

    /// Invalidate the users of every grant whose `date_expired` fell in
    /// `(from, to]`. Returns the number of grants processed.
    pub async fn sweep(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> WardenResult<usize> {
        let expired = self.grants.grants_expiring_between(from, to).await?;
        let count = expired.len();
        for grant in expired {
            let mut users = grant.user_ids.clone();
            users.extend(
                self.groups
                    .get_member_ids(grant.tenant_id, grant.group_ids.clone())
                    .await?,
            );
            debug!(
                tenant_id = %grant.tenant_id,
                grant = %grant.name,
                users = users.len(),
                "grant expired, invalidating users"
            );
            self.cache.invalidate_users(grant.tenant_id, &users);
        }
        Ok(count)
    }

    /// Sweep on a fixed interval until the task is aborted.
    pub fn run(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "expiry sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // completes immediately
            let mut last = Utc::now();
            loop {
                ticker.tick().await;
                let now = Utc::now();
                match self.sweep(last, now).await {
                    Ok(count) if count > 0 => {
                        info!(expired = count, "expiry sweep complete");
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "expiry sweep failed"),
                }
                last = now;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as Set;

    fn view(tenant: Uuid, user: Uuid) -> Arc<ResolvedView> {
        Arc::new(ResolvedView {
            tenant_id: tenant,
            user_id: user,
            asset_ids: Set::new(),
            only_direct_asset_ids: Set::new(),
            nodes: Vec::new(),
            resolved_at: Utc::now(),
        })
    }

    #[test]
    fn memory_cache_round_trip_and_invalidation() {
        let cache = MemoryViewCache::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let user_1 = Uuid::new_v4();
        let user_2 = Uuid::new_v4();

        cache.put(view(tenant_a, user_1));
        cache.put(view(tenant_a, user_2));
        cache.put(view(tenant_b, user_1));

        assert!(cache.get(tenant_a, user_1).is_some());

        cache.invalidate_user(tenant_a, user_1);
        assert!(cache.get(tenant_a, user_1).is_none());
        assert!(cache.get(tenant_a, user_2).is_some());

        cache.invalidate_tenant(tenant_a);
        assert!(cache.get(tenant_a, user_2).is_none());
        assert!(cache.get(tenant_b, user_1).is_some(), "other tenant untouched");
    }

    #[test]
    fn invalidate_users_is_batch() {
        let cache = MemoryViewCache::new();
        let tenant = Uuid::new_v4();
        let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for u in &users {
            cache.put(view(tenant, *u));
        }
        cache.invalidate_users(tenant, &users[..2]);
        assert!(cache.get(tenant, users[0]).is_none());
        assert!(cache.get(tenant, users[1]).is_none());
        assert!(cache.get(tenant, users[2]).is_some());
    }
}
