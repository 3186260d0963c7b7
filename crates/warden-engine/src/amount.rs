//! Incremental maintenance of `Node.assets_amount`.
//!
//! Every asset↔node relation change updates the materialized per-node
//! subtree counts without rescanning subtrees: the cost is O(depth ×
//! branching) existence checks. All mutations within one tenant run
//! under the tenant tree lock, because ancestor chains of concurrent
//! changes can overlap unpredictably. The relation rows and the count
//! deltas commit in one transaction; a partial aggregate update would
//! silently desynchronize counts with no self-healing path.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::events::{ChangeKind, DomainEvent};
use warden_core::key;
use warden_core::lock::{MutexProvider, OwnerToken, tenant_tree_lock_name};
use warden_core::repository::{AssetRepository, NodeRepository, RelationWrite};

use crate::invalidate::EventBus;
use crate::snapshot::SnapshotBuilder;

const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(10);

/// Applies relation changes and keeps the per-node aggregates in step.
pub struct AmountMaintainer<N, A, M> {
    nodes: N,
    assets: A,
    lock: M,
    bus: Option<EventBus>,
    lock_ttl: Duration,
    lock_wait: Duration,
}

impl<N, A, M> AmountMaintainer<N, A, M>
where
    N: NodeRepository + Clone,
    A: AssetRepository + Clone,
    M: MutexProvider,
{
    pub fn new(nodes: N, assets: A, lock: M) -> Self {
        Self {
            nodes,
            assets,
            lock,
            bus: None,
            lock_ttl: DEFAULT_LOCK_TTL,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Publish a domain event after each committed change.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_lock_bounds(mut self, ttl: Duration, wait: Duration) -> Self {
        self.lock_ttl = ttl;
        self.lock_wait = wait;
        self
    }

    /// One asset gained or lost relations to many nodes.
    ///
    /// For each changed node key, climb its ancestor chain (itself
    /// included). At each step, if the asset is already reachable via a
    /// different path into that subtree the branch stops: that node and
    /// everything above it is already correctly counted. Otherwise the
    /// node joins the ±1 batch. Pairs whose relation row already matches
    /// the requested state are dropped first, so replays are no-ops.
    pub async fn apply_asset_nodes_change(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        node_keys: Vec<String>,
        kind: ChangeKind,
    ) -> WardenResult<()> {
        if node_keys.is_empty() {
            return Ok(());
        }
        let owner = new_owner();
        let name = tenant_tree_lock_name(tenant_id);
        self.lock
            .acquire(&name, &owner, self.lock_ttl, self.lock_wait)
            .await?;
        let result = self
            .asset_nodes_change_locked(tenant_id, asset_id, node_keys, kind)
            .await;
        self.release_lock(&name, &owner).await;
        result
    }

    async fn asset_nodes_change_locked(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        node_keys: Vec<String>,
        kind: ChangeKind,
    ) -> WardenResult<()> {
        let changed = self.nodes.get_by_keys(tenant_id, node_keys).await?;
        let changed_ids: Vec<Uuid> = changed.iter().map(|n| n.id).collect();

        // Keep only pairs whose row state actually flips.
        let existing: HashSet<Uuid> = self
            .assets
            .existing_relations(tenant_id, vec![asset_id], changed_ids)
            .await?
            .into_iter()
            .map(|r| r.node_id)
            .collect();
        let effective: Vec<_> = changed
            .into_iter()
            .filter(|n| match kind {
                ChangeKind::Add => !existing.contains(&n.id),
                ChangeKind::Remove => existing.contains(&n.id),
            })
            .collect();
        if effective.is_empty() {
            debug!(tenant_id = %tenant_id, asset_id = %asset_id, "relation change already applied");
            return Ok(());
        }

        // The changed relations are excluded from every existence check,
        // so the answer is the same whether the rows are written before
        // or after this runs.
        let exclude: Vec<Uuid> = effective.iter().map(|n| n.id).collect();
        let mut to_update: HashSet<String> = HashSet::new();
        for node in &effective {
            for ancestor in key::ancestor_keys_of(&node.key, true) {
                if to_update.contains(&ancestor) {
                    // Another branch already walked through here.
                    break;
                }
                let present = self
                    .assets
                    .asset_exists_under(tenant_id, asset_id, &ancestor, exclude.clone())
                    .await?;
                if present {
                    // Already counted here and above; drop anything a
                    // previous branch queued along this chain.
                    for higher in key::ancestor_keys_of(&ancestor, true) {
                        to_update.remove(&higher);
                    }
                    break;
                }
                to_update.insert(ancestor);
            }
        }

        let delta = sign(kind);
        let deltas: Vec<(String, i64)> = to_update.into_iter().map(|k| (k, delta)).collect();
        let writes: Vec<RelationWrite> = effective
            .iter()
            .map(|n| RelationWrite {
                asset_id,
                node_id: n.id,
                node_key: n.key.clone(),
            })
            .collect();
        let node_ids: Vec<Uuid> = effective.iter().map(|n| n.id).collect();

        debug!(
            tenant_id = %tenant_id,
            asset_id = %asset_id,
            relations = writes.len(),
            updated_nodes = deltas.len(),
            ?kind,
            "applying asset-nodes change"
        );
        self.nodes
            .apply_relation_change(tenant_id, writes, kind, deltas)
            .await?;

        self.publish(DomainEvent::AssetNodesChanged {
            tenant_id,
            asset_id,
            node_ids,
            kind,
        });
        Ok(())
    }

    /// One node gained or lost relations to many assets.
    ///
    /// Climb the ancestor chain nearest-first with a shrinking working
    /// set: at each ancestor, assets already reachable elsewhere under
    /// that subtree drop out (they were counted before and stay counted),
    /// the remainder contributes ±|remaining| to the ancestor, and the
    /// climb stops as soon as the set empties.
    pub async fn apply_node_assets_change(
        &self,
        tenant_id: Uuid,
        node_key: &str,
        asset_ids: Vec<Uuid>,
        kind: ChangeKind,
    ) -> WardenResult<()> {
        if asset_ids.is_empty() {
            return Ok(());
        }
        let owner = new_owner();
        let name = tenant_tree_lock_name(tenant_id);
        self.lock
            .acquire(&name, &owner, self.lock_ttl, self.lock_wait)
            .await?;
        let result = self
            .node_assets_change_locked(tenant_id, node_key, asset_ids, kind)
            .await;
        self.release_lock(&name, &owner).await;
        result
    }

    async fn node_assets_change_locked(
        &self,
        tenant_id: Uuid,
        node_key: &str,
        asset_ids: Vec<Uuid>,
        kind: ChangeKind,
    ) -> WardenResult<()> {
        let node = self.nodes.get_by_key(tenant_id, node_key).await?;

        let existing: HashSet<Uuid> = self
            .assets
            .existing_relations(tenant_id, asset_ids.clone(), vec![node.id])
            .await?
            .into_iter()
            .map(|r| r.asset_id)
            .collect();
        let effective: Vec<Uuid> = asset_ids
            .into_iter()
            .filter(|a| match kind {
                ChangeKind::Add => !existing.contains(a),
                ChangeKind::Remove => existing.contains(a),
            })
            .collect();
        if effective.is_empty() {
            debug!(tenant_id = %tenant_id, node_key, "relation change already applied");
            return Ok(());
        }

        let delta = sign(kind);
        let mut working: HashSet<Uuid> = effective.iter().copied().collect();
        let mut deltas: Vec<(String, i64)> = Vec::new();
        for ancestor in key::ancestor_keys_of(&node.key, true) {
            let present = self
                .assets
                .assets_present_under(
                    tenant_id,
                    working.iter().copied().collect(),
                    &ancestor,
                    vec![node.id],
                )
                .await?;
            for id in present {
                working.remove(&id);
            }
            if working.is_empty() {
                // Everything left to count is already reachable here, and
                // therefore everywhere above.
                break;
            }
            deltas.push((ancestor, delta * working.len() as i64));
        }

        let writes: Vec<RelationWrite> = effective
            .iter()
            .map(|&asset_id| RelationWrite {
                asset_id,
                node_id: node.id,
                node_key: node.key.clone(),
            })
            .collect();

        debug!(
            tenant_id = %tenant_id,
            node_key = %node.key,
            relations = writes.len(),
            updated_nodes = deltas.len(),
            ?kind,
            "applying node-assets change"
        );
        self.nodes
            .apply_relation_change(tenant_id, writes, kind, deltas)
            .await?;

        self.publish(DomainEvent::NodeAssetsChanged {
            tenant_id,
            node_id: node.id,
            asset_ids: effective,
            kind,
        });
        Ok(())
    }

    /// Full repair pass: rebuild the snapshot, recompute every subtree
    /// count, and overwrite any stored value that drifted. Returns the
    /// number of nodes fixed. Intended as a background job.
    pub async fn recount_tenant(&self, tenant_id: Uuid) -> WardenResult<usize> {
        let owner = new_owner();
        let name = tenant_tree_lock_name(tenant_id);
        self.lock
            .acquire(&name, &owner, self.lock_ttl, self.lock_wait)
            .await?;
        let result = self.recount_tenant_locked(tenant_id).await;
        self.release_lock(&name, &owner).await;
        result
    }

    async fn recount_tenant_locked(&self, tenant_id: Uuid) -> WardenResult<usize> {
        let builder = SnapshotBuilder::new(self.nodes.clone(), self.assets.clone());
        let snapshot = builder.build(tenant_id).await?;
        let totals = snapshot.assets_amount_total();

        let mut fixes: Vec<(String, i64)> = Vec::new();
        for node in snapshot.iter() {
            let actual = totals.get(&node.key).copied().unwrap_or(0);
            if node.stored_assets_amount != actual {
                warn!(
                    tenant_id = %tenant_id,
                    node_key = %node.key,
                    stored = node.stored_assets_amount,
                    actual,
                    "assets_amount drift repaired"
                );
                fixes.push((node.key.clone(), actual));
            }
        }

        let fixed = fixes.len();
        self.nodes.set_assets_amounts(tenant_id, fixes).await?;
        if fixed > 0 {
            info!(tenant_id = %tenant_id, fixed, "tenant recount complete");
        }
        Ok(fixed)
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    async fn release_lock(&self, name: &str, owner: &OwnerToken) {
        if let Err(error) = self.lock.release(name, owner).await {
            warn!(lock = name, %error, "failed to release tenant tree lock");
        }
    }
}

fn sign(kind: ChangeKind) -> i64 {
    match kind {
        ChangeKind::Add => 1,
        ChangeKind::Remove => -1,
    }
}

// Owner tokens are fresh per operation: reentrancy only matters for
// nested calls sharing one token, which callers opt into by using the
// lock provider directly.
fn new_owner() -> OwnerToken {
    Uuid::new_v4().to_string()
}
