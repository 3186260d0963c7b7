//! Permission resolution: grants in, per-user authorized view out.
//!
//! Resolution walks from the user's applicable grants (direct plus via
//! group membership) to the node and asset targets, expands granted
//! nodes over the tenant snapshot, and classifies every touched node
//! for tree presentation. The result is cached per `(tenant, user)` and
//! invalidated by domain events, never recomputed on the write path.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::key;
use warden_core::models::grant::Grant;
use warden_core::repository::{
    AssetRepository, GrantRepository, GroupRepository, NodeRepository,
};

use crate::snapshot::{Snapshot, SnapshotBuilder};

/// Why a node appears in a user's authorized tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFrom {
    /// Directly granted; its whole subtree is authorized. Granted nodes
    /// below another granted node are folded into the ancestor.
    Granted,
    /// Not granted itself, but it directly holds assets the user was
    /// granted individually.
    Asset,
    /// Neither; kept only because it sits on the path to a node that is.
    Child,
}

/// One node of the authorized tree.
#[derive(Debug, Clone)]
pub struct PermTreeNode {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub node_from: NodeFrom,
    /// Asset count within this user's view, not the tenant-wide count.
    pub assets_amount: i64,
}

/// A fully resolved authorization view for one user in one tenant.
#[derive(Debug, Clone)]
pub struct ResolvedView {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    /// Every asset the user can reach, via nodes or directly.
    pub asset_ids: HashSet<Uuid>,
    /// Direct asset grants not already covered by a granted node.
    pub only_direct_asset_ids: HashSet<Uuid>,
    /// Classified nodes, parents before children.
    pub nodes: Vec<PermTreeNode>,
    pub resolved_at: DateTime<Utc>,
}

/// Resolves users' grants into [`ResolvedView`]s.
pub struct PermResolver<G, Gr, N, A> {
    grants: G,
    groups: Gr,
    nodes: N,
    assets: A,
}

impl<G, Gr, N, A> PermResolver<G, Gr, N, A>
where
    G: GrantRepository,
    Gr: GroupRepository,
    N: NodeRepository + Clone,
    A: AssetRepository + Clone,
{
    pub fn new(grants: G, groups: Gr, nodes: N, assets: A) -> Self {
        Self {
            grants,
            groups,
            nodes,
            assets,
        }
    }

    /// Applicable grants for the user, direct or via any of their groups.
    pub async fn grants_for(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        valid_only: bool,
    ) -> WardenResult<Vec<Grant>> {
        let group_ids = self.groups.get_user_group_ids(tenant_id, user_id).await?;
        self.grants
            .grants_for_user(tenant_id, user_id, group_ids, valid_only)
            .await
    }

    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        valid_only: bool,
    ) -> WardenResult<ResolvedView> {
        let grants = self.grants_for(tenant_id, user_id, valid_only).await?;

        let mut direct_node_ids: HashSet<Uuid> = HashSet::new();
        let mut direct_asset_ids: HashSet<Uuid> = HashSet::new();
        for grant in &grants {
            direct_node_ids.extend(&grant.node_ids);
            direct_asset_ids.extend(&grant.asset_ids);
        }

        let builder = SnapshotBuilder::new(self.nodes.clone(), self.assets.clone());
        let snapshot = builder.build(tenant_id).await?;

        // Granted nodes under another granted node are subsumed by the
        // ancestor's subtree; only the topmost keys survive.
        let granted_keys: Vec<String> = direct_node_ids
            .iter()
            .filter_map(|id| snapshot.node_by_id(*id))
            .map(|n| n.key.clone())
            .collect();
        let granted_keys = key::clean_children_keys(granted_keys);

        let mut node_covered_assets: HashSet<Uuid> = HashSet::new();
        for granted in &granted_keys {
            node_covered_assets.extend(snapshot.subtree_asset_ids(granted));
        }
        let only_direct_asset_ids: HashSet<Uuid> = direct_asset_ids
            .difference(&node_covered_assets)
            .copied()
            .collect();
        let mut asset_ids = node_covered_assets;
        asset_ids.extend(&direct_asset_ids);

        let nodes = classify(&snapshot, &granted_keys, &only_direct_asset_ids);

        debug!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            grants = grants.len(),
            assets = asset_ids.len(),
            nodes = nodes.len(),
            "resolved authorization view"
        );
        Ok(ResolvedView {
            tenant_id,
            user_id,
            asset_ids,
            only_direct_asset_ids,
            nodes,
            resolved_at: Utc::now(),
        })
    }
}

/// Classify every touched node and compute its in-view asset count.
fn classify(
    snapshot: &Snapshot,
    granted_keys: &[String],
    only_direct_asset_ids: &HashSet<Uuid>,
) -> Vec<PermTreeNode> {
    let mut view: HashMap<String, (NodeFrom, i64)> = HashMap::new();

    for granted in granted_keys {
        if let Some(node) = snapshot.node(granted) {
            let amount = snapshot.subtree_asset_ids(&node.key).len() as i64;
            view.insert(node.key.clone(), (NodeFrom::Granted, amount));
        }
    }

    // Nodes directly holding individually granted assets, unless already
    // inside a granted subtree.
    for node in snapshot.iter() {
        if view.contains_key(&node.key) {
            continue;
        }
        if granted_keys
            .iter()
            .any(|g| key::is_descendant(&node.key, g))
        {
            continue;
        }
        let held = node
            .direct_asset_ids
            .intersection(only_direct_asset_ids)
            .count() as i64;
        if held > 0 {
            view.insert(node.key.clone(), (NodeFrom::Asset, held));
        }
    }

    // Ancestors that only exist to connect the tree.
    let anchored: Vec<String> = view.keys().cloned().collect();
    for node_key in &anchored {
        for ancestor in key::ancestor_keys_of(node_key, false) {
            if !view.contains_key(&ancestor) && snapshot.contains_key(&ancestor) {
                view.insert(ancestor, (NodeFrom::Child, 0));
            }
        }
    }

    // Bridge amounts roll up from their in-view children, deepest first.
    let mut bridge_keys: Vec<String> = view
        .iter()
        .filter(|(_, (from, _))| *from == NodeFrom::Child)
        .map(|(k, _)| k.clone())
        .collect();
    bridge_keys.sort_by_key(|k| std::cmp::Reverse(key::depth_of(k)));
    for bridge in bridge_keys {
        let sum: i64 = snapshot
            .children_of(&bridge)
            .iter()
            .filter_map(|child| view.get(&child.key))
            .map(|(_, amount)| amount)
            .sum();
        if let Some(entry) = view.get_mut(&bridge) {
            entry.1 = sum;
        }
    }

    let mut keys: Vec<String> = view.keys().cloned().collect();
    key::sort_for_load(&mut keys);
    keys.into_iter()
        .filter_map(|k| {
            let (node_from, amount) = view[&k];
            snapshot.node(&k).map(|n| PermTreeNode {
                id: n.id,
                key: n.key.clone(),
                value: n.value.clone(),
                node_from,
                assets_amount: amount,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_core::models::node::Node;

    fn snapshot_with(keys: &[&str]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for k in keys {
            snapshot
                .insert_node(&Node {
                    id: Uuid::new_v4(),
                    tenant_id: Uuid::new_v4(),
                    key: (*k).into(),
                    value: (*k).into(),
                    assets_amount: 0,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .unwrap();
        }
        snapshot
    }

    #[test]
    fn granted_descendants_fold_into_ancestor() {
        let snapshot = snapshot_with(&["1", "1:1", "1:1:1"]);
        let granted = key::clean_children_keys(vec!["1:1".to_string(), "1:1:1".to_string()]);
        let nodes = classify(&snapshot, &granted, &HashSet::new());

        let by_key: HashMap<_, _> = nodes.iter().map(|n| (n.key.as_str(), n)).collect();
        assert_eq!(by_key["1:1"].node_from, NodeFrom::Granted);
        assert!(!by_key.contains_key("1:1:1"));
        assert_eq!(by_key["1"].node_from, NodeFrom::Child);
    }

    #[test]
    fn asset_nodes_and_bridges() {
        let mut snapshot = snapshot_with(&["1", "1:1", "1:1:1", "1:2"]);
        let direct = Uuid::new_v4();
        snapshot.attach_asset("1:1:1", direct);

        let nodes = classify(&snapshot, &[], &HashSet::from([direct]));
        let by_key: HashMap<_, _> = nodes.iter().map(|n| (n.key.as_str(), n)).collect();

        assert_eq!(by_key["1:1:1"].node_from, NodeFrom::Asset);
        assert_eq!(by_key["1:1:1"].assets_amount, 1);
        assert_eq!(by_key["1:1"].node_from, NodeFrom::Child);
        assert_eq!(by_key["1:1"].assets_amount, 1);
        assert_eq!(by_key["1"].assets_amount, 1);
        assert!(!by_key.contains_key("1:2"), "untouched branch stays out");
    }

    #[test]
    fn direct_asset_under_granted_node_is_not_an_asset_node() {
        let mut snapshot = snapshot_with(&["1", "1:1", "1:1:1"]);
        let asset = Uuid::new_v4();
        snapshot.attach_asset("1:1:1", asset);

        // The asset sits below a granted node, so no Asset entry appears;
        // the caller is expected to have subtracted it from the direct set.
        let nodes = classify(&snapshot, &["1:1".to_string()], &HashSet::new());
        let by_key: HashMap<_, _> = nodes.iter().map(|n| (n.key.as_str(), n)).collect();
        assert_eq!(by_key["1:1"].node_from, NodeFrom::Granted);
        assert_eq!(by_key["1:1"].assets_amount, 1);
        assert!(!by_key.contains_key("1:1:1"));
    }

    #[test]
    fn parents_precede_children_in_output() {
        let mut snapshot = snapshot_with(&["1", "1:2", "1:2:1", "1:10"]);
        let direct = Uuid::new_v4();
        snapshot.attach_asset("1:2:1", direct);
        snapshot.attach_asset("1:10", direct);

        let nodes = classify(&snapshot, &[], &HashSet::from([direct]));
        let keys: Vec<&str> = nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "1:2", "1:2:1", "1:10"]);
    }
}
