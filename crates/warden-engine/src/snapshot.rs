//! Graph snapshots of a tenant's node forest.
//!
//! A [`Snapshot`] is an arena of nodes with parent/child index links and
//! per-node direct asset-id sets. Both the aggregate algorithm (full
//! recounts) and the resolution engine (descendant expansion) read from
//! it. Snapshots are read-mostly after construction; rebuilding is the
//! only way to refresh one. Cost is O(nodes + relations), so for very
//! large tenants builds belong in background jobs, not request handlers.

use std::collections::{HashMap, HashSet};

use tracing::warn;
use uuid::Uuid;
use warden_core::error::{WardenError, WardenResult};
use warden_core::key;
use warden_core::models::node::Node;
use warden_core::repository::{AssetRepository, NodeRepository};

/// One node in the arena.
#[derive(Debug)]
pub struct SnapshotNode {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    /// The materialized aggregate as stored, not recomputed.
    pub stored_assets_amount: i64,
    /// Assets attached directly to this node.
    pub direct_asset_ids: HashSet<Uuid>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// A complete forest for one tenant.
#[derive(Debug, Default)]
pub struct Snapshot {
    nodes: Vec<SnapshotNode>,
    by_key: HashMap<String, usize>,
    by_id: HashMap<Uuid, usize>,
    roots: Vec<usize>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. The parent must already be present: callers load
    /// nodes sorted so parents precede children, and a missing parent
    /// means that order was violated.
    pub fn insert_node(&mut self, node: &Node) -> WardenResult<()> {
        let parent = match key::parent_key_of(&node.key) {
            Some(parent_key) => Some(*self.by_key.get(parent_key).ok_or_else(|| {
                WardenError::ParentNotFound {
                    key: node.key.clone(),
                }
            })?),
            None => None,
        };

        let idx = self.nodes.len();
        self.nodes.push(SnapshotNode {
            id: node.id,
            key: node.key.clone(),
            value: node.value.clone(),
            stored_assets_amount: node.assets_amount,
            direct_asset_ids: HashSet::new(),
            parent,
            children: Vec::new(),
        });
        self.by_key.insert(node.key.clone(), idx);
        self.by_id.insert(node.id, idx);
        match parent {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }
        Ok(())
    }

    /// Attach an asset to a node by key. Returns false if the key is not
    /// in the snapshot.
    pub fn attach_asset(&mut self, node_key: &str, asset_id: Uuid) -> bool {
        match self.by_key.get(node_key) {
            Some(&idx) => {
                self.nodes[idx].direct_asset_ids.insert(asset_id);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_key(&self, node_key: &str) -> bool {
        self.by_key.contains_key(node_key)
    }

    pub fn node(&self, node_key: &str) -> Option<&SnapshotNode> {
        self.by_key.get(node_key).map(|&idx| &self.nodes[idx])
    }

    pub fn node_by_id(&self, id: Uuid) -> Option<&SnapshotNode> {
        self.by_id.get(&id).map(|&idx| &self.nodes[idx])
    }

    pub fn roots(&self) -> impl Iterator<Item = &SnapshotNode> {
        self.roots.iter().map(|&idx| &self.nodes[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotNode> {
        self.nodes.iter()
    }

    /// Direct children of a node.
    pub fn children_of(&self, node_key: &str) -> Vec<&SnapshotNode> {
        match self.by_key.get(node_key) {
            Some(&idx) => self.nodes[idx]
                .children
                .iter()
                .map(|&c| &self.nodes[c])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Keys of every node strictly below `node_key`.
    pub fn descendant_keys(&self, node_key: &str) -> Vec<String> {
        let Some(&start) = self.by_key.get(node_key) else {
            return Vec::new();
        };
        let mut keys = Vec::new();
        let mut stack: Vec<usize> = self.nodes[start].children.clone();
        while let Some(idx) = stack.pop() {
            keys.push(self.nodes[idx].key.clone());
            stack.extend(&self.nodes[idx].children);
        }
        keys
    }

    /// Distinct assets attached anywhere in the subtree rooted at
    /// `node_key`, the node itself included.
    pub fn subtree_asset_ids(&self, node_key: &str) -> HashSet<Uuid> {
        let Some(&start) = self.by_key.get(node_key) else {
            return HashSet::new();
        };
        let mut assets = HashSet::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            assets.extend(&self.nodes[idx].direct_asset_ids);
            stack.extend(&self.nodes[idx].children);
        }
        assets
    }

    /// Recompute the true `assets_amount` for every node: the count of
    /// distinct assets in each subtree, built leaf-first so each subtree
    /// set is the union of its children's sets plus its direct assets.
    pub fn assets_amount_total(&self) -> HashMap<String, i64> {
        // Post-order over the forest without recursion.
        let mut order: Vec<usize> = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.clone();
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(&self.nodes[idx].children);
        }

        let mut subtree_sets: Vec<Option<HashSet<Uuid>>> = vec![None; self.nodes.len()];
        let mut totals = HashMap::with_capacity(self.nodes.len());
        for &idx in order.iter().rev() {
            let node = &self.nodes[idx];
            let mut set: HashSet<Uuid> = node.direct_asset_ids.clone();
            for &child in &node.children {
                if let Some(child_set) = subtree_sets[child].take() {
                    set.extend(child_set);
                }
            }
            totals.insert(node.key.clone(), set.len() as i64);
            subtree_sets[idx] = Some(set);
        }
        totals
    }
}

/// Builds a [`Snapshot`] from the repositories.
pub struct SnapshotBuilder<N, A> {
    nodes: N,
    assets: A,
}

impl<N: NodeRepository, A: AssetRepository> SnapshotBuilder<N, A> {
    pub fn new(nodes: N, assets: A) -> Self {
        Self { nodes, assets }
    }

    pub async fn build(&self, tenant_id: Uuid) -> WardenResult<Snapshot> {
        let mut nodes = self.nodes.list_by_tenant(tenant_id).await?;
        nodes.sort_by_cached_key(|n| {
            n.key
                .split(':')
                .map(|seg| seg.parse::<u64>().unwrap_or(u64::MAX))
                .collect::<Vec<_>>()
        });

        let mut snapshot = Snapshot::new();
        for node in &nodes {
            snapshot.insert_node(node)?;
        }

        for relation in self.assets.list_relations(tenant_id).await? {
            if !snapshot.attach_asset(&relation.node_key, relation.asset_id) {
                // Relation rows denormalize the node key; a miss means the
                // relation outlived its node.
                warn!(
                    tenant_id = %tenant_id,
                    node_key = %relation.node_key,
                    asset_id = %relation.asset_id,
                    "dangling asset relation skipped in snapshot"
                );
            }
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(key: &str) -> Node {
        Node {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            key: key.into(),
            value: key.into(),
            assets_amount: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn build(keys: &[&str]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for key in keys {
            snapshot.insert_node(&node(key)).unwrap();
        }
        snapshot
    }

    #[test]
    fn orphan_insert_is_rejected() {
        let mut snapshot = Snapshot::new();
        snapshot.insert_node(&node("1")).unwrap();
        let err = snapshot.insert_node(&node("1:2:3")).unwrap_err();
        assert!(matches!(err, WardenError::ParentNotFound { key } if key == "1:2:3"));
    }

    #[test]
    fn descendant_keys_cover_whole_subtree() {
        let snapshot = build(&["1", "1:1", "1:2", "1:1:1", "1:1:2"]);
        let mut keys = snapshot.descendant_keys("1:1");
        keys.sort();
        assert_eq!(keys, vec!["1:1:1", "1:1:2"]);
        assert_eq!(snapshot.descendant_keys("1").len(), 4);
        assert!(snapshot.descendant_keys("1:2").is_empty());
    }

    #[test]
    fn subtree_assets_are_distinct() {
        let mut snapshot = build(&["1", "1:1", "1:1:1"]);
        let shared = Uuid::new_v4();
        let leaf_only = Uuid::new_v4();
        snapshot.attach_asset("1:1", shared);
        snapshot.attach_asset("1:1:1", shared);
        snapshot.attach_asset("1:1:1", leaf_only);

        assert_eq!(snapshot.subtree_asset_ids("1:1").len(), 2);
        assert_eq!(snapshot.subtree_asset_ids("1:1:1").len(), 2);
        assert_eq!(snapshot.subtree_asset_ids("1").len(), 2);
    }

    #[test]
    fn totals_count_each_asset_once_per_subtree() {
        let mut snapshot = build(&["1", "1:1", "1:2", "1:1:1"]);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        snapshot.attach_asset("1:1:1", a);
        snapshot.attach_asset("1:1", a);
        snapshot.attach_asset("1:2", b);

        let totals = snapshot.assets_amount_total();
        assert_eq!(totals["1:1:1"], 1);
        assert_eq!(totals["1:1"], 1);
        assert_eq!(totals["1:2"], 1);
        assert_eq!(totals["1"], 2);
    }

    #[test]
    fn attach_to_unknown_key_reports_miss() {
        let mut snapshot = build(&["1"]);
        assert!(snapshot.attach_asset("1", Uuid::new_v4()));
        assert!(!snapshot.attach_asset("1:9", Uuid::new_v4()));
    }

    #[test]
    fn multiple_roots_form_a_forest() {
        let snapshot = build(&["1", "2", "2:1"]);
        assert_eq!(snapshot.roots().count(), 2);
        assert!(snapshot.contains_key("2:1"));
    }
}
