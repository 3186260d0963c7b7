//! The query surface consumed by session and UI layers.
//!
//! Point decisions (`validate_permission`) always go to the store: they
//! must reflect grant validity at this instant. Bulk views (asset id
//! sets, node trees) are served from the [`ViewCache`] and resolved on
//! miss.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::key;
use warden_core::models::action::ActionSet;
use warden_core::models::grant::Grant;
use warden_core::repository::{
    AssetRepository, GrantRepository, GroupRepository, NodeRepository,
};

use crate::invalidate::ViewCache;
use crate::resolve::{PermResolver, PermTreeNode, ResolvedView};

/// Outcome of a point permission check. Denials carry an empty action
/// set and no expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    /// Union of the actions every contributing grant allows.
    pub actions: ActionSet,
    /// Unix seconds at which access is first guaranteed to be lost,
    /// assuming no new grant appears: the soonest expiry among the
    /// contributing grants.
    pub expire_at: Option<i64>,
}

impl PermissionDecision {
    fn denied() -> Self {
        Self {
            allowed: false,
            actions: ActionSet::empty(),
            expire_at: None,
        }
    }
}

pub struct PermQueryService<G, Gr, N, A, C> {
    resolver: PermResolver<G, Gr, N, A>,
    nodes: N,
    assets: A,
    cache: Arc<C>,
}

impl<G, Gr, N, A, C> PermQueryService<G, Gr, N, A, C>
where
    G: GrantRepository + Clone,
    Gr: GroupRepository + Clone,
    N: NodeRepository + Clone,
    A: AssetRepository + Clone,
    C: ViewCache,
{
    pub fn new(grants: G, groups: Gr, nodes: N, assets: A, cache: Arc<C>) -> Self {
        Self {
            resolver: PermResolver::new(grants, groups, nodes.clone(), assets.clone()),
            nodes,
            assets,
            cache,
        }
    }

    /// Whether `user` may perform `action` on `asset` as `account`.
    ///
    /// Fails closed: a missing asset surfaces as `NotFound`, and any
    /// evaluation error denies rather than defaults open.
    pub async fn validate_permission(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        asset_id: Uuid,
        account: &str,
        action: ActionSet,
    ) -> WardenResult<PermissionDecision> {
        let asset = self.assets.get_by_id(tenant_id, asset_id).await?;
        if !asset.is_active {
            return Ok(PermissionDecision::denied());
        }

        let grants = self.resolver.grants_for(tenant_id, user_id, true).await?;
        if grants.is_empty() {
            return Ok(PermissionDecision::denied());
        }

        // Every key whose subtree contains the asset.
        let mut covering_keys: HashSet<String> = HashSet::new();
        for attachment in self.assets.node_keys_of(tenant_id, asset_id).await? {
            covering_keys.extend(key::ancestor_keys_of(&attachment, true));
        }

        let node_keys = self.grant_node_keys(tenant_id, &grants).await?;
        let contributing: Vec<&Grant> = grants
            .iter()
            .filter(|grant| grant.covers_account(account))
            .filter(|grant| {
                grant.asset_ids.contains(&asset_id)
                    || grant.node_ids.iter().any(|id| {
                        node_keys
                            .get(id)
                            .is_some_and(|k| covering_keys.contains(k))
                    })
            })
            .collect();
        if contributing.is_empty() {
            return Ok(PermissionDecision::denied());
        }

        let actions = contributing
            .iter()
            .fold(ActionSet::empty(), |acc, grant| acc.union(grant.actions));
        let expire_at = contributing
            .iter()
            .map(|grant| grant.date_expired.timestamp())
            .min();

        let decision = PermissionDecision {
            allowed: actions.contains(action),
            actions,
            expire_at,
        };
        debug!(
            %tenant_id,
            %user_id,
            %asset_id,
            account,
            allowed = decision.allowed,
            "permission validated"
        );
        Ok(decision)
    }

    /// Every asset id the user is authorized for, cached per user.
    pub async fn get_authorized_asset_ids(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> WardenResult<Vec<Uuid>> {
        let view = self.view(tenant_id, user_id).await?;
        let mut ids: Vec<Uuid> = view.asset_ids.iter().copied().collect();
        ids.sort();
        Ok(ids)
    }

    /// The user's classified authorized node tree, parents first.
    pub async fn get_authorized_node_tree(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> WardenResult<Vec<PermTreeNode>> {
        let view = self.view(tenant_id, user_id).await?;
        Ok(view.nodes.clone())
    }

    async fn view(&self, tenant_id: Uuid, user_id: Uuid) -> WardenResult<Arc<ResolvedView>> {
        if let Some(view) = self.cache.get(tenant_id, user_id) {
            return Ok(view);
        }
        let view = Arc::new(self.resolver.resolve(tenant_id, user_id, true).await?);
        self.cache.put(view.clone());
        Ok(view)
    }

    /// Keys of every node any of the grants targets.
    async fn grant_node_keys(
        &self,
        tenant_id: Uuid,
        grants: &[Grant],
    ) -> WardenResult<HashMap<Uuid, String>> {
        let mut keys = HashMap::new();
        for grant in grants {
            for node_id in &grant.node_ids {
                if keys.contains_key(node_id) {
                    continue;
                }
                let node = self.nodes.get_by_id(tenant_id, *node_id).await?;
                keys.insert(*node_id, node.key);
            }
        }
        Ok(keys)
    }
}
