//! Domain events consumed by the invalidation controller.
//!
//! The storage layer publishes one of these synchronously after a
//! mutation commits. Handlers never recompute on the write path; they
//! only mark affected cached views stale.

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Remove,
}

/// Which membership field of a grant changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantField {
    Users,
    Groups,
    Nodes,
    Assets,
}

#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// One asset gained/lost relations to a set of nodes.
    AssetNodesChanged {
        tenant_id: Uuid,
        asset_id: Uuid,
        node_ids: Vec<Uuid>,
        kind: ChangeKind,
    },
    /// One node gained/lost relations to a set of assets.
    NodeAssetsChanged {
        tenant_id: Uuid,
        node_id: Uuid,
        asset_ids: Vec<Uuid>,
        kind: ChangeKind,
    },
    /// A grant was created, deleted, or had scalar fields updated.
    GrantChanged {
        tenant_id: Uuid,
        grant_id: Uuid,
        kind: ChangeKind,
    },
    /// Ids were added to / removed from one of a grant's membership fields.
    GrantMembersChanged {
        tenant_id: Uuid,
        grant_id: Uuid,
        field: GrantField,
        ids: Vec<Uuid>,
        kind: ChangeKind,
    },
    /// A user joined or left a set of groups.
    UserGroupsChanged {
        tenant_id: Uuid,
        user_id: Uuid,
        group_ids: Vec<Uuid>,
        kind: ChangeKind,
    },
}

impl DomainEvent {
    pub fn tenant_id(&self) -> Uuid {
        match self {
            DomainEvent::AssetNodesChanged { tenant_id, .. }
            | DomainEvent::NodeAssetsChanged { tenant_id, .. }
            | DomainEvent::GrantChanged { tenant_id, .. }
            | DomainEvent::GrantMembersChanged { tenant_id, .. }
            | DomainEvent::UserGroupsChanged { tenant_id, .. } => *tenant_id,
        }
    }
}
