//! WARDEN Engine — the authorization core.
//!
//! This crate provides:
//! - Graph snapshots of a tenant's node forest ([`snapshot::SnapshotBuilder`])
//! - Incremental maintenance of per-node asset counts ([`amount::AmountMaintainer`])
//! - Permission resolution into per-user views ([`resolve::PermResolver`])
//! - Event-driven cache invalidation ([`invalidate::InvalidationController`])
//! - The downstream query surface ([`query::PermQueryService`])
//! - An in-process lock provider ([`lock::LocalMutexProvider`])

pub mod amount;
pub mod invalidate;
pub mod lock;
pub mod query;
pub mod resolve;
pub mod snapshot;

pub use amount::AmountMaintainer;
pub use invalidate::{EventBus, ExpirySweeper, InvalidationController, MemoryViewCache, ViewCache};
pub use lock::LocalMutexProvider;
pub use query::{PermQueryService, PermissionDecision};
pub use resolve::{NodeFrom, PermResolver, PermTreeNode, ResolvedView};
pub use snapshot::{Snapshot, SnapshotBuilder};
