//! WARDEN Core — domain models and contracts for the hierarchical
//! asset-authorization engine.
//!
//! This crate holds:
//! - Domain models ([`models`]): tenants, users, groups, nodes, assets, grants
//! - Node key/path arithmetic ([`key`])
//! - Repository trait definitions ([`repository`])
//! - Domain events consumed by the invalidation layer ([`events`])
//! - The mutual-exclusion abstraction guarding aggregate updates ([`lock`])
//! - Error types ([`error`])
//!
//! No I/O happens here; storage backends live in `warden-db` and the
//! resolution/maintenance algorithms in `warden-engine`.

pub mod error;
pub mod events;
pub mod key;
pub mod lock;
pub mod models;
pub mod repository;

pub use error::{WardenError, WardenResult};
