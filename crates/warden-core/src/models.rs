//! Domain models for WARDEN.
//!
//! These are the core types shared across all crates.

pub mod action;
pub mod asset;
pub mod grant;
pub mod group;
pub mod node;
pub mod tenant;
pub mod user;
