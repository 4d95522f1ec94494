//! Permission module for Arbor.
//!
//! Callers arrive with an opaque identity string resolved by an outer
//! authentication layer. This module turns that identity and a node's path
//! into an effective access level.

mod permission;
mod resolver;

pub use permission::{AccessLevel, Grant, GrantRepository};
pub use resolver::{GrantSnapshot, PermissionResolver};
