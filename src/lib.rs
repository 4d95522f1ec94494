//! Arbor - hierarchical file-system layer.
//!
//! A directory tree, permissions and quotas live in a relational metadata
//! store; file bytes live in an object store. Every operation goes through
//! [`TreeService`], which keeps the two consistent under partial failure.

pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod quota;
pub mod storage;
pub mod tree;

pub use auth::{AccessLevel, Grant, GrantRepository, GrantSnapshot, PermissionResolver};
pub use config::Config;
pub use db::Database;
pub use engine::{
    Archive, CopyOutcome, DeleteOutcome, MoveOutcome, NodeUpdate, TreeOptions, TreeService,
    UploadOutcome, UploadRequest,
};
pub use error::{ArborError, ErrorKind, Result};
pub use quota::{QuotaLedger, QuotaUsage};
pub use storage::{LocalObjectStore, MemoryObjectStore, ObjectKey, ObjectStore};
pub use tree::{MaterializedPath, NewNode, Node, NodeKind, NodeRepository, Root, RootCategory};
