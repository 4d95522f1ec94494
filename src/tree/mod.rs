//! Hierarchy model for Arbor.
//!
//! This module provides:
//! - Materialized paths with O(depth) ancestor/descendant tests
//! - Node (file/folder) records and their repository
//! - Root records carrying category and quota counters

mod node;
mod path;
mod root;

pub use node::{NewNode, Node, NodeKind, NodeRepository};
pub use path::{MaterializedPath, PATH_SEPARATOR};
pub use root::{Root, RootCategory, RootRepository};

use crate::{ArborError, Result};

/// Maximum length for a node name (in characters).
pub const MAX_NAME_LENGTH: usize = 255;

/// Validate a display name and return it trimmed.
pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ArborError::InvalidInput("name must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ArborError::InvalidInput(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(ArborError::InvalidInput(format!("reserved name: {trimmed}")));
    }
    if trimmed.contains(['/', '\\', '\0']) {
        return Err(ArborError::InvalidInput(
            "name must not contain path separators".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}
