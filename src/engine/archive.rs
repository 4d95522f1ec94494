//! Batch archive building.
//!
//! A selection of files and folders becomes one zip archive. Entry paths are
//! rebuilt from the tree: a file under a selected folder is placed at the
//! names of the folders between them, and a directly selected file sits at
//! the archive root. When more than one top-level item is selected, folder
//! entries are prefixed with the selected folder's own name so separate
//! selections cannot collide.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{load_selection, TreeService};
use crate::auth::{AccessLevel, PermissionResolver};
use crate::storage::{ObjectKey, ObjectStore, ObjectStream};
use crate::tree::{Node, NodeRepository};
use crate::{ArborError, ErrorKind, Result};

/// Archive name used when several items are selected.
pub const MULTI_SELECTION_NAME: &str = "download.zip";

/// A built archive.
#[derive(Debug, Clone)]
pub struct Archive {
    /// Suggested download name.
    pub file_name: String,
    /// Zip bytes.
    pub bytes: Vec<u8>,
    /// Entry paths written, in archive order.
    pub entries: Vec<String>,
    /// Ids of files left out because their object could not be fetched.
    pub skipped: Vec<i64>,
}

/// A file and its path inside the archive.
#[derive(Debug, Clone, PartialEq)]
struct ArchiveEntry {
    node: Node,
    path: String,
}

impl<'a> TreeService<'a> {
    /// Build a zip archive of a selection of files and folders.
    ///
    /// # Permission Check
    /// `read` on every selected item.
    ///
    /// Files that fail to fetch are skipped and logged.
    pub async fn build_archive(&self, user_id: &str, ids: &[i64]) -> Result<Archive> {
        let (selection, entries) = {
            let mut conn = self.db.acquire().await?;
            let selection = load_selection(&mut conn, ids).await?;
            for node in &selection {
                PermissionResolver::require(&mut conn, user_id, node, AccessLevel::Read).await?;
            }

            let mut descendants = HashMap::new();
            for node in selection.iter().filter(|n| n.is_folder()) {
                descendants.insert(
                    node.id,
                    NodeRepository::list_descendants(&mut conn, &node.path).await?,
                );
            }
            let entries = plan_entries(&selection, &descendants)?;
            (selection, entries)
        };

        let store = self.store;
        let timeout = self.options.object_timeout;
        let mut opened = stream::iter(entries)
            .map(move |entry| async move {
                let key = entry.node.object_key();
                let result = match tokio::time::timeout(timeout, open_object(store, &key)).await {
                    Ok(result) => result,
                    Err(_) => Err(ArborError::object_store(&key, "timed out")),
                };
                (entry, result)
            })
            .buffered(self.options.max_concurrency.max(1));

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut written = Vec::new();
        let mut skipped = Vec::new();
        while let Some((entry, result)) = opened.next().await {
            let appended = match result {
                Ok(object) => append_entry(&mut writer, &entry, object, options, timeout).await,
                Err(e) => {
                    warn!(file = entry.node.id, path = %entry.path, error = %e, "skipping archive entry");
                    skipped.push(entry.node.id);
                    continue;
                }
            };

            match appended {
                Ok(()) => written.push(entry.path),
                Err(e) if e.kind() == ErrorKind::ObjectStoreFailure => {
                    // Drop the half-written entry
                    writer.abort_file().map_err(zip_error)?;
                    warn!(file = entry.node.id, path = %entry.path, error = %e, "archive entry failed mid-stream");
                    skipped.push(entry.node.id);
                }
                Err(e) => return Err(e),
            }
        }
        let bytes = writer.finish().map_err(zip_error)?.into_inner();

        let file_name = match selection.as_slice() {
            [single] => format!("{}.zip", single.name),
            _ => MULTI_SELECTION_NAME.to_string(),
        };

        info!(
            entries = written.len(),
            skipped = skipped.len(),
            bytes = bytes.len(),
            user = user_id,
            "archive built"
        );
        Ok(Archive {
            file_name,
            bytes,
            entries: written,
            skipped,
        })
    }
}

async fn open_object(store: &dyn ObjectStore, key: &ObjectKey) -> Result<ObjectStream> {
    store
        .get(key)
        .await?
        .ok_or_else(|| ArborError::object_store(key, "object missing"))
}

/// Write one entry, copying the object chunk by chunk.
///
/// Read failures and chunk timeouts come back as object-store errors after
/// the entry has been started.
async fn append_entry(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    entry: &ArchiveEntry,
    mut object: ObjectStream,
    options: SimpleFileOptions,
    timeout: Duration,
) -> Result<()> {
    let key = entry.node.object_key();
    writer
        .start_file(entry.path.as_str(), options)
        .map_err(zip_error)?;
    loop {
        match tokio::time::timeout(timeout, object.next()).await {
            Ok(Some(chunk)) => {
                let chunk = chunk.map_err(|e| ArborError::object_store(&key, e))?;
                writer.write_all(&chunk)?;
            }
            Ok(None) => return Ok(()),
            Err(_) => return Err(ArborError::object_store(&key, "timed out")),
        }
    }
}

fn zip_error(e: zip::result::ZipError) -> ArborError {
    ArborError::Internal(format!("archive: {e}"))
}

/// Resolve a top-level selection to its files and their archive paths.
///
/// `descendants` maps each selected folder to every node below it. Files
/// reachable twice are listed once; clashing paths get a numeric suffix.
fn plan_entries(
    selection: &[Node],
    descendants: &HashMap<i64, Vec<Node>>,
) -> Result<Vec<ArchiveEntry>> {
    let prefix_folders = selection.len() > 1;
    let mut seen = HashSet::new();
    let mut used_paths = HashSet::new();
    let mut entries = Vec::new();

    for item in selection {
        if item.is_file() {
            if seen.insert(item.id) {
                entries.push(ArchiveEntry {
                    node: item.clone(),
                    path: unique_path(item.name.clone(), &mut used_paths),
                });
            }
            continue;
        }

        let below = descendants.get(&item.id).map(Vec::as_slice).unwrap_or(&[]);
        let names: HashMap<i64, &str> = std::iter::once(item)
            .chain(below.iter().filter(|n| n.is_folder()))
            .map(|n| (n.id, n.name.as_str()))
            .collect();

        for file in below.iter().filter(|n| n.is_file()) {
            if !seen.insert(file.id) {
                continue;
            }
            let relative = file.path.relative_to(&item.path).ok_or_else(|| {
                ArborError::Internal(format!("node {} is not below {}", file.id, item.id))
            })?;

            let mut segments = Vec::with_capacity(relative.len() + 1);
            if prefix_folders {
                segments.push(item.name.as_str());
            }
            for id in &relative[..relative.len() - 1] {
                let name = names.get(id).copied().ok_or_else(|| {
                    ArborError::Internal(format!("folder {id} missing from archive lookup"))
                })?;
                segments.push(name);
            }
            segments.push(file.name.as_str());

            entries.push(ArchiveEntry {
                node: file.clone(),
                path: unique_path(segments.join("/"), &mut used_paths),
            });
        }
    }

    Ok(entries)
}

/// Return `path`, or `path` with " (n)" before its extension if already used.
fn unique_path(path: String, used: &mut HashSet<String>) -> String {
    if used.insert(path.clone()) {
        return path;
    }

    let (dir, file) = match path.rfind('/') {
        Some(i) => path.split_at(i + 1),
        None => ("", path.as_str()),
    };
    let (stem, ext) = match file.rfind('.') {
        Some(i) if i > 0 => file.split_at(i),
        _ => (file, ""),
    };

    let mut n = 2;
    loop {
        let candidate = format!("{dir}{stem} ({n}){ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{MaterializedPath, NodeKind};
    use chrono::Utc;

    fn node(kind: NodeKind, name: &str, ids: &[i64]) -> Node {
        let path = MaterializedPath::from_ids(ids.to_vec()).unwrap();
        Node {
            id: path.node_id(),
            kind,
            name: name.to_string(),
            parent_id: path.parent().map(|p| p.node_id()),
            path,
            content_type: None,
            size: 1,
            created_at: Utc::now(),
            expires_at: None,
            metadata: None,
        }
    }

    fn paths(entries: &[ArchiveEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_single_folder_has_no_prefix() {
        let a = node(NodeKind::Folder, "A", &[1, 2]);
        let sub = node(NodeKind::Folder, "sub", &[1, 2, 3]);
        let b = node(NodeKind::File, "b.txt", &[1, 2, 4]);
        let c = node(NodeKind::File, "c.txt", &[1, 2, 3, 5]);
        let descendants = HashMap::from([(a.id, vec![sub, b, c])]);

        let entries = plan_entries(&[a], &descendants).unwrap();
        assert_eq!(paths(&entries), vec!["b.txt", "sub/c.txt"]);
    }

    #[test]
    fn test_multiple_selections_prefix_folders() {
        let a = node(NodeKind::Folder, "A", &[1, 2]);
        let b = node(NodeKind::File, "b.txt", &[1, 2, 4]);
        let c = node(NodeKind::File, "c.txt", &[1, 6]);
        let descendants = HashMap::from([(a.id, vec![b])]);

        let entries = plan_entries(&[a, c], &descendants).unwrap();
        assert_eq!(paths(&entries), vec!["A/b.txt", "c.txt"]);
    }

    #[test]
    fn test_clashing_names_get_suffix() {
        let one = node(NodeKind::File, "notes.txt", &[1, 2, 3]);
        let two = node(NodeKind::File, "notes.txt", &[1, 4, 5]);
        let three = node(NodeKind::File, "notes.txt", &[1, 6, 7]);

        let entries = plan_entries(&[one, two, three], &HashMap::new()).unwrap();
        assert_eq!(
            paths(&entries),
            vec!["notes.txt", "notes (2).txt", "notes (3).txt"]
        );
    }

    #[test]
    fn test_unique_path_without_extension() {
        let mut used = HashSet::new();
        assert_eq!(unique_path("dir/README".to_string(), &mut used), "dir/README");
        assert_eq!(unique_path("dir/README".to_string(), &mut used), "dir/README (2)");
        assert_eq!(unique_path(".env".to_string(), &mut used), ".env");
        assert_eq!(unique_path(".env".to_string(), &mut used), ".env (2)");
    }
}
