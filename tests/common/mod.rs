//! Test helpers for integration tests.
//!
//! Provides a TestTree fixture (in-memory database plus in-memory object
//! store) and helpers for building trees and reading archives.

#![allow(dead_code)]

use std::io::{Cursor, Read};

use arbor::{
    Database, MemoryObjectStore, Node, QuotaLedger, RootCategory, TreeService, UploadRequest,
};

/// Owner of every root created through the helpers.
pub const OWNER: &str = "alice";

/// Metadata store and object store for one test.
pub struct TestTree {
    pub db: Database,
    pub store: MemoryObjectStore,
}

impl TestTree {
    /// Fresh in-memory stores.
    pub async fn new() -> Self {
        Self {
            db: Database::open_in_memory().await.unwrap(),
            store: MemoryObjectStore::new(),
        }
    }

    pub fn service(&self) -> TreeService<'_> {
        TreeService::new(&self.db, &self.store)
    }

    /// Create a root owned by [`OWNER`].
    pub async fn root(&self, name: &str, category: RootCategory, max_bytes: Option<i64>) -> Node {
        self.service()
            .create_root(OWNER, name, category, max_bytes)
            .await
            .unwrap()
    }

    /// Create a folder as [`OWNER`].
    pub async fn folder(&self, parent: &Node, name: &str) -> Node {
        self.service()
            .create_folder(OWNER, parent.id, name)
            .await
            .unwrap()
    }

    /// Upload a file as [`OWNER`].
    pub async fn file(&self, parent: &Node, name: &str, content: &[u8]) -> Node {
        self.service()
            .upload_file(
                OWNER,
                UploadRequest::new(parent.id, name, "text/plain", content.to_vec()),
            )
            .await
            .unwrap()
            .node
    }

    /// Reload a node.
    pub async fn reload(&self, node: &Node) -> Node {
        self.service().get_node(OWNER, node.id).await.unwrap()
    }

    /// Names of a folder's children, in listing order.
    pub async fn child_names(&self, folder: &Node) -> Vec<String> {
        self.service()
            .list_children(OWNER, folder.id)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect()
    }

    /// Assert the root's used counter equals the bytes of the files below it.
    pub async fn assert_ledger_matches(&self, root: &Node) {
        let mut conn = self.db.acquire().await.unwrap();
        let usage = QuotaLedger::usage(&mut conn, root.id).await.unwrap();
        let actual = QuotaLedger::actual_usage(&mut conn, root.id).await.unwrap();
        assert_eq!(usage.used, actual, "ledger drifted on root {}", root.id);
    }
}

/// Entry names of a zip archive, in archive order.
pub fn zip_entries(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Contents of one archive entry.
pub fn zip_read(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut content = Vec::new();
    file.read_to_end(&mut content).unwrap();
    content
}
