//! Integration tests for batch archive building.

mod common;

use arbor::{ErrorKind, RootCategory};
use common::{zip_entries, zip_read, TestTree, OWNER};

#[tokio::test]
async fn test_single_folder_archive() {
    let t = TestTree::new().await;
    let root = t.root("home", RootCategory::Personal, None).await;
    let a = t.folder(&root, "A").await;
    t.file(&a, "b.txt", b"bee").await;
    let sub = t.folder(&a, "sub").await;
    t.file(&sub, "d.txt", b"dee").await;

    let archive = t.service().build_archive(OWNER, &[a.id]).await.unwrap();
    assert_eq!(archive.file_name, "A.zip");
    assert!(archive.skipped.is_empty());

    let mut names = zip_entries(&archive.bytes);
    names.sort();
    assert_eq!(names, vec!["b.txt", "sub/d.txt"]);
    assert_eq!(zip_read(&archive.bytes, "sub/d.txt"), b"dee");
}

#[tokio::test]
async fn test_mixed_selection_archive() {
    let t = TestTree::new().await;
    let root = t.root("home", RootCategory::Personal, None).await;
    let a = t.folder(&root, "A").await;
    t.file(&a, "b.txt", b"bee").await;
    let c = t.file(&root, "c.txt", b"sea").await;

    let archive = t.service().build_archive(OWNER, &[a.id, c.id]).await.unwrap();
    assert_eq!(archive.file_name, "download.zip");
    assert_eq!(zip_entries(&archive.bytes), vec!["A/b.txt", "c.txt"]);
    assert_eq!(archive.entries, vec!["A/b.txt", "c.txt"]);
    assert_eq!(zip_read(&archive.bytes, "A/b.txt"), b"bee");
    assert_eq!(zip_read(&archive.bytes, "c.txt"), b"sea");
}

#[tokio::test]
async fn test_nested_selection_is_folded() {
    let t = TestTree::new().await;
    let root = t.root("home", RootCategory::Personal, None).await;
    let a = t.folder(&root, "A").await;
    let b = t.file(&a, "b.txt", b"bee").await;

    // b sits inside A, so only A is a top-level item
    let archive = t.service().build_archive(OWNER, &[a.id, b.id]).await.unwrap();
    assert_eq!(archive.file_name, "A.zip");
    assert_eq!(zip_entries(&archive.bytes), vec!["b.txt"]);
}

#[tokio::test]
async fn test_missing_object_is_skipped() {
    let t = TestTree::new().await;
    let root = t.root("home", RootCategory::Personal, None).await;
    let a = t.folder(&root, "A").await;
    let good = t.file(&a, "good.txt", b"ok").await;
    let bad = t.file(&a, "bad.txt", b"lost").await;
    t.store.fail_on(&bad.object_key()).await;

    let archive = t.service().build_archive(OWNER, &[a.id]).await.unwrap();
    assert_eq!(archive.skipped, vec![bad.id]);
    assert_eq!(zip_entries(&archive.bytes), vec![good.name.clone()]);
}

#[tokio::test]
async fn test_archive_requires_read() {
    let t = TestTree::new().await;
    let root = t.root("home", RootCategory::Personal, None).await;
    let a = t.folder(&root, "A").await;
    t.file(&a, "b.txt", b"bee").await;

    let err = t.service().build_archive("mallory", &[a.id]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = t.service().build_archive(OWNER, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_large_file_streams_across_chunks() {
    let t = TestTree::new().await;
    let root = t.root("home", RootCategory::Personal, None).await;
    let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let big = t.file(&root, "big.bin", &content).await;
    let small = t.file(&root, "small.txt", b"tiny").await;

    let archive = t
        .service()
        .build_archive(OWNER, &[big.id, small.id])
        .await
        .unwrap();
    assert_eq!(zip_entries(&archive.bytes), vec!["big.bin", "small.txt"]);
    assert_eq!(zip_read(&archive.bytes, "big.bin"), content);
}

/// An object that breaks after its first chunk leaves no entry behind and
/// does not disturb the entries around it.
#[tokio::test]
async fn test_failure_mid_stream_drops_entry() {
    use arbor::storage::ObjectStream;
    use arbor::{Database, MemoryObjectStore, ObjectKey, ObjectStore, TreeService, UploadRequest};
    use async_trait::async_trait;
    use futures::StreamExt;

    /// Memory store whose reads of one key fail after the first chunk.
    struct BrokenRead {
        inner: MemoryObjectStore,
        broken: std::sync::Mutex<Option<ObjectKey>>,
    }

    #[async_trait]
    impl ObjectStore for BrokenRead {
        async fn put(&self, key: &ObjectKey, bytes: Vec<u8>, content_type: &str) -> arbor::Result<()> {
            self.inner.put(key, bytes, content_type).await
        }
        async fn get(&self, key: &ObjectKey) -> arbor::Result<Option<ObjectStream>> {
            let broken = self.broken.lock().unwrap().as_ref() == Some(key);
            if broken {
                let chunks: Vec<std::io::Result<Vec<u8>>> = vec![
                    Ok(b"first half".to_vec()),
                    Err(std::io::Error::other("connection reset")),
                ];
                return Ok(Some(futures::stream::iter(chunks).boxed()));
            }
            self.inner.get(key).await
        }
        async fn delete(&self, key: &ObjectKey) -> arbor::Result<()> {
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &ObjectKey) -> arbor::Result<bool> {
            self.inner.exists(key).await
        }
        async fn presigned_url(
            &self,
            key: &ObjectKey,
            ttl_secs: u64,
            download_name: Option<&str>,
        ) -> arbor::Result<String> {
            self.inner.presigned_url(key, ttl_secs, download_name).await
        }
        async fn copy(&self, source: &ObjectKey, dest: &ObjectKey) -> arbor::Result<()> {
            self.inner.copy(source, dest).await
        }
    }

    let db = Database::open_in_memory().await.unwrap();
    let store = BrokenRead {
        inner: MemoryObjectStore::new(),
        broken: std::sync::Mutex::new(None),
    };
    let service = TreeService::new(&db, &store);
    let root = service
        .create_root(OWNER, "home", RootCategory::Personal, None)
        .await
        .unwrap();
    let mut ids = Vec::new();
    for name in ["a.txt", "b.txt", "c.txt"] {
        let node = service
            .upload_file(
                OWNER,
                UploadRequest::new(root.id, name, "text/plain", name.as_bytes().to_vec()),
            )
            .await
            .unwrap()
            .node;
        ids.push(node.id);
    }
    *store.broken.lock().unwrap() = Some(ObjectKey::for_node(ids[1]));

    let archive = service.build_archive(OWNER, &ids).await.unwrap();
    assert_eq!(archive.skipped, vec![ids[1]]);
    assert_eq!(archive.entries, vec!["a.txt", "c.txt"]);
    assert_eq!(zip_entries(&archive.bytes), vec!["a.txt", "c.txt"]);
    assert_eq!(zip_read(&archive.bytes, "a.txt"), b"a.txt");
    assert_eq!(zip_read(&archive.bytes, "c.txt"), b"c.txt");
}
