/// VFS and store tests
///
/// Virtual-path CRUD, metadata lookups, search, URL artifact caching and
/// daemon bootstrap artifacts.
/// Run with: cargo test --test vfs_store_tests

use port42d::ai::MockAIClient;
use port42d::core::{DaemonConfig, Reference, ReferenceType};
use port42d::server::{Daemon, handlers, protocol::Request};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn daemon_in(dir: &TempDir) -> Arc<Daemon> {
    let config = DaemonConfig::with_base_dir(dir.path().join("port42"));
    Daemon::new(config, Arc::new(MockAIClient::new("unused"))).unwrap()
}

fn request(request_type: &str, id: &str, body: serde_json::Value) -> Request {
    serde_json::from_value(json!({"type": request_type, "id": id, "payload": body})).unwrap()
}

#[tokio::test]
async fn test_store_read_update_delete_path() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir);

    let stored = handlers::handle(
        &daemon,
        request(
            "store_path",
            "r1",
            json!({"path": "/artifacts/notes.md", "content": "first version", "title": "Notes"}),
        ),
    )
    .await;
    assert!(stored.success);
    let first_id = stored.data.unwrap()["object_id"]
        .as_str()
        .unwrap()
        .to_string();

    let read = handlers::handle(
        &daemon,
        request("read_path", "r2", json!({"path": "/artifacts/notes.md"})),
    )
    .await;
    assert_eq!(
        read.data.unwrap()["content"],
        json!("first version")
    );

    let updated = handlers::handle(
        &daemon,
        request(
            "update_path",
            "r3",
            json!({"path": "/artifacts/notes.md", "content": "second version"}),
        ),
    )
    .await;
    assert!(updated.success);
    let update_data = updated.data.unwrap();
    assert_eq!(update_data["previous_object_id"], json!(first_id));
    assert_ne!(update_data["object_id"], json!(first_id));

    let read_again = handlers::handle(
        &daemon,
        request("read_path", "r4", json!({"path": "/artifacts/notes.md"})),
    )
    .await;
    assert_eq!(read_again.data.unwrap()["content"], json!("second version"));

    let deleted = handlers::handle(
        &daemon,
        request("delete_path", "r5", json!({"path": "/artifacts/notes.md"})),
    )
    .await;
    assert!(deleted.success);
    let gone = handlers::handle(
        &daemon,
        request("read_path", "r6", json!({"path": "/artifacts/notes.md"})),
    )
    .await;
    assert!(!gone.success);
}

#[tokio::test]
async fn test_get_metadata_by_path() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir);

    handlers::handle(
        &daemon,
        request(
            "store_path",
            "r1",
            json!({"path": "/artifacts/tagged.md", "content": "body",
                   "title": "Tagged", "tags": ["docs", "demo"]}),
        ),
    )
    .await;

    let meta = handlers::handle(
        &daemon,
        request("get_metadata", "r2", json!({"path": "/artifacts/tagged.md"})),
    )
    .await;
    assert!(meta.success);
    let body = meta.data.unwrap();
    assert_eq!(body["title"], json!("Tagged"));
    assert_eq!(body["tags"], json!(["docs", "demo"]));
    assert_eq!(body["type"], json!("document"));
    assert_eq!(body["size"], json!(4));
}

#[tokio::test]
async fn test_search_finds_stored_document() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir);

    handlers::handle(
        &daemon,
        request(
            "store_path",
            "r1",
            json!({"path": "/artifacts/findme.md", "content": "a unique xylophone fact",
                   "title": "Findable"}),
        ),
    )
    .await;

    let found = handlers::handle(
        &daemon,
        request("search", "r2", json!({"query": "xylophone"})),
    )
    .await;
    assert!(found.success);
    let data = found.data.unwrap();
    assert_eq!(data["count"], json!(1));
    assert_eq!(data["results"][0]["source"], json!("metadata"));
}

#[tokio::test]
async fn test_url_artifact_cache_prevents_refetch() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir);

    // Seed the cache the way a successful first fetch would, pointing at an
    // address that would fail if actually fetched.
    let url = "https://192.0.2.9/spec.json";
    let content_id = daemon
        .metadata
        .objects()
        .store(br#"{"slideshow": "cached"}"#)
        .unwrap();
    let artifact_id = port42d::resolve::UrlResolver::artifact_id(url);
    let mut relation = port42d::core::Relation::new(
        artifact_id.clone(),
        port42d::core::RelationType::UrlArtifact,
    );
    relation
        .properties
        .extra
        .insert("content_id".to_string(), json!(content_id));
    daemon.relations.save(&relation).unwrap();

    let before = daemon
        .relations
        .load_by_type(port42d::core::RelationType::UrlArtifact)
        .unwrap()
        .len();

    let reference = Reference::new(ReferenceType::Url, url);
    let (block, contexts) = daemon.resolver.resolve_for_ai(&[reference]).await;
    assert_eq!(contexts.len(), 1);
    assert!(block.contains("cached"));
    assert_eq!(contexts[0].metadata.get("cache_hit").unwrap(), &json!(true));

    // No new URLArtifact was created by the cache hit.
    let after = daemon
        .relations
        .load_by_type(port42d::core::RelationType::UrlArtifact)
        .unwrap()
        .len();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_context_and_watch_reflect_activity() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir);

    handlers::handle(
        &daemon,
        request(
            "store_path",
            "r1",
            json!({"path": "/artifacts/seen.md", "content": "x"}),
        ),
    )
    .await;

    let watch = handlers::handle(&daemon, request("watch", "r2", json!({}))).await;
    let recent = watch.data.unwrap();
    let recent = recent["recent"].as_array().unwrap().to_vec();
    assert!(
        recent
            .iter()
            .any(|e| e["request_type"] == json!("store_path"))
    );

    let context = handlers::handle(&daemon, request("context", "r3", json!({}))).await;
    let snapshot = context.data.unwrap();
    assert!(!snapshot["suggestions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_bootstrap_writes_install_deps_helper() {
    let dir = TempDir::new().unwrap();
    let _daemon = daemon_in(&dir);

    let helper = dir.path().join("port42/install-deps.sh");
    assert!(helper.exists());
    let body = std::fs::read_to_string(&helper).unwrap();
    assert!(body.starts_with("#!/bin/bash"));

    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(&helper).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0o111);
}

#[tokio::test]
async fn test_object_store_layout_is_sharded() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir);

    handlers::handle(
        &daemon,
        request(
            "store_path",
            "r1",
            json!({"path": "/artifacts/sharded.md", "content": "shard me"}),
        ),
    )
    .await;

    let objects_root = dir.path().join("port42/objects");
    let first_level: Vec<_> = std::fs::read_dir(&objects_root).unwrap().flatten().collect();
    assert!(!first_level.is_empty());
    for entry in first_level {
        assert_eq!(entry.file_name().to_string_lossy().len(), 2);
    }
}
