use grid_engine::{Direction, GridBounds, Node};
use uuid::Uuid;

use mindpath::config_mod::StorageSettings;
use mindpath::storage::{
    InsertOutcome, PasswordDocument, SqliteAdapter, StorageAdapter, StorageContext, StorageError, StorageManager,
};

fn bounds() -> GridBounds {
    GridBounds::new(5, 5).unwrap()
}

fn ctx() -> StorageContext {
    StorageContext::new(Uuid::new_v4())
}

async fn memory_manager() -> StorageManager {
    let mut manager = StorageManager::in_memory("passwords", bounds());
    manager.initialize().await.expect("initialize failed");
    manager
}

#[tokio::test]
async fn test_memory_find_missing_is_none() {
    let manager = memory_manager().await;
    assert_eq!(manager.find(42, &ctx()).await.unwrap(), None);
}

#[tokio::test]
async fn test_memory_insert_never_overwrites() {
    let manager = memory_manager().await;
    let original = PasswordDocument::new(7, Node::new(0, 0), vec![Direction::Right, Direction::Down]);
    let replacement = PasswordDocument::new(7, Node::new(4, 4), vec![Direction::Up]);

    assert_eq!(manager.insert(&original, &ctx()).await.unwrap(), InsertOutcome::Inserted);
    assert_eq!(manager.insert(&replacement, &ctx()).await.unwrap(), InsertOutcome::AlreadyExists);
    assert_eq!(manager.find(7, &ctx()).await.unwrap(), Some(original));

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.backend, "memory");
}

#[tokio::test]
async fn test_memory_rejects_path_leaving_the_board() {
    let manager = memory_manager().await;
    let doc = PasswordDocument::new(1, Node::new(0, 0), vec![Direction::Left]);

    let err = manager.insert(&doc, &ctx()).await.unwrap_err();
    assert!(matches!(err, StorageError::ValidationFailed { .. }), "got {:?}", err);
    assert_eq!(manager.find(1, &ctx()).await.unwrap(), None);
    assert_eq!(manager.metrics().errors_total, 1);
}

#[tokio::test]
async fn test_memory_seed_replaces_collection() {
    let manager = memory_manager().await;
    manager
        .insert(&PasswordDocument::new(5, Node::new(1, 1), vec![Direction::Up]), &ctx())
        .await
        .unwrap();

    let seeded = manager.seed_demo(&StorageContext::system()).await.unwrap();
    assert_eq!(seeded, PasswordDocument::demo());
    assert_eq!(manager.find(5, &ctx()).await.unwrap(), None);
    assert_eq!(manager.find(99, &ctx()).await.unwrap(), Some(PasswordDocument::demo()));
    assert_eq!(manager.get_stats().await.unwrap().total_documents, 1);
}

#[tokio::test]
async fn test_unknown_backend_is_rejected() {
    let settings = StorageSettings { backend: "mongodb".to_string(), ..Default::default() };
    let err = StorageManager::from_settings(&settings, bounds()).unwrap_err();
    assert!(matches!(err, StorageError::BackendError { ref backend, .. } if backend == "mongodb"));
}

#[tokio::test]
async fn test_sqlite_adapter_find_insert_delete() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("mindpath.sqlite");

    let mut adapter = SqliteAdapter::new(path.to_string_lossy().to_string());
    adapter.initialize().await.expect("initialize failed");
    adapter.health_check().await.expect("health check failed");

    let doc = PasswordDocument::demo();
    assert_eq!(adapter.find_by_id("passwords", 99, &ctx()).await.unwrap(), None);
    assert_eq!(adapter.insert_if_absent("passwords", &doc, &ctx()).await.unwrap(), InsertOutcome::Inserted);

    let other = PasswordDocument::new(99, Node::new(0, 0), vec![Direction::Down]);
    assert_eq!(adapter.insert_if_absent("passwords", &other, &ctx()).await.unwrap(), InsertOutcome::AlreadyExists);
    assert_eq!(adapter.find_by_id("passwords", 99, &ctx()).await.unwrap(), Some(doc.clone()));

    // Collections do not share ids.
    assert_eq!(adapter.insert_if_absent("practice", &other, &ctx()).await.unwrap(), InsertOutcome::Inserted);
    assert_eq!(adapter.get_stats("passwords").await.unwrap().total_documents, 1);

    assert_eq!(adapter.delete_all("passwords", &ctx()).await.unwrap(), 1);
    assert_eq!(adapter.find_by_id("passwords", 99, &ctx()).await.unwrap(), None);
    assert_eq!(adapter.find_by_id("practice", 99, &ctx()).await.unwrap(), Some(other));
}

#[tokio::test]
async fn test_sqlite_manager_persists_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let settings = StorageSettings {
        backend: "sqlite".to_string(),
        sqlite_path: dir.path().join("store.sqlite").to_string_lossy().to_string(),
        ..Default::default()
    };

    {
        let mut manager = StorageManager::from_settings(&settings, bounds()).unwrap();
        manager.initialize().await.unwrap();
        manager.seed_demo(&StorageContext::system()).await.unwrap();
    }

    let mut reopened = StorageManager::from_settings(&settings, bounds()).unwrap();
    reopened.initialize().await.unwrap();
    assert_eq!(reopened.primary_backend(), "sqlite");
    assert_eq!(reopened.find(99, &ctx()).await.unwrap(), Some(PasswordDocument::demo()));
    assert_eq!(reopened.health_check().await.get("sqlite"), Some(&true));
}

#[tokio::test]
async fn test_sqlite_uninitialized_is_unavailable() {
    let adapter = SqliteAdapter::new("never-opened.sqlite");
    let err = adapter.find_by_id("passwords", 1, &ctx()).await.unwrap_err();
    assert!(matches!(err, StorageError::DatabaseUnavailable { .. }));
}
