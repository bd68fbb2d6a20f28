// src/storage/storage_mod.rs
// Storage Manager - password template documents
// One collection, keyed lookups and insert-if-absent over pluggable backends

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use grid_engine::{Direction, GridBounds, Node, PasswordTemplate};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::validation_mod::validate_document;
use crate::config_mod::StorageSettings;

/// Storage errors with detailed context
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {key}")]
    NotFound { key: String },

    #[error("Validation failed: {error}")]
    ValidationFailed { error: String },

    #[error("Backend error: {backend} - {error}")]
    BackendError { backend: String, error: String },

    #[error("Serialization error: {error}")]
    SerializationError { error: String },

    #[error("Database unavailable: {reason}")]
    DatabaseUnavailable { reason: String },
}

/// Per-operation context carried into adapters for log correlation.
#[derive(Debug, Clone)]
pub struct StorageContext {
    pub connection_id: Uuid,
    pub operation_id: Uuid,
}

impl StorageContext {
    pub fn new(connection_id: Uuid) -> Self {
        Self { connection_id, operation_id: Uuid::new_v4() }
    }

    /// Context for work not tied to a browser connection (seeding, CLI).
    pub fn system() -> Self {
        Self { connection_id: Uuid::nil(), operation_id: Uuid::new_v4() }
    }
}

/// A stored password path: `{ "_id": 99, "start": [2, 2], "moves": ["left", ...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordDocument {
    #[serde(rename = "_id")]
    pub id: i64,
    pub start: Node,
    pub moves: Vec<Direction>,
}

impl PasswordDocument {
    pub fn new(id: i64, start: Node, moves: Vec<Direction>) -> Self {
        Self { id, start, moves }
    }

    pub fn from_template(id: i64, template: PasswordTemplate) -> Self {
        Self { id, start: template.start, moves: template.moves }
    }

    pub fn template(&self) -> PasswordTemplate {
        PasswordTemplate::new(self.start, self.moves.clone())
    }

    /// The demo document the seed command writes.
    pub fn demo() -> Self {
        Self::new(
            99,
            Node::new(2, 2),
            vec![Direction::Left, Direction::Up, Direction::Right, Direction::Right],
        )
    }
}

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

impl InsertOutcome {
    pub fn inserted(self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// Storage adapter trait
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Initialize the storage backend
    async fn initialize(&mut self) -> Result<(), StorageError>;

    /// Check if the backend is healthy
    async fn health_check(&self) -> Result<(), StorageError>;

    /// Look a document up by `_id`
    async fn find_by_id(&self, collection: &str, id: i64, ctx: &StorageContext) -> Result<Option<PasswordDocument>, StorageError>;

    /// Insert unless a document with the same `_id` exists; never overwrites
    async fn insert_if_absent(&self, collection: &str, doc: &PasswordDocument, ctx: &StorageContext) -> Result<InsertOutcome, StorageError>;

    /// Remove every document in the collection, returning how many went
    async fn delete_all(&self, collection: &str, ctx: &StorageContext) -> Result<u64, StorageError>;

    /// Get storage statistics
    async fn get_stats(&self, collection: &str) -> Result<StorageStats, StorageError>;
}

/// Storage statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub backend: String,
    pub collection: String,
    pub total_documents: u64,
}

/// In-memory adapter; the default backend and the one tests use.
pub struct MemoryAdapter {
    inner: Arc<RwLock<HashMap<String, BTreeMap<i64, PasswordDocument>>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn initialize(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn find_by_id(&self, collection: &str, id: i64, _ctx: &StorageContext) -> Result<Option<PasswordDocument>, StorageError> {
        let map = self.inner.read().await;
        Ok(map.get(collection).and_then(|docs| docs.get(&id)).cloned())
    }

    async fn insert_if_absent(&self, collection: &str, doc: &PasswordDocument, _ctx: &StorageContext) -> Result<InsertOutcome, StorageError> {
        let mut map = self.inner.write().await;
        let docs = map.entry(collection.to_string()).or_default();
        if docs.contains_key(&doc.id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        docs.insert(doc.id, doc.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn delete_all(&self, collection: &str, _ctx: &StorageContext) -> Result<u64, StorageError> {
        let mut map = self.inner.write().await;
        Ok(map.remove(collection).map(|docs| docs.len() as u64).unwrap_or(0))
    }

    async fn get_stats(&self, collection: &str) -> Result<StorageStats, StorageError> {
        let map = self.inner.read().await;
        Ok(StorageStats {
            backend: "memory".to_string(),
            collection: collection.to_string(),
            total_documents: map.get(collection).map(|d| d.len() as u64).unwrap_or(0),
        })
    }
}

#[derive(Debug, Default)]
struct StorageMetrics {
    operations_total: AtomicU64,
    errors_total: AtomicU64,
}

/// Snapshot of the manager's counters for `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetricsSnapshot {
    pub operations_total: u64,
    pub errors_total: u64,
}

/// Main storage manager: routes document operations to the primary backend.
pub struct StorageManager {
    adapters: HashMap<String, Box<dyn StorageAdapter>>,
    primary_backend: String,
    collection: String,
    bounds: GridBounds,
    metrics: StorageMetrics,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("primary_backend", &self.primary_backend)
            .field("collection", &self.collection)
            .field("adapters_count", &self.adapters.len())
            .finish()
    }
}

impl StorageManager {
    /// Manager with only the in-memory adapter registered.
    pub fn in_memory(collection: impl Into<String>, bounds: GridBounds) -> Self {
        let mut adapters: HashMap<String, Box<dyn StorageAdapter>> = HashMap::new();
        adapters.insert("memory".to_string(), Box::new(MemoryAdapter::new()));
        Self {
            adapters,
            primary_backend: "memory".to_string(),
            collection: collection.into(),
            bounds,
            metrics: StorageMetrics::default(),
        }
    }

    /// Build from settings. The SQLite adapter is only registered when it is
    /// the configured backend so memory runs never touch the filesystem.
    pub fn from_settings(settings: &StorageSettings, bounds: GridBounds) -> Result<Self, StorageError> {
        let mut manager = Self::in_memory(settings.collection.clone(), bounds);
        if settings.backend == "sqlite" {
            let sqlite = super::sqlite_adapter::SqliteAdapter::new(settings.sqlite_path.clone());
            manager.register_adapter("sqlite".to_string(), Box::new(sqlite));
        }
        manager.set_primary_backend(settings.backend.clone())?;
        Ok(manager)
    }

    /// Register a storage adapter
    pub fn register_adapter(&mut self, name: String, adapter: Box<dyn StorageAdapter>) {
        self.adapters.insert(name, adapter);
    }

    /// Set primary backend
    pub fn set_primary_backend(&mut self, backend: String) -> Result<(), StorageError> {
        if !self.adapters.contains_key(&backend) {
            return Err(StorageError::BackendError {
                backend: backend.clone(),
                error: "Adapter not registered".to_string(),
            });
        }
        self.primary_backend = backend;
        Ok(())
    }

    pub fn primary_backend(&self) -> &str {
        &self.primary_backend
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn bounds(&self) -> GridBounds {
        self.bounds
    }

    /// Initialize all adapters
    pub async fn initialize(&mut self) -> Result<(), StorageError> {
        for (name, adapter) in &mut self.adapters {
            adapter.initialize().await.map_err(|e| StorageError::BackendError {
                backend: name.clone(),
                error: format!("Initialization failed: {}", e),
            })?;
        }
        tracing::info!(backend = %self.primary_backend, collection = %self.collection, "storage initialized");
        Ok(())
    }

    /// Look a template up by id; `None` when absent.
    pub async fn find(&self, id: i64, ctx: &StorageContext) -> Result<Option<PasswordDocument>, StorageError> {
        self.metrics.operations_total.fetch_add(1, Ordering::Relaxed);
        let result = self.primary()?.find_by_id(&self.collection, id, ctx).await;
        self.track(&result);
        result
    }

    /// Validate then insert-if-absent.
    pub async fn insert(&self, doc: &PasswordDocument, ctx: &StorageContext) -> Result<InsertOutcome, StorageError> {
        self.metrics.operations_total.fetch_add(1, Ordering::Relaxed);

        let validation = validate_document(doc, &self.bounds);
        if !validation.valid {
            self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::ValidationFailed { error: validation.summary() });
        }

        let result = self.primary()?.insert_if_absent(&self.collection, doc, ctx).await;
        self.track(&result);
        if let Ok(outcome) = &result {
            tracing::info!(id = doc.id, ?outcome, operation = %ctx.operation_id, "document insert");
        }
        result
    }

    /// Clear the collection and write the demo document.
    pub async fn seed_demo(&self, ctx: &StorageContext) -> Result<PasswordDocument, StorageError> {
        let removed = self.primary()?.delete_all(&self.collection, ctx).await?;
        println!("[StorageManager] Cleared {} documents from '{}'", removed, self.collection);

        let doc = PasswordDocument::demo();
        self.insert(&doc, ctx).await?;
        println!("[StorageManager] Seeded document {}", doc.id);
        Ok(doc)
    }

    /// Get storage statistics
    pub async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        self.primary()?.get_stats(&self.collection).await
    }

    pub fn metrics(&self) -> StorageMetricsSnapshot {
        StorageMetricsSnapshot {
            operations_total: self.metrics.operations_total.load(Ordering::Relaxed),
            errors_total: self.metrics.errors_total.load(Ordering::Relaxed),
        }
    }

    /// Health check all backends
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for (name, adapter) in &self.adapters {
            let healthy = adapter.health_check().await.is_ok();
            results.insert(name.clone(), healthy);
        }
        results
    }

    fn primary(&self) -> Result<&dyn StorageAdapter, StorageError> {
        self.adapters
            .get(&self.primary_backend)
            .map(|a| a.as_ref())
            .ok_or_else(|| StorageError::BackendError {
                backend: self.primary_backend.clone(),
                error: "Adapter not found".to_string(),
            })
    }

    fn track<T>(&self, result: &Result<T, StorageError>) {
        if let Err(e) = result {
            self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            tracing::error!(backend = %self.primary_backend, "storage operation failed: {}", e);
        }
    }
}
