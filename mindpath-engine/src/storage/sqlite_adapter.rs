use crate::storage::{InsertOutcome, PasswordDocument, StorageAdapter, StorageContext, StorageError, StorageStats};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        id INTEGER NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        PRIMARY KEY (collection, id)
    );
"#;

/// SQLite-backed adapter using `sqlx`. Documents are stored as JSON bodies
/// keyed by `(collection, id)`.
pub struct SqliteAdapter {
    pub pool: Option<SqlitePool>,
    pub db_path: String,
}

impl SqliteAdapter {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self { pool: None, db_path: db_path.into() }
    }

    fn pool(&self) -> Result<&SqlitePool, StorageError> {
        self.pool.as_ref().ok_or(StorageError::DatabaseUnavailable { reason: "pool not initialized".to_string() })
    }
}

fn backend_error(what: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::BackendError { backend: "sqlite".to_string(), error: format!("{}: {}", what, e) }
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    async fn initialize(&mut self) -> Result<(), StorageError> {
        // Ensure parent directory exists
        let db_path_buf = std::path::PathBuf::from(&self.db_path);
        if let Some(parent) = db_path_buf.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| backend_error("Failed to create db dir", e))?;
            }
        }

        let options = SqliteConnectOptions::new().filename(&db_path_buf).create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| backend_error("Failed to connect", e))?;

        sqlx::query(SCHEMA).execute(&pool).await.map_err(|e| backend_error("Failed to create documents table", e))?;

        tracing::debug!(path = %self.db_path, "sqlite adapter ready");
        self.pool = Some(pool);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(self.pool()?).await.map_err(|e| backend_error("health check failed", e))?;
        Ok(())
    }

    async fn find_by_id(&self, collection: &str, id: i64, _ctx: &StorageContext) -> Result<Option<PasswordDocument>, StorageError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(self.pool()?)
            .await
            .map_err(|e| backend_error("query failed", e))?;

        match row {
            Some(r) => {
                let body: String = r.get(0);
                serde_json::from_str::<PasswordDocument>(&body)
                    .map(Some)
                    .map_err(|e| StorageError::SerializationError { error: format!("document {} is corrupt: {}", id, e) })
            }
            None => Ok(None),
        }
    }

    async fn insert_if_absent(&self, collection: &str, doc: &PasswordDocument, _ctx: &StorageContext) -> Result<InsertOutcome, StorageError> {
        let body = serde_json::to_string(doc).map_err(|e| StorageError::SerializationError { error: format!("serialize failed: {}", e) })?;
        let result = sqlx::query("INSERT INTO documents(collection, id, body) VALUES (?, ?, ?) ON CONFLICT(collection, id) DO NOTHING")
            .bind(collection)
            .bind(doc.id)
            .bind(body)
            .execute(self.pool()?)
            .await
            .map_err(|e| backend_error("insert failed", e))?;

        Ok(if result.rows_affected() == 1 { InsertOutcome::Inserted } else { InsertOutcome::AlreadyExists })
    }

    async fn delete_all(&self, collection: &str, _ctx: &StorageContext) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(collection)
            .execute(self.pool()?)
            .await
            .map_err(|e| backend_error("delete failed", e))?;
        Ok(result.rows_affected())
    }

    async fn get_stats(&self, collection: &str) -> Result<StorageStats, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(self.pool()?)
            .await
            .map_err(|e| backend_error("stats query failed", e))?;
        let c: i64 = row.get::<i64, _>(0);
        Ok(StorageStats { backend: "sqlite".to_string(), collection: collection.to_string(), total_documents: c as u64 })
    }
}
