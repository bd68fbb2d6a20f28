// src/storage/mod.rs
// Storage module: password documents over memory and SQLite backends

pub mod sqlite_adapter;
pub mod storage_mod;
pub mod validation_mod;

pub use storage_mod::{
    InsertOutcome,
    MemoryAdapter,
    PasswordDocument,
    StorageAdapter,
    StorageContext,
    StorageError,
    StorageManager,
    StorageMetricsSnapshot,
    StorageStats,
};

pub use sqlite_adapter::SqliteAdapter;

pub use validation_mod::{document_from_value, validate_document, ValidationError, ValidationResult};
