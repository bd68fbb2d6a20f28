// src/state_mod.rs
// Application State - storage, event routing, headset session and the
// bookkeeping shared by every browser connection

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::async_orchestrator::{AsyncOrchestrator, OperationMetrics};
use crate::config_mod::{AppConfig, ConfigError};
use crate::cortex::{CortexError, CortexSession, SessionInfo};
use crate::event_dispatcher::{EventDispatcher, EventPerformanceStats, LoggingMiddleware};
use crate::storage::{StorageContext, StorageError, StorageManager, StorageMetricsSnapshot, StorageStats};

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<StorageManager>,
    pub event_dispatcher: Arc<EventDispatcher>,
    pub async_orchestrator: Arc<AsyncOrchestrator>,

    /// `None` until the first successful connect, and again after the socket drops.
    pub headset: Arc<Mutex<Option<CortexSession>>>,

    pub connections: Arc<RwLock<HashMap<Uuid, ConnectionInfo>>>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub peer: Option<String>,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStatus {
    pub backend: String,
    pub collection: String,
    pub healthy: HashMap<String, bool>,
    pub stats: Option<StorageStats>,
    pub metrics: StorageMetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeadsetStatus {
    pub enabled: bool,
    pub busy: bool,
    pub session: Option<SessionInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub app_name: String,
    pub version: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: i64,
    pub connections: usize,
    pub storage: StorageStatus,
    pub headset: HeadsetStatus,
    pub events: HashMap<String, EventPerformanceStats>,
    pub operations: HashMap<String, OperationMetrics>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppStateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Headset error: {0}")]
    Cortex(#[from] CortexError),

    #[error("Initialization failed: {reason}")]
    InitializationFailed { reason: String },
}

impl AppState {
    /// Build and initialize storage, then register the socket event handlers.
    pub async fn new(config: AppConfig) -> Result<Self, AppStateError> {
        config.validate()?;
        let bounds = config.grid.bounds().map_err(ConfigError::from)?;

        let mut storage = StorageManager::from_settings(&config.storage, bounds)?;
        storage.initialize().await?;
        if config.storage.seed_on_start {
            storage.seed_demo(&StorageContext::system()).await?;
        }

        let event_dispatcher = Arc::new(EventDispatcher::new());
        register_default_handlers(&event_dispatcher).await;

        Ok(Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            event_dispatcher,
            async_orchestrator: Arc::new(AsyncOrchestrator::new(1)),
            headset: Arc::new(Mutex::new(None)),
            connections: Arc::new(RwLock::new(HashMap::new())),
            started_at: chrono::Utc::now(),
        })
    }

    /// Connect and authorize against Cortex up front. Failing here is not
    /// fatal: command blocks retry the connection on demand.
    pub async fn connect_headset(&self) -> Result<(), AppStateError> {
        if !self.config.cortex.enabled {
            tracing::info!("cortex disabled; command blocks will be rejected");
            return Ok(());
        }
        let session = CortexSession::establish(&self.config.cortex).await?;
        *self.headset.lock().await = Some(session);
        Ok(())
    }

    pub async fn register_connection(&self, connection_id: Uuid, peer: Option<String>) {
        let info = ConnectionInfo { connection_id, peer, connected_at: chrono::Utc::now() };
        self.connections.write().await.insert(connection_id, info);
        tracing::info!(%connection_id, "client connected");
    }

    pub async fn unregister_connection(&self, connection_id: Uuid) {
        self.connections.write().await.remove(&connection_id);
        tracing::info!(%connection_id, "client disconnected");
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let now = chrono::Utc::now();
        let session = match self.headset.try_lock() {
            Ok(guard) => guard.as_ref().map(CortexSession::info),
            // Held by a running command block.
            Err(_) => None,
        };

        SystemStatus {
            app_name: "MindPath".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at,
            uptime_seconds: (now - self.started_at).num_seconds(),
            connections: self.connections.read().await.len(),
            storage: StorageStatus {
                backend: self.storage.primary_backend().to_string(),
                collection: self.storage.collection().to_string(),
                healthy: self.storage.health_check().await,
                stats: self.storage.get_stats().await.ok(),
                metrics: self.storage.metrics(),
            },
            headset: HeadsetStatus {
                enabled: self.config.cortex.enabled,
                busy: self.async_orchestrator.is_busy(),
                session,
            },
            events: self.event_dispatcher.get_event_stats().await,
            operations: self.async_orchestrator.get_operation_stats().await,
        }
    }

    /// Close any open Cortex session and the socket.
    pub async fn shutdown(&self) {
        let mut guard = self.headset.lock().await;
        if let Some(session) = guard.as_mut() {
            if let Err(e) = session.close_session().await {
                tracing::debug!("no session to close on shutdown: {}", e);
            }
            session.close(false).await;
        }
        *guard = None;
    }
}

/// Handlers every server starts with.
pub async fn register_default_handlers(dispatcher: &EventDispatcher) {
    dispatcher.register_handler(crate::commands_password::ReadyHandler).await;
    dispatcher.register_handler(crate::commands_password::CreateHandler).await;
    dispatcher.register_handler(crate::commands_password::VerifyHandler).await;
    dispatcher.register_handler(crate::commands_cortex::InitCmdBlockHandler).await;
    dispatcher.register_handler(crate::commands::PingHandler).await;
    dispatcher.add_middleware(LoggingMiddleware).await;
}
