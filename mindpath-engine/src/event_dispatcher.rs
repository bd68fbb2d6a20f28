// src/event_dispatcher.rs
// Event Dispatcher - routes browser socket events to their handlers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::async_orchestrator::OrchestrationError;
use crate::cortex::CortexError;
use crate::protocol::{EventFrame, ServerEvent};
use crate::state_mod::AppState;
use crate::storage::StorageError;

pub struct EventDispatcher {
    // Event handler registry, keyed by event name
    handlers: Arc<RwLock<HashMap<String, Box<dyn EventHandler>>>>,

    middleware_stack: Arc<RwLock<Vec<Box<dyn EventMiddleware>>>>,

    event_performance: Arc<RwLock<HashMap<String, EventPerformanceStats>>>,

    max_payload_size: usize,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers_count", &self.handlers.try_read().map(|h| h.len()).unwrap_or(0))
            .field("middleware_count", &self.middleware_stack.try_read().map(|m| m.len()).unwrap_or(0))
            .finish()
    }
}

/// Per-connection context handed to handlers and middleware
#[derive(Debug, Clone)]
pub struct EventContext {
    pub connection_id: Uuid,
    pub event_id: Uuid,
    pub peer: Option<String>,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl EventContext {
    pub fn new(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            event_id: Uuid::new_v4(),
            peer: None,
            received_at: chrono::Utc::now(),
        }
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    pub fn storage_context(&self) -> crate::storage::StorageContext {
        crate::storage::StorageContext { connection_id: self.connection_id, operation_id: self.event_id }
    }
}

/// Event handler trait
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one frame, returning the frames to send back to the client
    async fn handle(
        &self,
        frame: &EventFrame,
        context: &EventContext,
        app_state: &AppState,
    ) -> Result<Vec<ServerEvent>, EventError>;

    /// The event name this handler serves
    fn event_name(&self) -> &str;

    /// Validate the frame before handling
    async fn validate(&self, frame: &EventFrame, _context: &EventContext) -> Result<(), EventError> {
        if frame.event.is_empty() {
            return Err(EventError::ValidationError {
                field: "event".to_string(),
                message: "Event name cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Event middleware trait
#[async_trait::async_trait]
pub trait EventMiddleware: Send + Sync {
    async fn before_dispatch(&self, _frame: &mut EventFrame, _context: &EventContext) -> Result<(), EventError> {
        Ok(())
    }

    async fn after_dispatch(
        &self,
        _frame: &EventFrame,
        _result: &mut DispatchResult,
        _context: &EventContext,
    ) -> Result<(), EventError> {
        Ok(())
    }

    /// Lower numbers execute first
    fn priority(&self) -> u32 {
        100
    }

    fn name(&self) -> &str;
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub replies: Vec<ServerEvent>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub middleware_executed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPerformanceStats {
    pub total_executions: u64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
    pub last_execution: chrono::DateTime<chrono::Utc>,
    pub slowest_execution_ms: u64,
    pub fastest_execution_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("No handler for event: {event}")]
    HandlerNotFound { event: String },

    #[error("Validation error in field '{field}': {message}")]
    ValidationError { field: String, message: String },

    #[error("Invalid {event} payload: {message}")]
    InvalidPayload { event: String, message: String },

    #[error("Headset unavailable: {reason}")]
    HeadsetUnavailable { reason: String },

    #[error("Middleware error: {middleware} - {message}")]
    MiddlewareError { middleware: String, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cortex(#[from] CortexError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
}

impl EventError {
    pub fn invalid_payload(event: &str, message: impl std::fmt::Display) -> Self {
        EventError::InvalidPayload { event: event.to_string(), message: message.to_string() }
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            middleware_stack: Arc::new(RwLock::new(Vec::new())),
            event_performance: Arc::new(RwLock::new(HashMap::new())),
            max_payload_size: 64 * 1024,
        }
    }

    /// Dispatch one frame. Handler failures are reported in the result;
    /// only validation, routing and middleware failures are returned as `Err`.
    pub async fn dispatch(
        &self,
        frame: EventFrame,
        context: EventContext,
        app_state: &AppState,
    ) -> Result<DispatchResult, EventError> {
        let start_time = std::time::Instant::now();
        tracing::debug!(event = %frame.event, connection = %context.connection_id, "dispatching event");

        self.check_payload_size(&frame)?;

        let mut frame = frame;
        {
            let middleware = self.middleware_stack.read().await;
            for middleware in middleware.iter() {
                middleware.before_dispatch(&mut frame, &context).await?;
            }
        }

        let handlers = self.handlers.read().await;
        let handler = handlers.get(&frame.event).ok_or_else(|| EventError::HandlerNotFound {
            event: frame.event.clone(),
        })?;

        handler.validate(&frame, &context).await?;
        let outcome = handler.handle(&frame, &context, app_state).await;
        drop(handlers);

        let mut result = match outcome {
            Ok(replies) => DispatchResult {
                success: true,
                replies,
                error: None,
                execution_time_ms: 0,
                middleware_executed: Vec::new(),
            },
            Err(error) => {
                tracing::error!(event = %frame.event, connection = %context.connection_id, "handler failed: {}", error);
                DispatchResult {
                    success: false,
                    replies: vec![ServerEvent::error(&frame.event, error.to_string())],
                    error: Some(error.to_string()),
                    execution_time_ms: 0,
                    middleware_executed: Vec::new(),
                }
            }
        };

        {
            let middleware = self.middleware_stack.read().await;
            for middleware in middleware.iter() {
                middleware.after_dispatch(&frame, &mut result, &context).await?;
            }
        }

        result.execution_time_ms = start_time.elapsed().as_millis() as u64;
        self.update_event_performance(&frame.event, start_time.elapsed(), result.success).await;

        Ok(result)
    }

    /// Dispatch and always produce frames for the client: routing errors
    /// become an `error` frame too.
    pub async fn dispatch_to_replies(&self, frame: EventFrame, context: EventContext, app_state: &AppState) -> Vec<ServerEvent> {
        let event = frame.event.clone();
        match self.dispatch(frame, context, app_state).await {
            Ok(result) => result.replies,
            Err(e) => {
                tracing::warn!(%event, "event rejected: {}", e);
                vec![ServerEvent::error(&event, e.to_string())]
            }
        }
    }

    pub async fn register_handler<H>(&self, handler: H)
    where
        H: EventHandler + 'static,
    {
        let name = handler.event_name().to_string();
        let mut handlers = self.handlers.write().await;
        handlers.insert(name, Box::new(handler));
    }

    pub async fn add_middleware<M>(&self, middleware: M)
    where
        M: EventMiddleware + 'static,
    {
        let mut stack = self.middleware_stack.write().await;
        stack.push(Box::new(middleware));
        stack.sort_by_key(|m| m.priority());
    }

    pub async fn get_event_stats(&self) -> HashMap<String, EventPerformanceStats> {
        self.event_performance.read().await.clone()
    }

    pub async fn get_registered_events(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn check_payload_size(&self, frame: &EventFrame) -> Result<(), EventError> {
        let size = serde_json::to_string(&frame.data).map(|s| s.len()).unwrap_or(usize::MAX);
        if size > self.max_payload_size {
            return Err(EventError::ValidationError {
                field: "data".to_string(),
                message: format!("Payload too large: {} bytes (max: {})", size, self.max_payload_size),
            });
        }
        Ok(())
    }

    async fn update_event_performance(&self, event: &str, execution_time: std::time::Duration, success: bool) {
        let mut stats = self.event_performance.write().await;
        let duration_ms = execution_time.as_millis() as u64;

        let entry = stats.entry(event.to_string()).or_insert(EventPerformanceStats {
            total_executions: 0,
            avg_duration_ms: 0.0,
            success_rate: 100.0,
            last_execution: chrono::Utc::now(),
            slowest_execution_ms: 0,
            fastest_execution_ms: u64::MAX,
        });

        entry.total_executions += 1;
        entry.last_execution = chrono::Utc::now();

        let n = entry.total_executions as f64;
        entry.avg_duration_ms = (entry.avg_duration_ms * (n - 1.0) + duration_ms as f64) / n;

        let successes = entry.success_rate * (n - 1.0) / 100.0 + if success { 1.0 } else { 0.0 };
        entry.success_rate = successes / n * 100.0;

        entry.slowest_execution_ms = entry.slowest_execution_ms.max(duration_ms);
        entry.fastest_execution_ms = entry.fastest_execution_ms.min(duration_ms);
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every event with its outcome and timing
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl EventMiddleware for LoggingMiddleware {
    async fn before_dispatch(&self, frame: &mut EventFrame, context: &EventContext) -> Result<(), EventError> {
        tracing::info!(event = %frame.event, connection = %context.connection_id, "event received");
        Ok(())
    }

    async fn after_dispatch(
        &self,
        frame: &EventFrame,
        result: &mut DispatchResult,
        context: &EventContext,
    ) -> Result<(), EventError> {
        let elapsed_ms = (chrono::Utc::now() - context.received_at).num_milliseconds();
        tracing::info!(
            event = %frame.event,
            success = result.success,
            replies = result.replies.len(),
            elapsed_ms,
            "event handled"
        );
        result.middleware_executed.push(self.name().to_string());
        Ok(())
    }

    fn priority(&self) -> u32 {
        10
    }

    fn name(&self) -> &str {
        "LoggingMiddleware"
    }
}
