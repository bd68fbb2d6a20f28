// src/async_orchestrator.rs
// Async Orchestrator - runs headset operations one at a time with a timeout

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

/// Exclusive-operation gateway. A request arriving while another operation
/// holds the slot is rejected as busy rather than queued.
#[derive(Debug, Clone)]
pub struct AsyncOrchestrator {
    active_operations: Arc<RwLock<HashMap<Uuid, ActiveOperation>>>,
    slots: Arc<Semaphore>,
    operation_metrics: Arc<RwLock<HashMap<String, OperationMetrics>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveOperation {
    pub operation_id: Uuid,
    pub operation_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub timed_out_executions: u64,
    pub rejected_busy: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Busy: {operation} is already running")]
    Busy { operation: String },

    #[error("Operation timeout: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{operation} failed: {message}")]
    OperationFailed { operation: String, message: String },
}

impl AsyncOrchestrator {
    /// `max_concurrent` is 1 for the headset: Cortex sessions cannot overlap.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            active_operations: Arc::new(RwLock::new(HashMap::new())),
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
            operation_metrics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Run `operation` if a slot is free, bounded by `timeout`.
    pub async fn run_exclusive<F, T, E>(&self, operation_name: &str, timeout: Duration, operation: F) -> Result<T, OrchestrationError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let _permit = match self.slots.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics_entry(operation_name, |m| m.rejected_busy += 1).await;
                tracing::warn!(operation = operation_name, "rejected: another headset operation is running");
                return Err(OrchestrationError::Busy { operation: self.busy_with().await.unwrap_or_else(|| operation_name.to_string()) });
            }
        };

        let operation_id = Uuid::new_v4();
        self.active_operations.write().await.insert(
            operation_id,
            ActiveOperation { operation_id, operation_name: operation_name.to_string(), started_at: chrono::Utc::now() },
        );

        let start = Instant::now();
        tracing::debug!(operation = operation_name, %operation_id, "operation started");
        let outcome = tokio::time::timeout(timeout, operation).await;
        let duration = start.elapsed();

        self.active_operations.write().await.remove(&operation_id);

        let (status, result) = match outcome {
            Ok(Ok(value)) => (OperationStatus::Completed, Ok(value)),
            Ok(Err(e)) => (
                OperationStatus::Failed,
                Err(OrchestrationError::OperationFailed { operation: operation_name.to_string(), message: e.to_string() }),
            ),
            Err(_) => (
                OperationStatus::TimedOut,
                Err(OrchestrationError::Timeout { operation: operation_name.to_string(), timeout_ms: timeout.as_millis() as u64 }),
            ),
        };

        self.record(operation_name, status, duration).await;
        tracing::info!(operation = operation_name, ?status, duration_ms = duration.as_millis() as u64, "operation finished");
        result
    }

    /// Whether an exclusive operation is running right now.
    pub fn is_busy(&self) -> bool {
        self.slots.available_permits() == 0
    }

    pub async fn get_active_operations(&self) -> Vec<ActiveOperation> {
        self.active_operations.read().await.values().cloned().collect()
    }

    pub async fn get_operation_stats(&self) -> HashMap<String, OperationMetrics> {
        self.operation_metrics.read().await.clone()
    }

    async fn busy_with(&self) -> Option<String> {
        self.active_operations.read().await.values().next().map(|op| op.operation_name.clone())
    }

    async fn record(&self, operation_name: &str, status: OperationStatus, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.metrics_entry(operation_name, |m| {
            m.total_executions += 1;
            match status {
                OperationStatus::Completed => m.successful_executions += 1,
                OperationStatus::Failed => m.failed_executions += 1,
                OperationStatus::TimedOut => m.timed_out_executions += 1,
            }
            let n = m.total_executions as f64;
            m.avg_duration_ms = (m.avg_duration_ms * (n - 1.0) + duration_ms as f64) / n;
            m.max_duration_ms = m.max_duration_ms.max(duration_ms);
        })
        .await;
    }

    async fn metrics_entry(&self, operation_name: &str, update: impl FnOnce(&mut OperationMetrics)) {
        let mut metrics = self.operation_metrics.write().await;
        update(metrics.entry(operation_name.to_string()).or_default());
    }
}

impl Default for AsyncOrchestrator {
    fn default() -> Self {
        Self::new(1)
    }
}
