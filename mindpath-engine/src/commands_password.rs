// src/commands_password.rs
// Password template events: ready (lookup), create (insert-if-absent), verify

use grid_engine::sequences_equal;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::event_dispatcher::{EventContext, EventError, EventHandler};
use crate::protocol::{events, EventFrame, GridLayout, ReadyRequest, ServerEvent, VerifyRequest};
use crate::state_mod::AppState;
use crate::storage::{document_from_value, StorageError};

/// Parse a payload, treating a missing/null payload as the type's default.
pub(crate) fn payload_or_default<T: DeserializeOwned + Default>(frame: &EventFrame) -> Result<T, EventError> {
    if frame.data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(frame.data.clone()).map_err(|e| EventError::invalid_payload(&frame.event, e))
}

/// `ready` → `db_response` with the requested (or default) template and the
/// board it is drawn on.
pub struct ReadyHandler;

#[async_trait::async_trait]
impl EventHandler for ReadyHandler {
    async fn handle(&self, frame: &EventFrame, context: &EventContext, app_state: &AppState) -> Result<Vec<ServerEvent>, EventError> {
        let request: ReadyRequest = payload_or_default(frame)?;
        let id = request.id.unwrap_or(app_state.config.storage.default_password_id);

        let template = app_state.storage.find(id, &context.storage_context()).await?;
        if template.is_none() {
            tracing::info!(id, "no template stored under this id");
        }
        Ok(vec![ServerEvent::DbResponse { template, grid: GridLayout::from(&app_state.config.grid) }])
    }

    fn event_name(&self) -> &str {
        events::READY
    }
}

/// `create` → `create_success`. An existing id is left untouched and
/// reported with `inserted: false`.
pub struct CreateHandler;

#[async_trait::async_trait]
impl EventHandler for CreateHandler {
    async fn handle(&self, frame: &EventFrame, context: &EventContext, app_state: &AppState) -> Result<Vec<ServerEvent>, EventError> {
        let doc = document_from_value(&frame.data).map_err(|e| EventError::invalid_payload(&frame.event, e))?;
        let outcome = app_state.storage.insert(&doc, &context.storage_context()).await?;
        Ok(vec![ServerEvent::CreateSuccess { id: doc.id, inserted: outcome.inserted() }])
    }

    fn event_name(&self) -> &str {
        events::CREATE
    }

    async fn validate(&self, frame: &EventFrame, _context: &EventContext) -> Result<(), EventError> {
        match &frame.data {
            Value::Object(_) => Ok(()),
            _ => Err(EventError::invalid_payload(&frame.event, "expected a document object")),
        }
    }
}

/// `verify` → `verify_result`: the entered moves against the stored template.
pub struct VerifyHandler;

#[async_trait::async_trait]
impl EventHandler for VerifyHandler {
    async fn handle(&self, frame: &EventFrame, context: &EventContext, app_state: &AppState) -> Result<Vec<ServerEvent>, EventError> {
        let request: VerifyRequest =
            serde_json::from_value(frame.data.clone()).map_err(|e| EventError::invalid_payload(&frame.event, e))?;

        let stored = app_state
            .storage
            .find(request.id, &context.storage_context())
            .await?
            .ok_or_else(|| StorageError::NotFound { key: format!("password {}", request.id) })?;

        let matched = sequences_equal(&stored.moves, &request.moves);
        tracing::info!(id = request.id, matched, "password verified");
        Ok(vec![ServerEvent::VerifyResult { id: request.id, matched }])
    }

    fn event_name(&self) -> &str {
        events::VERIFY
    }
}
