// src/commands.rs
// System commands: ping and the status report behind GET /status

use serde_json::Value;

use crate::event_dispatcher::{EventContext, EventError, EventHandler};
use crate::protocol::{events, EventFrame, ServerEvent};
use crate::state_mod::AppState;

/// Get overall system status as JSON. Engine-level so the HTTP layer only
/// has to serve the value.
pub async fn get_system_status(state: &AppState) -> Result<Value, String> {
    let status = state.get_system_status().await;
    serde_json::to_value(status).map_err(|e| e.to_string())
}

/// `ping` → `pong`
pub struct PingHandler;

#[async_trait::async_trait]
impl EventHandler for PingHandler {
    async fn handle(&self, _frame: &EventFrame, _context: &EventContext, _app_state: &AppState) -> Result<Vec<ServerEvent>, EventError> {
        Ok(vec![ServerEvent::Pong {}])
    }

    fn event_name(&self) -> &str {
        events::PING
    }
}
