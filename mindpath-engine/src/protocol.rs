//! Browser socket protocol.
//!
//! Every WebSocket text frame is `{ "event": name, "data": payload }`.
//! Incoming frames are routed by name; outgoing frames are built from
//! `ServerEvent`.

use grid_engine::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config_mod::GridSettings;
use crate::storage::PasswordDocument;

pub mod events {
    pub const READY: &str = "ready";
    pub const CREATE: &str = "create";
    pub const VERIFY: &str = "verify";
    pub const INIT_CMD_BLOCK: &str = "initCmdBlock";
    pub const PING: &str = "ping";
}

/// A frame as it arrives from the browser, before its payload is typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self { event: event.into(), data }
    }
}

// ─── Client → Server payloads ───────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReadyRequest {
    #[serde(default)]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VerifyRequest {
    pub id: i64,
    pub moves: Vec<Direction>,
}

// ─── Server → Client ────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub block_id: u32,
    pub command: Option<String>,
    pub direction: Option<Direction>,
    pub power: f64,
    pub count: u32,
}

/// Board shape the browser builds its grid with. Field names match the
/// grid engine's options so the object can be passed straight through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridLayout {
    pub xpoints: i32,
    pub ypoints: i32,
    pub path_length: usize,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self::from(&GridSettings::default())
    }
}

impl From<&GridSettings> for GridLayout {
    fn from(settings: &GridSettings) -> Self {
        Self { xpoints: settings.xpoints, ypoints: settings.ypoints, path_length: settings.path_length }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "db_response")]
    DbResponse { template: Option<PasswordDocument>, grid: GridLayout },

    #[serde(rename = "create_success")]
    CreateSuccess { id: i64, inserted: bool },

    #[serde(rename = "verify_result")]
    VerifyResult { id: i64, matched: bool },

    #[serde(rename = "command")]
    Command(CommandPayload),

    #[serde(rename = "pong")]
    Pong {},

    #[serde(rename = "error")]
    Error { event: String, message: String },
}

impl ServerEvent {
    pub fn error(event: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error { event: event.to_string(), message: message.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::DbResponse { .. } => "db_response",
            ServerEvent::CreateSuccess { .. } => "create_success",
            ServerEvent::VerifyResult { .. } => "verify_result",
            ServerEvent::Command(_) => "command",
            ServerEvent::Pong {} => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_default_missing_data_to_null() {
        let frame: EventFrame = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(frame, EventFrame::new("ping", Value::Null));
    }

    #[test]
    fn server_events_use_socket_names() {
        let doc = PasswordDocument::demo();
        assert_eq!(
            serde_json::to_value(ServerEvent::DbResponse { template: Some(doc), grid: GridLayout::default() }).unwrap(),
            json!({"event": "db_response", "data": {
                "template": {"_id": 99, "start": [2, 2], "moves": ["left", "up", "right", "right"]},
                "grid": {"xpoints": 5, "ypoints": 5, "pathLength": 8}
            }})
        );
        let wide = GridLayout { xpoints: 7, ypoints: 6, path_length: 12 };
        assert_eq!(
            serde_json::to_value(ServerEvent::DbResponse { template: None, grid: wide }).unwrap(),
            json!({"event": "db_response", "data": {"template": null, "grid": {"xpoints": 7, "ypoints": 6, "pathLength": 12}}})
        );
        assert_eq!(serde_json::to_value(ServerEvent::Pong {}).unwrap(), json!({"event": "pong", "data": {}}));
    }

    #[test]
    fn command_payload_is_camel_case() {
        let ev = ServerEvent::Command(CommandPayload {
            block_id: 1,
            command: Some("push".to_string()),
            direction: Some(Direction::Up),
            power: 31.5,
            count: 4,
        });
        assert_eq!(
            serde_json::to_value(&ev).unwrap(),
            json!({"event": "command", "data": {"blockId": 1, "command": "push", "direction": "up", "power": 31.5, "count": 4}})
        );
        assert_eq!(ev.name(), "command");
    }

    #[test]
    fn verify_request_parses_directions() {
        let req: VerifyRequest = serde_json::from_value(json!({"id": 99, "moves": ["left", "up"]})).unwrap();
        assert_eq!(req.moves, vec![Direction::Left, Direction::Up]);
        assert!(serde_json::from_value::<VerifyRequest>(json!({"id": 99, "moves": ["north"]})).is_err());
    }
}
