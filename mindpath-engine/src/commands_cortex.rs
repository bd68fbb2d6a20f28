// src/commands_cortex.rs
// initCmdBlock: run one command block on the headset and report the command

use std::time::Duration;

use grid_engine::Direction;
use serde::Deserialize;

use crate::commands_password::payload_or_default;
use crate::cortex::{run_command_block, BlockOutcome, BlockParams, CortexError, CortexSession, SessionState};
use crate::event_dispatcher::{EventContext, EventError, EventHandler};
use crate::protocol::{events, CommandPayload, EventFrame, ServerEvent};
use crate::state_mod::AppState;

/// Client overrides; anything missing falls back to the configured block settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    pub block_id: Option<u32>,
    pub block_time: Option<u64>,
    pub threshold: Option<f64>,
}

impl BlockRequest {
    pub fn resolve(&self, app_state: &AppState) -> Result<BlockParams, EventError> {
        let settings = &app_state.config.block;
        let params = BlockParams {
            block_id: self.block_id.unwrap_or(1),
            block_time_ms: self.block_time.unwrap_or(settings.block_time_ms),
            threshold: self.threshold.unwrap_or(settings.threshold),
        };

        if params.block_time_ms == 0 || params.block_time_ms > settings.max_block_time_ms {
            return Err(EventError::ValidationError {
                field: "blockTime".to_string(),
                message: format!("must be between 1 and {}", settings.max_block_time_ms),
            });
        }
        if !params.threshold.is_finite() || params.threshold < 0.0 {
            return Err(EventError::ValidationError {
                field: "threshold".to_string(),
                message: "must be a non-negative number".to_string(),
            });
        }
        Ok(params)
    }
}

pub fn command_payload(outcome: &BlockOutcome) -> CommandPayload {
    match &outcome.decision {
        Some(d) => CommandPayload {
            block_id: outcome.block_id,
            command: Some(d.command.clone()),
            direction: Direction::from_mental_command(&d.command),
            power: d.power,
            count: d.count,
        },
        None => CommandPayload { block_id: outcome.block_id, command: None, direction: None, power: 0.0, count: 0 },
    }
}

/// Run a block through the orchestrator so only one touches the headset at a
/// time. Connects (or reconnects) lazily.
pub async fn execute_command_block(app_state: &AppState, params: BlockParams) -> Result<BlockOutcome, EventError> {
    let cortex_cfg = app_state.config.cortex.clone();
    if !cortex_cfg.enabled {
        return Err(EventError::HeadsetUnavailable { reason: "cortex is disabled in configuration".to_string() });
    }

    let timeout = Duration::from_millis(params.block_time_ms + 4 * cortex_cfg.request_timeout_ms);
    let headset = app_state.headset.clone();

    let outcome = app_state
        .async_orchestrator
        .run_exclusive("command_block", timeout, async move {
            let mut guard = headset.lock().await;
            if guard.as_ref().map_or(true, |s| !s.client().is_connected()) {
                *guard = Some(CortexSession::establish(&cortex_cfg).await?);
            }
            let session = guard.as_mut().ok_or(CortexError::Disconnected)?;

            // A block cut short by a timeout can leave its session open.
            if matches!(session.state(), SessionState::SessionOpen | SessionState::Subscribed) {
                if let Err(e) = session.close_session().await {
                    tracing::warn!("closing stale session: {}", e);
                }
            }

            let result = run_command_block(session, &params).await;
            if matches!(result, Err(CortexError::Disconnected)) {
                *guard = None;
            }
            result
        })
        .await?;

    Ok(outcome)
}

/// `initCmdBlock` → `command`
pub struct InitCmdBlockHandler;

#[async_trait::async_trait]
impl EventHandler for InitCmdBlockHandler {
    async fn handle(&self, frame: &EventFrame, _context: &EventContext, app_state: &AppState) -> Result<Vec<ServerEvent>, EventError> {
        let request: BlockRequest = payload_or_default(frame)?;
        let params = request.resolve(app_state)?;

        let outcome = execute_command_block(app_state, params).await?;
        Ok(vec![ServerEvent::Command(command_payload(&outcome))])
    }

    fn event_name(&self) -> &str {
        events::INIT_CMD_BLOCK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cortex::Decision;
    use std::collections::BTreeMap;

    #[test]
    fn payload_maps_command_to_direction() {
        let outcome = BlockOutcome {
            block_id: 3,
            decision: Some(Decision { command: "drop".to_string(), power: 31.0, count: 5 }),
            ended_early: true,
            events: 5,
            commands: BTreeMap::new(),
        };
        let payload = command_payload(&outcome);
        assert_eq!(payload.direction, Some(Direction::Down));
        assert_eq!(payload.block_id, 3);

        let neutral = BlockOutcome { decision: Some(Decision { command: "neutral".into(), power: 2.0, count: 9 }), ..outcome.clone() };
        assert_eq!(command_payload(&neutral).direction, None);

        let empty = BlockOutcome { decision: None, ..outcome };
        assert_eq!(command_payload(&empty).command, None);
        assert_eq!(command_payload(&empty).count, 0);
    }
}
