//! Command blocks: listen to the mental-command (`com`) stream for a bounded
//! time and reduce it to a single command.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use super::rpc::StreamEvent;
use super::session::CortexSession;
use super::CortexError;

pub const COMMAND_STREAM: &str = "com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockParams {
    pub block_id: u32,
    #[serde(rename = "blockTime")]
    pub block_time_ms: u64,
    pub threshold: f64,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self { block_id: 1, block_time_ms: 8000, threshold: 30.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandTally {
    pub count: u32,
    pub power: f64,
}

/// The command a block settled on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub command: String,
    pub power: f64,
    pub count: u32,
}

/// Running per-command totals. Keeps first-seen order so ties go to the
/// command that appeared first.
#[derive(Debug, Clone)]
pub struct BlockTally {
    threshold: f64,
    commands: Vec<(String, CommandTally)>,
    events: u32,
}

impl BlockTally {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, commands: Vec::new(), events: 0 }
    }

    /// Add one event. Returns the decision once this command's total power
    /// exceeds the threshold.
    pub fn record(&mut self, act: &str, pow: f64) -> Option<Decision> {
        self.events += 1;
        let idx = match self.commands.iter().position(|(name, _)| name == act) {
            Some(i) => i,
            None => {
                self.commands.push((act.to_string(), CommandTally::default()));
                self.commands.len() - 1
            }
        };

        let (name, tally) = &mut self.commands[idx];
        tally.count += 1;
        tally.power += pow;

        (tally.power > self.threshold).then(|| Decision { command: name.clone(), power: tally.power, count: tally.count })
    }

    /// Highest total power; `None` when no events arrived.
    pub fn decide(&self) -> Option<Decision> {
        let mut best: Option<&(String, CommandTally)> = None;
        for entry in &self.commands {
            if best.map_or(true, |(_, b)| entry.1.power > b.power) {
                best = Some(entry);
            }
        }
        best.map(|(name, t)| Decision { command: name.clone(), power: t.power, count: t.count })
    }

    pub fn events(&self) -> u32 {
        self.events
    }

    pub fn snapshot(&self) -> BTreeMap<String, CommandTally> {
        self.commands.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOutcome {
    pub block_id: u32,
    pub decision: Option<Decision>,
    pub ended_early: bool,
    pub events: u32,
    pub commands: BTreeMap<String, CommandTally>,
}

/// Pull `(act, pow)` out of a `com` frame using the subscribed column names,
/// falling back to positions 0 and 1.
pub fn read_command<'a>(event: &'a StreamEvent, cols: &[String]) -> Option<(&'a str, f64)> {
    let act = event.column(cols, "act").or_else(|| event.values.first())?.as_str()?;
    let pow = event.column(cols, "pow").or_else(|| event.values.get(1)).and_then(Value::as_f64)?;
    Some((act, pow))
}

/// Open a session, subscribe to `com`, tally until the threshold is crossed or
/// the block time elapses, then unsubscribe and close the session.
pub async fn run_command_block(session: &mut CortexSession, params: &BlockParams) -> Result<BlockOutcome, CortexError> {
    session.create_session().await?;

    // Take the receiver before subscribing so the first frames are not lost.
    let mut events = session.stream_events();
    let subscriptions = match session.subscribe(&[COMMAND_STREAM]).await {
        Ok(subs) => subs,
        Err(e) => {
            if let Err(close_err) = session.close_session().await {
                tracing::warn!("closing session after failed subscribe: {}", close_err);
            }
            return Err(e);
        }
    };
    let cols = subscriptions
        .into_iter()
        .find(|s| s.name == COMMAND_STREAM)
        .map(|s| s.cols)
        .unwrap_or_default();

    tracing::info!(block = params.block_id, time_ms = params.block_time_ms, threshold = params.threshold, "command block started");

    let mut tally = BlockTally::new(params.threshold);
    let mut early = None;
    let deadline = tokio::time::sleep(Duration::from_millis(params.block_time_ms));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            received = events.recv() => match received {
                Ok(event) if event.stream == COMMAND_STREAM => {
                    let Some((act, pow)) = read_command(&event, &cols) else {
                        tracing::debug!(?event.values, "unreadable com frame");
                        continue;
                    };
                    tracing::trace!(act, pow, "mental command");
                    if let Some(decision) = tally.record(act, pow) {
                        early = Some(decision);
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "command block lagged behind the stream"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let ended_early = early.is_some();
    let decision = early.or_else(|| tally.decide());
    match &decision {
        Some(d) => tracing::info!(block = params.block_id, command = %d.command, power = d.power, ended_early, "command block ended"),
        None => tracing::info!(block = params.block_id, "command block ended without commands"),
    }

    if let Err(e) = session.close_session().await {
        tracing::warn!("command block cleanup failed: {}", e);
    }

    Ok(BlockOutcome {
        block_id: params.block_id,
        decision,
        ended_early,
        events: tally.events(),
        commands: tally.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ends_early_only_when_threshold_exceeded() {
        let mut tally = BlockTally::new(30.0);
        assert_eq!(tally.record("push", 20.0), None);
        assert_eq!(tally.record("left", 25.0), None);
        // Reaching the threshold exactly is not enough.
        assert_eq!(tally.record("push", 10.0), None);
        let d = tally.record("push", 0.5).unwrap();
        assert_eq!(d, Decision { command: "push".to_string(), power: 30.5, count: 3 });
    }

    #[test]
    fn timeout_picks_highest_total_power() {
        let mut tally = BlockTally::new(30.0);
        tally.record("neutral", 0.9);
        tally.record("left", 0.4);
        tally.record("left", 0.7);
        tally.record("neutral", 0.1);
        let d = tally.decide().unwrap();
        assert_eq!(d.command, "left");
        assert_eq!(d.count, 2);
        assert!((d.power - 1.1).abs() < 1e-9);
        assert_eq!(tally.events(), 4);
    }

    #[test]
    fn ties_go_to_first_seen() {
        let mut tally = BlockTally::new(30.0);
        tally.record("right", 1.0);
        tally.record("drop", 1.0);
        assert_eq!(tally.decide().unwrap().command, "right");
    }

    #[test]
    fn empty_block_has_no_decision() {
        assert_eq!(BlockTally::new(30.0).decide(), None);
    }

    #[test]
    fn reads_columns_by_name() {
        let event = StreamEvent { sid: "s".into(), stream: "com".into(), values: vec![json!(0.25), json!("lift")], time: None };
        let cols = vec!["pow".to_string(), "act".to_string()];
        assert_eq!(read_command(&event, &cols), Some(("lift", 0.25)));

        let positional = StreamEvent { sid: "s".into(), stream: "com".into(), values: vec![json!("drop"), json!(0.5)], time: None };
        assert_eq!(read_command(&positional, &[]), Some(("drop", 0.5)));
    }

    #[test]
    fn params_accept_partial_client_payload() {
        let p: BlockParams = serde_json::from_value(json!({"blockTime": 2000})).unwrap();
        assert_eq!(p, BlockParams { block_id: 1, block_time_ms: 2000, threshold: 30.0 });
    }
}
