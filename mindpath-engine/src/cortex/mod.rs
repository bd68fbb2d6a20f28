// src/cortex/mod.rs
// Emotiv Cortex client: JSON-RPC framing, socket transport, session
// lifecycle and command blocks over the mental-command stream.

pub mod client;
pub mod command_block;
pub mod rpc;
pub mod session;

pub use client::{ConnectOptions, CortexClient};
pub use command_block::{run_command_block, BlockOutcome, BlockParams, BlockTally, CommandTally, Decision};
pub use rpc::{Incoming, RpcRequest, StreamEvent};
pub use session::{CortexSession, Credentials, SessionInfo, SessionState, StreamSubscription};

#[derive(Debug, thiserror::Error)]
pub enum CortexError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("TLS setup failed: {reason}")]
    Tls { reason: String },

    #[error("Cortex socket is closed")]
    Disconnected,

    #[error("{method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("{method} failed ({code}): {message}")]
    Rpc { method: String, code: i64, message: String },

    #[error("Unexpected {method} response: {reason}")]
    UnexpectedResponse { method: String, reason: String },

    #[error("Headset not detected. Is it on and connected to Cortex?")]
    HeadsetNotFound,

    #[error("Cannot {operation} while {state}")]
    InvalidState { operation: &'static str, state: SessionState },

    #[error("Failed to subscribe to {stream}: {reason}")]
    SubscriptionFailed { stream: String, reason: String },

    #[error("No training profiles found")]
    NoProfiles,

    #[error("Training profile not found: {name}")]
    ProfileNotFound { name: String },

    #[error("Serialization error: {error}")]
    Serialization { error: String },
}
