//! Library root for the `mindpath` engine crate.
//!
//! Framework-agnostic: the binary owns the HTTP/WebSocket surface and hands
//! decoded frames to `state_mod::AppState`'s dispatcher.

pub mod async_orchestrator;
pub mod commands;
pub mod commands_cortex;
pub mod commands_password;
pub mod config_mod;
pub mod cortex;
pub mod event_dispatcher;
pub mod protocol;
pub mod state_mod;
pub mod storage;

pub use config_mod::AppConfig;
pub use state_mod::AppState;
