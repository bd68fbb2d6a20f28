//! Cortex session lifecycle as an explicit state machine:
//! `Disconnected -> Authorized -> SessionOpen -> Subscribed`.
//!
//! `Disconnected` means "no cortex token yet"; the socket itself may be open.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::client::{ConnectOptions, CortexClient};
use super::rpc::StreamEvent;
use super::CortexError;
use crate::config_mod::CortexConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    Authorized,
    SessionOpen,
    Subscribed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Authorized => "authorized",
            SessionState::SessionOpen => "sessionOpen",
            SessionState::Subscribed => "subscribed",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub license: Option<String>,
    pub debit: u32,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("debit", &self.debit)
            .finish_non_exhaustive()
    }
}

impl From<&CortexConfig> for Credentials {
    fn from(cfg: &CortexConfig) -> Self {
        Self {
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            license: cfg.license.clone(),
            debit: cfg.debit,
        }
    }
}

/// A stream accepted by `subscribe`, with the column names of its frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSubscription {
    pub name: String,
    pub cols: Vec<String>,
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub state: SessionState,
    pub connected: bool,
    pub headset_id: Option<String>,
    pub session_id: Option<String>,
    pub streams: Vec<String>,
}

#[derive(Debug)]
pub struct CortexSession {
    client: CortexClient,
    credentials: Credentials,
    state: SessionState,
    token: Option<String>,
    headset_id: Option<String>,
    session_id: Option<String>,
    streams: Vec<StreamSubscription>,
}

impl CortexSession {
    pub fn new(client: CortexClient, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            state: SessionState::Disconnected,
            token: None,
            headset_id: None,
            session_id: None,
            streams: Vec::new(),
        }
    }

    /// Connect, authorize, find the headset and load the configured
    /// training profile, if any.
    pub async fn establish(config: &CortexConfig) -> Result<Self, CortexError> {
        let options = ConnectOptions {
            accept_invalid_certs: config.accept_invalid_certs,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        };
        let client = CortexClient::connect(&config.url, options).await?;
        let mut session = Self::new(client, Credentials::from(config));

        session.authorize().await?;
        session.query_headsets().await?;
        if let Some(profile) = &config.profile {
            session.load_training_profile(profile).await?;
        }
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn headset_id(&self) -> Option<&str> {
        self.headset_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn client(&self) -> &CortexClient {
        &self.client
    }

    pub fn stream_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.client.stream_events()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            state: self.state,
            connected: self.client.is_connected(),
            headset_id: self.headset_id.clone(),
            session_id: self.session_id.clone(),
            streams: self.streams.iter().map(|s| s.name.clone()).collect(),
        }
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), CortexError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CortexError::InvalidState { operation, state: self.state })
        }
    }

    fn token(&self) -> Result<&str, CortexError> {
        self.token.as_deref().ok_or(CortexError::InvalidState { operation: "token", state: self.state })
    }

    /// Ask the user (through the Emotiv launcher) to grant this app access.
    pub async fn request_access(&self) -> Result<bool, CortexError> {
        let result = self
            .client
            .call(
                "requestAccess",
                json!({ "clientId": self.credentials.client_id, "clientSecret": self.credentials.client_secret }),
            )
            .await?;
        Ok(result.get("accessGranted").and_then(Value::as_bool).unwrap_or(false))
    }

    pub async fn authorize(&mut self) -> Result<String, CortexError> {
        let mut params = json!({
            "clientId": self.credentials.client_id,
            "clientSecret": self.credentials.client_secret,
            "debit": self.credentials.debit,
        });
        if let Some(license) = &self.credentials.license {
            params["license"] = json!(license);
        }

        let result = self.client.call("authorize", params).await?;
        let token = result
            .get("cortexToken")
            .and_then(Value::as_str)
            .ok_or_else(|| CortexError::UnexpectedResponse {
                method: "authorize".to_string(),
                reason: "missing cortexToken".to_string(),
            })?
            .to_string();

        tracing::info!("cortex authorized");
        self.token = Some(token.clone());
        if self.state == SessionState::Disconnected {
            self.state = SessionState::Authorized;
        }
        Ok(token)
    }

    /// Id of the first headset Cortex reports.
    pub async fn query_headsets(&mut self) -> Result<String, CortexError> {
        let result = self.client.call("queryHeadsets", json!({})).await?;
        let id = result
            .as_array()
            .and_then(|list| list.first())
            .and_then(|hs| hs.get("id"))
            .and_then(Value::as_str)
            .ok_or(CortexError::HeadsetNotFound)?
            .to_string();

        tracing::info!(headset = %id, "headset detected");
        self.headset_id = Some(id.clone());
        Ok(id)
    }

    pub async fn create_session(&mut self) -> Result<String, CortexError> {
        self.require("createSession", &[SessionState::Authorized])?;
        let headset = match self.headset_id.clone() {
            Some(id) => id,
            None => self.query_headsets().await?,
        };

        let params = json!({ "cortexToken": self.token()?, "headset": headset, "status": "open" });
        let result = self.client.call("createSession", params).await?;
        let id = result
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CortexError::UnexpectedResponse {
                method: "createSession".to_string(),
                reason: "missing session id".to_string(),
            })?
            .to_string();

        tracing::debug!(session = %id, "cortex session opened");
        self.session_id = Some(id.clone());
        self.state = SessionState::SessionOpen;
        Ok(id)
    }

    /// Subscribe to `streams`; any reported failure or missing stream fails
    /// the whole call.
    pub async fn subscribe(&mut self, streams: &[&str]) -> Result<Vec<StreamSubscription>, CortexError> {
        self.require("subscribe", &[SessionState::SessionOpen, SessionState::Subscribed])?;
        let params = json!({ "cortexToken": self.token()?, "session": self.session_id, "streams": streams });
        let result = self.client.call("subscribe", params).await?;

        if let Some(failure) = result.get("failure").and_then(Value::as_array).and_then(|f| f.first()) {
            return Err(CortexError::SubscriptionFailed {
                stream: failure.get("streamName").and_then(Value::as_str).unwrap_or("?").to_string(),
                reason: failure.get("message").and_then(Value::as_str).unwrap_or("rejected").to_string(),
            });
        }

        let accepted: Vec<StreamSubscription> = result
            .get("success")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|s| {
                        let name = s.get("streamName")?.as_str()?.to_string();
                        let cols = s
                            .get("cols")
                            .and_then(Value::as_array)
                            .map(|c| c.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                            .unwrap_or_default();
                        Some(StreamSubscription { name, cols })
                    })
                    .collect()
            })
            .unwrap_or_default();

        for wanted in streams {
            if !accepted.iter().any(|s| s.name == *wanted) {
                return Err(CortexError::SubscriptionFailed {
                    stream: wanted.to_string(),
                    reason: "not in subscribe response".to_string(),
                });
            }
        }

        tracing::debug!(?streams, "subscribed");
        self.streams.retain(|s| !streams.contains(&s.name.as_str()));
        self.streams.extend(accepted.iter().cloned());
        self.state = SessionState::Subscribed;
        Ok(accepted)
    }

    pub async fn unsubscribe(&mut self, streams: &[&str]) -> Result<(), CortexError> {
        self.require("unsubscribe", &[SessionState::Subscribed])?;
        let params = json!({ "cortexToken": self.token()?, "session": self.session_id, "streams": streams });
        self.client.call("unsubscribe", params).await?;

        self.streams.retain(|s| !streams.contains(&s.name.as_str()));
        if self.streams.is_empty() {
            self.state = SessionState::SessionOpen;
        }
        tracing::debug!(?streams, "unsubscribed");
        Ok(())
    }

    /// Unsubscribe from everything, then mark the session closed. The local
    /// session is dropped even when Cortex rejects or ignores either call, and
    /// the first failure is returned afterwards.
    pub async fn close_session(&mut self) -> Result<(), CortexError> {
        self.require("closeSession", &[SessionState::SessionOpen, SessionState::Subscribed])?;
        let mut first_error = None;

        if self.state == SessionState::Subscribed {
            let names: Vec<String> = self.streams.iter().map(|s| s.name.clone()).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            if let Err(e) = self.unsubscribe(&refs).await {
                tracing::debug!("unsubscribe before close failed: {}", e);
                first_error = Some(e);
            }
        }

        let closed = match self.token() {
            Ok(token) => {
                let params = json!({ "cortexToken": token, "session": self.session_id, "status": "close" });
                self.client.call("updateSession", params).await.map(|_| ())
            }
            Err(e) => Err(e),
        };

        tracing::debug!(session = ?self.session_id, "cortex session closed");
        self.session_id = None;
        self.streams.clear();
        self.state = SessionState::Authorized;

        match (first_error, closed) {
            (Some(e), _) | (None, Err(e)) => Err(e),
            (None, Ok(())) => Ok(()),
        }
    }

    pub async fn query_profiles(&self) -> Result<Vec<String>, CortexError> {
        self.require("queryProfile", &[SessionState::Authorized, SessionState::SessionOpen, SessionState::Subscribed])?;
        let result = self.client.call("queryProfile", json!({ "cortexToken": self.token()? })).await?;
        Ok(result
            .as_array()
            .map(|list| list.iter().filter_map(|p| p.get("name")?.as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }

    /// Unload whatever profile the headset has, then load `name`.
    pub async fn load_profile(&mut self, name: &str) -> Result<(), CortexError> {
        self.require("setupProfile", &[SessionState::Authorized, SessionState::SessionOpen, SessionState::Subscribed])?;
        let headset = match self.headset_id.clone() {
            Some(id) => id,
            None => self.query_headsets().await?,
        };
        let token = self.token()?.to_string();

        let unload = json!({ "cortexToken": token, "headset": headset, "profile": "", "status": "unload" });
        if let Err(e) = self.client.call("setupProfile", unload).await {
            // Nothing loaded yet is reported as an error; carry on with the load.
            tracing::debug!("profile unload: {}", e);
        }

        let load = json!({ "cortexToken": token, "headset": headset, "profile": name, "status": "load" });
        self.client.call("setupProfile", load).await?;
        tracing::info!(profile = %name, "training profile loaded");
        Ok(())
    }

    pub async fn load_training_profile(&mut self, name: &str) -> Result<(), CortexError> {
        let profiles = self.query_profiles().await?;
        if profiles.is_empty() {
            return Err(CortexError::NoProfiles);
        }
        if !profiles.iter().any(|p| p == name) {
            return Err(CortexError::ProfileNotFound { name: name.to_string() });
        }
        self.load_profile(name).await
    }

    /// Close the socket; see `CortexClient::close`.
    pub async fn close(&mut self, force: bool) {
        self.client.close(force).await;
        self.token = None;
        self.session_id = None;
        self.streams.clear();
        self.state = SessionState::Disconnected;
    }
}
