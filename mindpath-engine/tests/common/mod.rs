// Mock Cortex service for integration tests: a plain ws:// JSON-RPC server
// that answers the methods the client uses and can push `com` frames.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
pub struct MockBehaviour {
    pub headsets: Value,
    pub subscribe: Value,
    pub profiles: Value,
    /// `(act, pow)` frames pushed after a successful subscribe.
    pub com_events: Vec<(String, f64)>,
    pub event_interval: Duration,
    /// Per-method response delay, letting responses arrive out of order.
    pub delays: HashMap<String, Duration>,
    /// Methods that never get a response.
    pub silent: Vec<String>,
}

impl Default for MockBehaviour {
    fn default() -> Self {
        Self {
            headsets: json!([{ "id": "INSIGHT-1234", "status": "connected" }]),
            subscribe: json!({
                "success": [{ "streamName": "com", "cols": ["act", "pow"], "sid": "session-1" }],
                "failure": []
            }),
            profiles: json!([{ "name": "trainer" }, { "name": "guest" }]),
            com_events: Vec::new(),
            event_interval: Duration::from_millis(5),
            delays: HashMap::new(),
            silent: Vec::new(),
        }
    }
}

pub struct MockCortex {
    pub url: String,
    pub requests: Arc<Mutex<Vec<Value>>>,
    handle: JoinHandle<()>,
}

impl MockCortex {
    pub async fn start(behaviour: MockBehaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let behaviour = behaviour.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                            serve(ws, behaviour, requests).await;
                        }
                    });
                }
            })
        };

        Self { url, requests, handle }
    }

    /// Method names in the order they were received.
    pub async fn methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .await
            .iter()
            .filter_map(|r| r["method"].as_str().map(str::to_string))
            .collect()
    }

    pub async fn params_of(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r["method"] == method)
            .map(|r| r["params"].clone())
            .collect()
    }
}

impl Drop for MockCortex {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    behaviour: MockBehaviour,
    requests: Arc<Mutex<Vec<Value>>>,
) {
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = source.next().await {
        let Message::Text(text) = msg else { continue };
        let request: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => continue,
        };
        requests.lock().await.push(request.clone());

        let method = request["method"].as_str().unwrap_or_default().to_string();
        if behaviour.silent.contains(&method) {
            continue;
        }

        let id = request["id"].clone();
        let response = match respond(&method, &request["params"], &behaviour) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } }),
        };

        let delay = behaviour.delays.get(&method).copied();
        let tx_reply = tx.clone();
        let subscribed_ok = method == "subscribe" && behaviour.subscribe["failure"].as_array().map_or(true, |f| f.is_empty());
        let events = behaviour.com_events.clone();
        let interval = behaviour.event_interval;

        tokio::spawn(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            let _ = tx_reply.send(response.to_string());
            if subscribed_ok {
                for (act, pow) in events {
                    tokio::time::sleep(interval).await;
                    let frame = json!({ "com": [act, pow], "sid": "session-1", "time": 1.0 });
                    let _ = tx_reply.send(frame.to_string());
                }
            }
        });
    }

    writer.abort();
}

fn respond(method: &str, params: &Value, behaviour: &MockBehaviour) -> Result<Value, (i64, String)> {
    match method {
        "authorize" => {
            if params["clientId"].as_str().unwrap_or_default().is_empty() {
                Err((-32021, "Invalid client credentials".to_string()))
            } else {
                Ok(json!({ "cortexToken": "mock-token" }))
            }
        }
        "requestAccess" => Ok(json!({ "accessGranted": true })),
        "queryHeadsets" => Ok(behaviour.headsets.clone()),
        "createSession" => Ok(json!({ "id": "session-1", "status": "opened" })),
        "subscribe" => Ok(behaviour.subscribe.clone()),
        "unsubscribe" => Ok(json!({ "success": [{ "streamName": "com" }], "failure": [] })),
        "updateSession" => Ok(json!({ "id": "session-1", "status": params["status"] })),
        "queryProfile" => Ok(behaviour.profiles.clone()),
        "setupProfile" => Ok(json!({ "action": params["status"], "name": params["profile"] })),
        _ => Err((-32601, "Method not found".to_string())),
    }
}
