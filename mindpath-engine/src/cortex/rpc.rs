//! JSON-RPC 2.0 framing for the Cortex service and classification of the
//! frames it pushes back (responses, stream data, warnings).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0", method: method.into(), params, id }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A data frame from a subscribed stream, e.g.
/// `{"com": ["push", 0.42], "sid": "...", "time": 1559903137.1}`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub sid: String,
    pub stream: String,
    pub values: Vec<Value>,
    pub time: Option<f64>,
}

impl StreamEvent {
    /// Zip the values with the column names returned by `subscribe`.
    pub fn column(&self, cols: &[String], name: &str) -> Option<&Value> {
        cols.iter().position(|c| c == name).and_then(|i| self.values.get(i))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response { id: u64, result: Result<Value, RpcErrorObject> },
    Stream(StreamEvent),
    Warning { code: i64, message: Value },
    Unknown(Value),
}

/// Keys a stream frame carries besides its data column.
const STREAM_META: [&str; 2] = ["sid", "time"];

pub fn classify(frame: Value) -> Incoming {
    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        if let Some(err) = frame.get("error") {
            return match serde_json::from_value::<RpcErrorObject>(err.clone()) {
                Ok(e) => Incoming::Response { id, result: Err(e) },
                Err(_) => Incoming::Response {
                    id,
                    result: Err(RpcErrorObject { code: -1, message: err.to_string(), data: None }),
                },
            };
        }
        let result = frame.get("result").cloned().unwrap_or(Value::Null);
        return Incoming::Response { id, result: Ok(result) };
    }

    if let Some(warning) = frame.get("warning") {
        let code = warning.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = warning.get("message").cloned().unwrap_or(Value::Null);
        return Incoming::Warning { code, message };
    }

    if let (Some(sid), Some(obj)) = (frame.get("sid").and_then(Value::as_str), frame.as_object()) {
        let data = obj
            .iter()
            .find(|(k, v)| !STREAM_META.contains(&k.as_str()) && v.is_array());
        if let Some((stream, values)) = data {
            return Incoming::Stream(StreamEvent {
                sid: sid.to_string(),
                stream: stream.clone(),
                values: values.as_array().cloned().unwrap_or_default(),
                time: frame.get("time").and_then(Value::as_f64),
            });
        }
    }

    Incoming::Unknown(frame)
}
