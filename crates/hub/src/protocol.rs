// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire codec: inbound request parsing, outbound response and event packing.
//!
//! Responses are `{"data": ...}` or `{"error": ...}` envelopes; event pushes
//! are `{"<topic>": <body>}`. The `ping`/`pong` heartbeat is literal text and
//! bypasses the codec entirely.

use serde::{Deserialize, Serialize};
use tungstenite::Utf8Bytes;

/// Literal heartbeat frames.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// An inbound client request.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub streams: Vec<String>,
}

/// Parse an inbound frame into a request. Anything that is not a JSON object
/// with a `method` field is an error; the caller answers with `parse error`.
pub fn parse_request(frame: &[u8]) -> Result<Request, serde_json::Error> {
    serde_json::from_slice(frame)
}

/// Normalize an inbound text frame: newlines become spaces, then surrounding
/// whitespace is trimmed.
pub fn normalize(frame: &str) -> String {
    frame.replace('\n', " ").trim().to_owned()
}

#[derive(Debug, Serialize)]
struct Response<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

fn pack(response: &Response<'_>) -> Utf8Bytes {
    match serde_json::to_string(response) {
        Ok(json) => json.into(),
        Err(_) => "{}".into(),
    }
}

/// `{"error": "<message>"}`
pub fn error_response(message: &str) -> Utf8Bytes {
    pack(&Response { error: Some(message), data: None })
}

/// Aggregate acknowledgement for a subscribe/unsubscribe request:
/// `{"data":{"message":"subscribed","streams":[...]}}`.
pub fn ack(message: &str, streams: Vec<String>) -> Utf8Bytes {
    pack(&Response {
        error: None,
        data: Some(serde_json::json!({ "message": message, "streams": streams })),
    })
}

/// RBAC refusal for a single stream, sent before the aggregate ack.
pub fn refusal(stream: &str) -> Utf8Bytes {
    pack(&Response {
        error: None,
        data: Some(serde_json::json!({ "message": format!("cannot subscribe to {stream}") })),
    })
}

/// Wrap an upstream event body as `{"<topic>": <body>}`.
///
/// A body that is not valid JSON drops the event with a log line; the
/// subscriber sockets stay open.
pub fn pack_event(topic: &str, body: &[u8]) -> Option<Utf8Bytes> {
    let body: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(topic = %topic, err = %e, "dropping event with non-JSON body");
            return None;
        }
    };
    let mut wrapped = serde_json::Map::with_capacity(1);
    wrapped.insert(topic.to_owned(), body);
    match serde_json::to_string(&serde_json::Value::Object(wrapped)) {
        Ok(json) => Some(json.into()),
        Err(_) => None,
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
