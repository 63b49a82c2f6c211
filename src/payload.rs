//! Wire payloads exchanged with worker processes.
//!
//! Every message on the pipe is a length-prefixed UTF-8 JSON document (see
//! [`crate::frame`]). Three shapes exist: the request sent to the worker,
//! the buffered response, and the typed stream frame used when a response is
//! delivered incrementally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP request forwarded to a worker.
///
/// Header values keep their canonical names and per-name value order; the
/// body is carried as an opaque string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestPayload {
    #[serde(default)]
    pub id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
}

/// Buffered response from a worker. Headers are single-valued on this path;
/// responses that need repeated headers (Set-Cookie) use the stream form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl ResponsePayload {
    /// Workers may leave the status at zero; consumers treat that as 200.
    pub fn status_or_default(&self) -> u16 {
        if self.status == 0 {
            200
        } else {
            self.status
        }
    }
}

/// One or many values for a stream-frame header. Workers have emitted both
/// `"value"` and `["v1", "v2"]` over the protocol's lifetime, so decoding
/// accepts either.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl HeaderValues {
    pub fn as_list(&self) -> Vec<&str> {
        match self {
            HeaderValues::One(v) => vec![v.as_str()],
            HeaderValues::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            HeaderValues::One(_) => false,
            HeaderValues::Many(vs) => vs.is_empty(),
        }
    }
}

/// Frame tags understood on a streaming exchange.
pub const FRAME_HEADERS: &str = "headers";
pub const FRAME_CHUNK: &str = "chunk";
pub const FRAME_END: &str = "end";
pub const FRAME_ERROR: &str = "error";

/// One message of a streaming response.
///
/// The `type` tag selects which optional fields are meaningful: `headers`
/// carries status/headers and optional inline data, `chunk` carries data,
/// `end` carries nothing, `error` carries a message. The tag stays a plain
/// string so an unrecognized variant surfaces as such instead of as a
/// decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "status_is_zero")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, HeaderValues>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn status_is_zero(status: &u16) -> bool {
    *status == 0
}

impl StreamFrame {
    pub fn headers(status: u16, headers: HashMap<String, HeaderValues>) -> Self {
        StreamFrame {
            kind: FRAME_HEADERS.to_string(),
            status,
            headers,
            ..Default::default()
        }
    }

    pub fn chunk(data: impl Into<String>) -> Self {
        StreamFrame {
            kind: FRAME_CHUNK.to_string(),
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn end() -> Self {
        StreamFrame {
            kind: FRAME_END.to_string(),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamFrame {
            kind: FRAME_ERROR.to_string(),
            error: message.into(),
            ..Default::default()
        }
    }
}
