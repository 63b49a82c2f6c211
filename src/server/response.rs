use crate::error::WorkerError;
use crate::payload::ResponsePayload;
use crate::worker::StreamSink;
use may_minihttp::Response;
use serde_json::Value;
use std::io;
use tracing::error;

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "OK",
    }
}

/// Set a header whose name or value is not static. may_minihttp keeps
/// header lines for the response lifetime and only accepts `&'static str`,
/// so per-request header lines are leaked.
fn dynamic_header(res: &mut Response, name: &str, value: &str) {
    res.header(Box::leak(format!("{name}: {value}").into_boxed_str()));
}

/// Write a buffered worker response out to the client. A zero status from
/// the worker means 200.
pub fn write_payload_response(res: &mut Response, payload: &ResponsePayload) {
    let status = payload.status_or_default();
    res.status_code(status as usize, status_reason(status));
    for (name, value) in &payload.headers {
        dynamic_header(res, name, value);
    }
    res.body_vec(payload.body.clone().into_bytes());
}

pub fn write_json(res: &mut Response, status: u16, body: Value) {
    res.status_code(status as usize, status_reason(status));
    res.header("Content-Type: application/json");
    res.body_vec(body.to_string().into_bytes());
}

pub fn write_json_error(res: &mut Response, status: u16, message: &str) {
    write_json(res, status, serde_json::json!({ "error": message }));
}

/// Status-code mapping for worker failures: timeouts are a gateway
/// timeout, dead pipes are a bad gateway, everything else is internal.
pub fn worker_error_status(err: &WorkerError) -> u16 {
    if err.is_timeout() {
        504
    } else if err.is_broken_pipe() {
        502
    } else {
        500
    }
}

pub fn write_worker_error(res: &mut Response, err: &WorkerError) {
    let status = worker_error_status(err);
    error!(status, error = %err, "worker error");
    write_json_error(res, status, status_reason(status));
}

/// Stream sink that accumulates status, headers, and body, then writes the
/// whole response at once. The HTTP layer buffers complete responses, so
/// "streaming" to a client degrades to a single flush at end-of-stream;
/// the worker-side protocol is still fully incremental.
#[derive(Default)]
pub struct CollectingSink {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    pub fn flush_into(self, res: &mut Response) {
        let status = self.status();
        res.status_code(status as usize, status_reason(status));
        for (name, value) in &self.headers {
            dynamic_header(res, name, value);
        }
        res.body_vec(self.body);
    }
}

impl StreamSink for CollectingSink {
    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn append_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn write_head(&mut self, status: u16) -> io::Result<()> {
        self.status = Some(status);
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(data);
        Ok(())
    }
}
