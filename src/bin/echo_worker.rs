//! Reference worker speaking the framed stdin/stdout protocol.
//!
//! Stands in for the PHP worker entrypoint during local development and
//! integration testing: buffered requests are echoed back, requests marked
//! with `X-Go-Stream: 1` get a streamed reply, and two diagnostic paths
//! exercise the failure handling (`/__frame/error` elicits an error frame,
//! `/__frame/hang` never replies).

use std::collections::HashMap;
use std::io::{self, Read, Write};
use stoker::frame;
use stoker::payload::{HeaderValues, RequestPayload, ResponsePayload, StreamFrame};

fn wants_stream(req: &RequestPayload) -> bool {
    req.headers
        .get("X-Go-Stream")
        .and_then(|v| v.first())
        .map(String::as_str)
        == Some("1")
}

fn send<W: Write>(out: &mut W, value: &impl serde::Serialize) -> io::Result<()> {
    let raw = serde_json::to_vec(value).map_err(io::Error::other)?;
    frame::write_frame(out, &raw).map_err(io::Error::other)
}

fn reply_stream<W: Write>(out: &mut W, req: &RequestPayload) -> io::Result<()> {
    if req.path.starts_with("/__frame/error") {
        let message = if req.body.is_empty() {
            "synthetic failure"
        } else {
            req.body.as_str()
        };
        return send(out, &StreamFrame::error(message));
    }

    let headers = HashMap::from([(
        "X-Echo-Stream".to_string(),
        HeaderValues::One("1".to_string()),
    )]);
    send(out, &StreamFrame::headers(200, headers))?;

    if req.body.is_empty() {
        send(out, &StreamFrame::chunk(format!("echo:{}:{}", req.method, req.path)))?;
    } else {
        for token in req.body.split_whitespace() {
            send(out, &StreamFrame::chunk(token))?;
        }
    }
    send(out, &StreamFrame::end())
}

fn reply_buffered<W: Write>(out: &mut W, req: &RequestPayload) -> io::Result<()> {
    let mut body = format!("echo:{}:{}", req.method, req.path);
    if !req.body.is_empty() {
        body.push(':');
        body.push_str(&req.body);
    }
    let resp = ResponsePayload {
        id: req.id.clone(),
        status: 200,
        headers: HashMap::from([(
            "X-Echo-Pid".to_string(),
            std::process::id().to_string(),
        )]),
        body,
    };
    send(out, &resp)
}

fn serve<R: Read, W: Write>(input: &mut R, out: &mut W) -> io::Result<()> {
    loop {
        let payload = match frame::read_frame(input) {
            Ok(p) => p,
            Err(_) => return Ok(()), // host closed the pipe
        };
        let req: RequestPayload = match serde_json::from_slice(&payload) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("echo-worker: bad request payload: {e}");
                return Ok(());
            }
        };

        if req.path.starts_with("/__frame/hang") {
            // swallow the request and wait for the next one (or the kill)
            continue;
        }

        if wants_stream(&req) {
            reply_stream(out, &req)?;
        } else {
            reply_buffered(out, &req)?;
        }
    }
}

fn main() -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(&mut stdin.lock(), &mut stdout.lock())
}
