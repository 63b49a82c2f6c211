use super::request::{
    build_payload, header_value, query_param, route_path, STREAM_HEADER,
};
use super::response::{
    write_json, write_json_error, write_payload_response, write_worker_error, CollectingSink,
};
use crate::hub::EventHub;
use crate::metrics::Metrics;
use crate::payload::RequestPayload;
use crate::static_files::StaticFiles;
use crate::supervisor::Supervisor;
use may_minihttp::{HttpService, Request, Response};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long the SSE endpoint keeps a subscription open per request before
/// flushing the batch and letting the client reconnect.
const SSE_DRAIN_WINDOW: Duration = Duration::from_secs(1);

/// The HTTP frontend: static assets, control endpoints, the event hub
/// surface, and worker dispatch (buffered or streaming).
#[derive(Clone)]
pub struct AppService {
    pub supervisor: Arc<Supervisor>,
    pub hub: Arc<EventHub>,
    pub metrics: Arc<Metrics>,
    pub statics: Arc<StaticFiles>,
}

impl AppService {
    pub fn new(
        supervisor: Arc<Supervisor>,
        hub: Arc<EventHub>,
        metrics: Arc<Metrics>,
        statics: Arc<StaticFiles>,
    ) -> Self {
        Self {
            supervisor,
            hub,
            metrics,
            statics,
        }
    }

    fn serve_control(&self, payload: &RequestPayload, route: &str, res: &mut Response) -> bool {
        match route {
            "/__stoker/health" => {
                write_json(
                    res,
                    200,
                    serde_json::to_value(self.supervisor.health()).unwrap_or_default(),
                );
                true
            }
            "/__stoker/recycle" => {
                if payload.method != "POST" {
                    write_json_error(res, 405, "Method Not Allowed");
                    return true;
                }
                self.supervisor.force_recycle();
                write_json(
                    res,
                    200,
                    serde_json::json!({
                        "status": "ok",
                        "note": "all workers marked dead; they respawn on their next request",
                    }),
                );
                true
            }
            "/__stoker/metrics" => {
                write_json(
                    res,
                    200,
                    serde_json::to_value(self.metrics.snapshot()).unwrap_or_default(),
                );
                true
            }
            _ => false,
        }
    }

    fn serve_sse(&self, payload: &RequestPayload, res: &mut Response) {
        let Some(channel) = query_param(&payload.path, "channel").filter(|c| !c.is_empty()) else {
            write_json_error(res, 400, "missing channel");
            return;
        };

        let subscription = self.hub.subscribe(&channel);
        let mut body = String::from(": connected\n\n");

        let deadline = Instant::now() + SSE_DRAIN_WINDOW;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match subscription.recv_timeout(remaining) {
                Ok(event) => {
                    if !event.kind.is_empty() {
                        body.push_str("event: ");
                        body.push_str(&event.kind);
                        body.push('\n');
                    }
                    body.push_str("data: ");
                    body.push_str(&event.data.to_string());
                    body.push_str("\n\n");
                }
                Err(_) => break,
            }
        }
        self.hub.unsubscribe(&channel, &subscription);

        res.status_code(200, "OK");
        res.header("Content-Type: text/event-stream");
        res.header("Cache-Control: no-cache");
        res.body_vec(body.into_bytes());
    }

    fn serve_sse_publish(&self, payload: &RequestPayload, res: &mut Response) {
        if payload.method != "POST" {
            write_json_error(res, 405, "Method Not Allowed");
            return;
        }

        #[derive(serde::Deserialize)]
        struct PublishBody {
            channel: String,
            #[serde(default)]
            event: String,
            #[serde(default)]
            data: serde_json::Value,
        }

        let body: PublishBody = match serde_json::from_str(&payload.body) {
            Ok(b) => b,
            Err(_) => {
                write_json_error(res, 400, "invalid JSON");
                return;
            }
        };
        if body.channel.is_empty() {
            write_json_error(res, 400, "missing channel");
            return;
        }

        self.hub.publish(&body.channel, &body.event, &body.data);
        res.status_code(202, "Accepted");
        res.body_vec(Vec::new());
    }

    fn dispatch_streaming(&self, payload: &mut RequestPayload, route: &str, res: &mut Response) {
        let start = Instant::now();
        self.metrics.start_request(route);

        let mut sink = CollectingSink::new();
        match self.supervisor.dispatch_stream(payload, &mut sink) {
            Ok(()) => {
                let elapsed = start.elapsed();
                self.metrics.end_request(route, elapsed, false);
                self.supervisor.record_latency(&payload.path, elapsed);
                info!(
                    id = %payload.id,
                    method = %payload.method,
                    path = %payload.path,
                    status = sink.status(),
                    duration_ms = elapsed.as_millis() as u64,
                    "streamed"
                );
                sink.flush_into(res);
            }
            Err(e) => {
                let elapsed = start.elapsed();
                self.metrics.end_request(route, elapsed, true);
                warn!(
                    id = %payload.id,
                    method = %payload.method,
                    path = %payload.path,
                    error = %e,
                    "stream error"
                );
                write_worker_error(res, &e);
            }
        }
    }

    fn dispatch_buffered(&self, payload: &mut RequestPayload, route: &str, res: &mut Response) {
        let start = Instant::now();
        self.metrics.start_request(route);

        match self.supervisor.dispatch(payload) {
            Ok(resp) => {
                let elapsed = start.elapsed();

                // a 404 from the worker gives the static rules one more look
                if resp.status_or_default() == 404 {
                    if let Some((bytes, content_type)) =
                        self.statics.resolve(&payload.method, route)
                    {
                        self.metrics.end_request(route, elapsed, false);
                        serve_bytes(res, bytes, content_type);
                        return;
                    }
                }

                self.metrics.end_request(route, elapsed, false);
                self.supervisor.record_latency(&payload.path, elapsed);
                info!(
                    id = %payload.id,
                    method = %payload.method,
                    path = %payload.path,
                    status = resp.status_or_default(),
                    duration_ms = elapsed.as_millis() as u64,
                    "served"
                );
                write_payload_response(res, &resp);
            }
            Err(e) => {
                let elapsed = start.elapsed();
                self.metrics.end_request(route, elapsed, true);
                warn!(
                    id = %payload.id,
                    method = %payload.method,
                    path = %payload.path,
                    error = %e,
                    "worker error"
                );
                write_worker_error(res, &e);
            }
        }
    }
}

fn serve_bytes(res: &mut Response, bytes: Vec<u8>, content_type_header: &'static str) {
    res.status_code(200, "OK");
    res.header(content_type_header);
    res.body_vec(bytes);
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let mut payload = build_payload(req);
        let route = route_path(&payload.path).to_string();

        // static assets take the first look, before any worker is involved
        if let Some((bytes, content_type)) = self.statics.resolve(&payload.method, &route) {
            serve_bytes(res, bytes, content_type);
            return Ok(());
        }

        if self.serve_control(&payload, &route, res) {
            return Ok(());
        }

        if route == "/__sse" {
            self.serve_sse(&payload, res);
            return Ok(());
        }
        if route == "/__sse/publish" {
            self.serve_sse_publish(&payload, res);
            return Ok(());
        }

        // anything under /stream/ is forced onto the streaming exchange
        if route.starts_with("/stream/") {
            payload
                .headers
                .insert(STREAM_HEADER.to_string(), vec!["1".to_string()]);
        }

        if header_value(&payload, STREAM_HEADER) == Some("1") {
            self.dispatch_streaming(&mut payload, &route, res);
        } else {
            self.dispatch_buffered(&mut payload, &route, res);
        }
        Ok(())
    }
}
