//! # Server Module
//!
//! The HTTP frontend, built on `may_minihttp` under the `may` coroutine
//! runtime. Each request is translated into a worker payload and handed to
//! the supervisor; the response (buffered or streamed) is written back out.
//!
//! Besides worker dispatch the service exposes:
//! - static assets under the configured prefix rules,
//! - `GET /__stoker/health`, `POST /__stoker/recycle`,
//!   `GET /__stoker/metrics` control endpoints,
//! - the event hub over `GET /__sse?channel=...` and
//!   `POST /__sse/publish`,
//! - forced streaming for everything under `/stream/`.
//!
//! Worker errors map to gateway statuses here and nowhere else: timeout →
//! 504, dead pipe → 502, anything else → 500.

mod http_server;
mod request;
mod response;
mod service;

pub use self::http_server::{HttpServer, ServerHandle};
pub use self::request::{
    build_payload, canonical_header_name, header_value, payload_from_parts, query_param,
    route_path, HOST_HEADER, REQUEST_ID_HEADER, STREAM_HEADER,
};
pub use self::response::{
    worker_error_status, write_payload_response, write_worker_error, CollectingSink,
};
pub use self::service::AppService;
