//! stoker keeps a pool of long-lived PHP worker processes warm and routes
//! HTTP traffic to them over a length-prefixed JSON protocol on each
//! worker's stdin/stdout. Requests are classified fast or slow and served
//! by separate pools; responses can be buffered or streamed frame by
//! frame; workers recycle on age, failure, timeout, or on-disk code
//! change; realtime events fan out through an in-process pub/sub hub.

pub mod config;
pub mod error;
pub mod frame;
pub mod hot_reload;
pub mod hub;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod payload;
pub mod pool;
pub mod server;
pub mod static_files;
pub mod supervisor;
pub mod worker;

pub use error::WorkerError;
pub use payload::{RequestPayload, ResponsePayload, StreamFrame};
pub use supervisor::{Supervisor, SupervisorConfig};
