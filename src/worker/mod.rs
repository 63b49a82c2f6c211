//! # Worker Module
//!
//! One [`Worker`] owns one long-lived child process (normally a PHP
//! interpreter running the worker entrypoint) and both of its pipes, and
//! exchanges length-prefixed JSON messages with it. All I/O on the pipes is
//! serialized through the worker's exchange lock; liveness is a lock-free
//! flag the pool reads without coordinating with in-flight requests.
//!
//! A worker dies on timeout, broken pipe, protocol violation, request-count
//! exhaustion, or an external mark (hot reload, forced recycle), and is
//! respawned lazily by the next dispatch that picks it.

mod core;
mod process;

pub use self::core::{StreamSink, Worker, WorkerConfig};
pub use self::process::{find_base_dir, PipeReader, PipeWriter, WorkerCommand};
