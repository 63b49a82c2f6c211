//! # Supervisor Module
//!
//! The supervisor owns the two worker pools ("fast" and "slow"), the
//! slow-request policy, and the per-route latency table. It classifies each
//! request, dispatches it buffered or streaming, records observed latency,
//! and promotes routes whose average latency crosses the threshold so that
//! heavy traffic migrates off the fast pool on its own.
//!
//! It also wires the hot-reload watcher: file changes under the project's
//! worker directories mass-mark every worker dead, and the next dispatch on
//! each worker respawns it against the new code.

mod classify;
mod core;

pub use self::classify::{
    route_key, RouteStat, SlowRoutePolicy, DEFAULT_BODY_THRESHOLD, PROMOTE_AVG_LATENCY,
    PROMOTE_MIN_SAMPLES,
};
pub use self::core::{HealthSummary, Supervisor, SupervisorConfig};
