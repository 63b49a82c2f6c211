//! Structured logging setup.
//!
//! Log records flow through `tracing`; output is JSON lines by default so
//! request logs are machine-readable, or human-oriented fmt output when
//! `log_json` is off. `RUST_LOG` overrides the configured level.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Safe to call more than once; later
/// calls are no-ops (tests initialize independently per process).
pub fn init(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}
