//! Request metrics.
//!
//! Totals and the in-flight gauge are lock-free atomics; the per-route
//! table sits behind a mutex and is only touched once per request start and
//! end. `snapshot` produces a serializable copy for the metrics endpoint.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RouteMetrics {
    pub count: u64,
    pub total_latency_ns: u64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    in_flight: AtomicU64,
    by_route: Mutex<HashMap<String, RouteMetrics>>,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub in_flight: u64,
    pub by_route: HashMap<String, RouteMetrics>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_request(&self, route: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.by_route
            .lock()
            .unwrap()
            .entry(route.to_string())
            .or_default();
    }

    pub fn end_request(&self, route: &str, latency: Duration, errored: bool) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
        if errored {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut routes = self.by_route.lock().unwrap();
        let entry = routes.entry(route.to_string()).or_default();
        entry.count += 1;
        entry.total_latency_ns += latency.as_nanos() as u64;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            by_route: self.by_route.lock().unwrap().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_requests_and_errors() {
        let m = Metrics::new();
        m.start_request("/a");
        m.start_request("/a");
        let snap = m.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.in_flight, 2);

        m.end_request("/a", Duration::from_millis(5), false);
        m.end_request("/a", Duration::from_millis(7), true);
        let snap = m.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.by_route["/a"].count, 2);
        assert_eq!(snap.by_route["/a"].total_latency_ns, 12_000_000);
    }

    #[test]
    fn in_flight_never_underflows() {
        let m = Metrics::new();
        m.end_request("/x", Duration::ZERO, false);
        assert_eq!(m.snapshot().in_flight, 0);
    }
}
