use crate::payload::RequestPayload;
use std::collections::HashMap;
use std::time::Duration;

/// Samples required on a route before promotion is considered.
pub const PROMOTE_MIN_SAMPLES: u64 = 10;
/// Average latency above which a route is promoted to the slow pool.
pub const PROMOTE_AVG_LATENCY: Duration = Duration::from_millis(500);

/// Default body size (bytes) above which a request is considered slow.
pub const DEFAULT_BODY_THRESHOLD: usize = 2_000_000;

/// Static classification policy: which requests go to the slow pool.
///
/// Built from configuration and extended at runtime when the latency table
/// promotes a route. Promotion is monotonic; nothing is ever demoted.
#[derive(Debug, Clone)]
pub struct SlowRoutePolicy {
    pub prefixes: Vec<String>,
    methods: Vec<String>,
    pub body_threshold: usize,
}

impl SlowRoutePolicy {
    pub fn new(prefixes: Vec<String>, methods: Vec<String>, body_threshold: usize) -> Self {
        Self {
            prefixes,
            methods: methods.into_iter().map(|m| m.to_uppercase()).collect(),
            body_threshold,
        }
    }

    /// True when any rule matches: a configured path prefix, a slow method
    /// (compared case-insensitively), or a body above the threshold.
    pub fn matches(&self, req: &RequestPayload) -> bool {
        if self.prefixes.iter().any(|p| req.path.starts_with(p.as_str())) {
            return true;
        }
        if self.methods.contains(&req.method.to_uppercase()) {
            return true;
        }
        self.body_threshold > 0 && req.body.len() > self.body_threshold
    }

    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.prefixes.iter().any(|p| p == prefix)
    }
}

impl Default for SlowRoutePolicy {
    fn default() -> Self {
        Self::new(
            Vec::new(),
            vec!["PUT".to_string(), "DELETE".to_string()],
            DEFAULT_BODY_THRESHOLD,
        )
    }
}

/// Per-route latency accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteStat {
    pub count: u64,
    pub total: Duration,
}

impl RouteStat {
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Policy plus the latency table, guarded together by one lock in the
/// supervisor so promotions and classification reads never tear.
#[derive(Debug, Default)]
pub struct RouteTable {
    pub policy: SlowRoutePolicy,
    pub stats: HashMap<String, RouteStat>,
}

/// Aggregation bucket for the adaptive classifier: the first path segment,
/// query string excluded. `/reports/daily?x=1` becomes `/reports`.
pub fn route_key(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    match path.trim_start_matches('/').split('/').next() {
        Some(first) if !first.is_empty() => format!("/{first}"),
        _ => "/".to_string(),
    }
}
