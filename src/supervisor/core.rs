use crate::error::WorkerError;
use crate::hot_reload;
use crate::ids::RequestId;
use crate::payload::{RequestPayload, ResponsePayload};
use crate::pool::{PoolStats, WorkerPool};
use crate::supervisor::classify::{
    route_key, RouteTable, SlowRoutePolicy, PROMOTE_AVG_LATENCY, PROMOTE_MIN_SAMPLES,
};
use crate::worker::{StreamSink, WorkerConfig};
use notify::RecommendedWatcher;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::info;

/// Sizing and policy for a supervisor's two pools.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub fast_workers: usize,
    pub slow_workers: usize,
    pub worker: WorkerConfig,
    pub policy: SlowRoutePolicy,
}

/// Liveness summary across both pools, serialized by the health endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthSummary {
    pub fast: PoolStats,
    pub slow: PoolStats,
}

/// Owns the fast and slow pools, the classification policy, and the
/// adaptive latency table. Every request enters through [`dispatch`] or
/// [`dispatch_stream`]; the policy decides which pool serves it.
///
/// [`dispatch`]: Supervisor::dispatch
/// [`dispatch_stream`]: Supervisor::dispatch_stream
pub struct Supervisor {
    fast: WorkerPool,
    slow: WorkerPool,
    routes: RwLock<RouteTable>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl Supervisor {
    /// Spawn both pools eagerly. Any worker spawn failure aborts startup.
    pub fn new(cfg: SupervisorConfig) -> Result<Self, WorkerError> {
        let fast = WorkerPool::new(cfg.fast_workers, cfg.worker.clone())?;
        let slow = WorkerPool::new(cfg.slow_workers, cfg.worker)?;
        Ok(Self::from_pools(fast, slow, cfg.policy))
    }

    /// Assemble a supervisor from pre-built pools.
    pub fn from_pools(fast: WorkerPool, slow: WorkerPool, policy: SlowRoutePolicy) -> Self {
        Self {
            fast,
            slow,
            routes: RwLock::new(RouteTable {
                policy,
                stats: Default::default(),
            }),
            watcher: Mutex::new(None),
        }
    }

    /// Classification under the current policy, including any promotions
    /// recorded so far.
    pub fn is_slow(&self, req: &RequestPayload) -> bool {
        self.routes.read().unwrap().policy.matches(req)
    }

    /// Buffered dispatch. An empty request id is replaced before the
    /// request reaches a worker.
    pub fn dispatch(&self, req: &mut RequestPayload) -> Result<ResponsePayload, WorkerError> {
        Self::ensure_id(req);
        self.pool_for(req).dispatch(req)
    }

    /// Streaming dispatch onto the caller's sink. Pool selection is the
    /// same as the buffered path.
    pub fn dispatch_stream(
        &self,
        req: &mut RequestPayload,
        sink: &mut dyn StreamSink,
    ) -> Result<(), WorkerError> {
        Self::ensure_id(req);
        self.pool_for(req).next_worker().stream(req, sink)
    }

    /// Feed one latency observation into the route table. Once a route has
    /// enough samples and its average crosses the threshold, its key joins
    /// the slow prefixes and every later classification sees it.
    pub fn record_latency(&self, path: &str, latency: Duration) {
        let key = route_key(path);
        let mut table = self.routes.write().unwrap();
        let stat = table.stats.entry(key.clone()).or_default();
        stat.count += 1;
        stat.total += latency;
        let (count, average) = (stat.count, stat.average());

        if count >= PROMOTE_MIN_SAMPLES
            && average > PROMOTE_AVG_LATENCY
            && !table.policy.contains_prefix(&key)
        {
            info!(
                route = %key,
                samples = count,
                avg_ms = average.as_millis() as u64,
                "route promoted to slow pool"
            );
            table.policy.prefixes.push(key);
        }
    }

    pub fn health(&self) -> HealthSummary {
        HealthSummary {
            fast: self.fast.stats(),
            slow: self.slow.stats(),
        }
    }

    /// Mark every worker in both pools dead; each respawns on its next
    /// dispatch.
    pub fn force_recycle(&self) {
        self.fast.mark_all_dead();
        self.slow.mark_all_dead();
    }

    /// Current slow prefixes, configured plus promoted.
    pub fn slow_prefixes(&self) -> Vec<String> {
        self.routes.read().unwrap().policy.prefixes.clone()
    }

    /// Watch the project's worker code directories and recycle all workers
    /// on any change. Missing directories are skipped; the watcher holds
    /// only a weak, action-only reference back to the supervisor.
    pub fn enable_hot_reload(this: &Arc<Self>, project_root: &Path) -> notify::Result<()> {
        let dirs = [project_root.join("php"), project_root.join("routes")];
        let weak = Arc::downgrade(this);
        let watcher = hot_reload::watch_dirs(&dirs, move || {
            if let Some(supervisor) = weak.upgrade() {
                info!("watched files changed, recycling all workers");
                supervisor.force_recycle();
            }
        })?;
        *this.watcher.lock().unwrap() = Some(watcher);
        Ok(())
    }

    fn pool_for(&self, req: &RequestPayload) -> &WorkerPool {
        if self.is_slow(req) {
            &self.slow
        } else {
            &self.fast
        }
    }

    fn ensure_id(req: &mut RequestPayload) {
        if req.id.is_empty() {
            req.id = RequestId::new().to_string();
        }
    }
}
