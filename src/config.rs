//! Server configuration.
//!
//! Settings load from `stoker.json` at the project root. A missing or
//! unparseable file falls back to the built-in defaults; individual values
//! that make no sense (zero worker counts, zero timeouts) are reset to
//! their defaults with a logged warning rather than failing startup.

use crate::static_files::StaticRule;
use crate::supervisor::{SlowRoutePolicy, SupervisorConfig, DEFAULT_BODY_THRESHOLD};
use crate::worker::{WorkerCommand, WorkerConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "stoker.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listen address; overridable with `STOKER_ADDR`.
    pub addr: String,
    pub fast_workers: usize,
    pub slow_workers: usize,
    pub hot_reload: bool,
    pub request_timeout_ms: u64,
    pub max_requests_per_worker: u64,
    /// Interpreter binary used to run the worker entrypoint.
    pub php_binary: String,
    /// Worker entrypoint, relative to the project root.
    pub worker_script: String,
    #[serde(rename = "static")]
    pub static_rules: Vec<StaticRule>,
    pub slow_routes: Vec<String>,
    pub slow_methods: Vec<String>,
    pub slow_body_threshold: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            fast_workers: 4,
            slow_workers: 2,
            hot_reload: false,
            request_timeout_ms: 10_000,
            max_requests_per_worker: 1000,
            php_binary: "php".to_string(),
            worker_script: "php/worker.php".to_string(),
            static_rules: vec![
                StaticRule::new("/assets/", "public/assets"),
                StaticRule::new("/build/", "public/build"),
                StaticRule::new("/css/", "public/css"),
                StaticRule::new("/js/", "public/js"),
                StaticRule::new("/images/", "public/images"),
                StaticRule::new("/img/", "public/img"),
            ],
            slow_routes: vec!["/reports/".to_string(), "/admin/analytics".to_string()],
            slow_methods: vec!["PUT".to_string(), "DELETE".to_string()],
            slow_body_threshold: DEFAULT_BODY_THRESHOLD,
        }
    }
}

impl AppConfig {
    /// Read `stoker.json` from the project root, falling back to defaults
    /// on any read or parse failure, then sanity-check the values.
    pub fn load(project_root: &Path) -> Self {
        let path = project_root.join(CONFIG_FILE);
        let mut cfg = match std::fs::read(&path) {
            Ok(raw) => match serde_json::from_slice::<AppConfig>(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    AppConfig::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "no config file, using defaults");
                AppConfig::default()
            }
        };
        cfg.validate();
        cfg
    }

    /// Clamp out-of-range values back to their defaults, warning for each.
    pub fn validate(&mut self) {
        let def = AppConfig::default();

        if self.fast_workers == 0 {
            warn!(fallback = def.fast_workers, "fast_workers must be positive");
            self.fast_workers = def.fast_workers;
        }
        if self.slow_workers == 0 {
            warn!(fallback = def.slow_workers, "slow_workers must be positive");
            self.slow_workers = def.slow_workers;
        }
        if self.request_timeout_ms == 0 {
            warn!(fallback = def.request_timeout_ms, "request_timeout_ms must be positive");
            self.request_timeout_ms = def.request_timeout_ms;
        }
        if self.max_requests_per_worker == 0 {
            warn!(
                fallback = def.max_requests_per_worker,
                "max_requests_per_worker must be positive"
            );
            self.max_requests_per_worker = def.max_requests_per_worker;
        }
        if self.static_rules.is_empty() {
            self.static_rules = def.static_rules;
        } else {
            for rule in &mut self.static_rules {
                if !rule.prefix.starts_with('/') {
                    warn!(prefix = %rule.prefix, "static prefix missing leading slash, fixing");
                    rule.prefix.insert(0, '/');
                }
            }
        }
        if self.slow_routes.is_empty() {
            self.slow_routes = def.slow_routes;
        }
        if self.slow_methods.is_empty() {
            self.slow_methods = def.slow_methods;
        }
        if self.slow_body_threshold == 0 {
            warn!(
                fallback = def.slow_body_threshold,
                "slow_body_threshold must be positive"
            );
            self.slow_body_threshold = def.slow_body_threshold;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Assemble the supervisor's pool sizing, worker command, and slow
    /// policy for the given project root.
    pub fn supervisor_config(&self, project_root: &Path) -> SupervisorConfig {
        SupervisorConfig {
            fast_workers: self.fast_workers,
            slow_workers: self.slow_workers,
            worker: WorkerConfig {
                command: WorkerCommand::php(project_root, &self.php_binary, &self.worker_script),
                max_requests: self.max_requests_per_worker,
                request_timeout: self.request_timeout(),
            },
            policy: SlowRoutePolicy::new(
                self.slow_routes.clone(),
                self.slow_methods.clone(),
                self.slow_body_threshold,
            ),
        }
    }
}
