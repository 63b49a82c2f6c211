use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stoker::config::AppConfig;
use stoker::hub::EventHub;
use stoker::metrics::Metrics;
use stoker::server::{AppService, HttpServer};
use stoker::static_files::StaticFiles;
use stoker::supervisor::Supervisor;
use stoker::worker::find_base_dir;
use stoker::logging;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "stoker")]
#[command(about = "Warm-pool PHP application server", long_about = None)]
struct Cli {
    /// Project root; defaults to the nearest ancestor holding Cargo.toml
    #[arg(long)]
    root: Option<PathBuf>,

    /// Listen address override (also: STOKER_ADDR)
    #[arg(long)]
    addr: Option<String>,
}

/// Coroutine stack size from `STOKER_STACK_SIZE` (decimal or 0x-hex),
/// defaulting to 64 KiB.
fn stack_size_from_env() -> usize {
    match std::env::var("STOKER_STACK_SIZE") {
        Ok(val) => {
            if let Some(hex) = val.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).unwrap_or(0x10000)
            } else {
                val.parse().unwrap_or(0x10000)
            }
        }
        Err(_) => 0x10000,
    }
}

fn main() -> anyhow::Result<()> {
    let level = std::env::var("STOKER_LOG").unwrap_or_else(|_| "info".to_string());
    let plain = std::env::var("STOKER_LOG_PLAIN").is_ok();
    logging::init(&level, !plain);

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(find_base_dir);
    let cfg = AppConfig::load(&root);

    let addr = cli
        .addr
        .or_else(|| std::env::var("STOKER_ADDR").ok())
        .unwrap_or_else(|| cfg.addr.clone());

    // Worker pipe reads can pin scheduler threads for a whole exchange, so
    // size the runtime to the pools rather than the core count alone.
    may::config()
        .set_stack_size(stack_size_from_env())
        .set_workers(cfg.fast_workers + cfg.slow_workers + 4);

    let supervisor = Arc::new(
        Supervisor::new(cfg.supervisor_config(&root)).context("failed to start worker pools")?,
    );

    if cfg.hot_reload {
        match Supervisor::enable_hot_reload(&supervisor, &root) {
            Ok(()) => info!("hot reload enabled"),
            Err(e) => warn!(error = %e, "hot reload disabled"),
        }
    }

    let service = AppService::new(
        Arc::clone(&supervisor),
        Arc::new(EventHub::new()),
        Arc::new(Metrics::new()),
        Arc::new(StaticFiles::new(root.clone(), cfg.static_rules.clone())),
    );

    info!(
        addr = %addr,
        root = %root.display(),
        fast_workers = cfg.fast_workers,
        slow_workers = cfg.slow_workers,
        request_timeout_ms = cfg.request_timeout_ms,
        max_requests_per_worker = cfg.max_requests_per_worker,
        slow_routes = ?cfg.slow_routes,
        "stoker listening"
    );

    let handle = HttpServer(service)
        .start(&addr)
        .with_context(|| format!("failed to bind {addr}"))?;
    handle
        .join()
        .map_err(|e| anyhow::anyhow!("server exited with error: {e:?}"))?;
    Ok(())
}
