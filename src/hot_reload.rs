//! Filesystem watching for hot reload.
//!
//! Translates write/create/remove/rename events under the watched
//! directories into a single callback, which the supervisor uses to
//! mass-mark workers dead. Directories that do not exist are skipped with a
//! warning; a missing watch root never prevents the server from starting.

use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Watch the given directories (non-recursively) and invoke `on_change` on
/// any qualifying event. The returned watcher owns the event source; drop
/// it to stop watching.
pub fn watch_dirs<F>(dirs: &[PathBuf], on_change: F) -> notify::Result<RecommendedWatcher>
where
    F: Fn() + Send + 'static,
{
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    debug!(paths = ?event.paths, kind = ?event.kind, "watched change");
                    on_change();
                }
            }
            Err(e) => warn!(error = %e, "file watcher error"),
        },
        Config::default(),
    )?;

    for dir in dirs {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "watch directory missing, skipping");
            continue;
        }
        if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            warn!(dir = %dir.display(), error = %e, "failed to watch directory, skipping");
        }
    }

    Ok(watcher)
}
