//! Static asset serving.
//!
//! Prefix rules map URL paths onto directories under the project root, with
//! path-traversal attempts rejected during mapping. Only GET and HEAD are
//! served; anything else falls through to the worker pools.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// One prefix → directory mapping, e.g. `/assets/` → `public/assets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRule {
    pub prefix: String,
    pub dir: String,
}

impl StaticRule {
    pub fn new(prefix: impl Into<String>, dir: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            dir: dir.into(),
        }
    }
}

#[derive(Clone)]
pub struct StaticFiles {
    root: PathBuf,
    rules: Vec<StaticRule>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>, rules: Vec<StaticRule>) -> Self {
        Self {
            root: root.into(),
            rules,
        }
    }

    /// Try to serve `path` under the configured rules. Returns the file
    /// bytes and a ready-to-send `Content-Type` header line on a hit;
    /// misses (including traversal attempts and directories) return `None`
    /// so the request continues to the worker pools.
    pub fn resolve(&self, method: &str, path: &str) -> Option<(Vec<u8>, &'static str)> {
        if method != "GET" && method != "HEAD" {
            return None;
        }
        let path = path.split('?').next().unwrap_or(path);

        for rule in &self.rules {
            if rule.dir.is_empty() || !path.starts_with(rule.prefix.as_str()) {
                continue;
            }
            let rel = &path[rule.prefix.len()..];
            let base = self.root.join(&rule.dir);
            let Some(full) = map_path(&base, rel) else {
                continue;
            };
            if !full.is_file() {
                continue;
            }
            if let Ok(bytes) = std::fs::read(&full) {
                return Some((bytes, content_type_header(&full)));
            }
        }
        None
    }
}

/// Join `rel` under `base`, refusing any component that would escape it.
fn map_path(base: &Path, rel: &str) -> Option<PathBuf> {
    let clean = rel.trim_start_matches('/');
    if clean.contains("../") || clean.contains("/..") || clean.contains("..\\") || clean.contains("\\..")
    {
        return None;
    }
    let mut out = base.to_path_buf();
    for comp in Path::new(clean).components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

// Full header lines because the HTTP layer only accepts static strings.
fn content_type_header(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "html" => "Content-Type: text/html",
        "css" => "Content-Type: text/css",
        "js" => "Content-Type: application/javascript",
        "json" => "Content-Type: application/json",
        "txt" => "Content-Type: text/plain",
        "png" => "Content-Type: image/png",
        "jpg" | "jpeg" => "Content-Type: image/jpeg",
        "gif" => "Content-Type: image/gif",
        "svg" => "Content-Type: image/svg+xml",
        "ico" => "Content-Type: image/x-icon",
        "woff2" => "Content-Type: font/woff2",
        _ => "Content-Type: application/octet-stream",
    }
}
