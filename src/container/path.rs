//! POSIX-style node paths.
//!
//! Paths are `/`-separated. The root is `/`. Normalization collapses repeated
//! separators and drops a trailing separator; `.` and `..` are not interpreted
//! and are rejected as node names.

use crate::error::{StoreError, StoreResult};

pub const ROOT: &str = "/";

/// Collapse repeated `/` and drop a trailing `/`. Absolute inputs stay
/// absolute, relative inputs stay relative.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let joined = segments(path).collect::<Vec<_>>().join("/");
    match (absolute, joined.is_empty()) {
        (true, true) => ROOT.to_string(),
        (true, false) => format!("/{}", joined),
        (false, _) => joined,
    }
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

pub fn is_root(path: &str) -> bool {
    normalize(path) == ROOT
}

/// Non-empty segments of `path`.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Append `child` (absolute or relative) below `base`.
pub fn join(base: &str, child: &str) -> String {
    normalize(&format!("{}/{}", base, child))
}

/// Parent of an absolute path. The parent of `/` is `/`.
pub fn parent(path: &str) -> String {
    let norm = normalize(path);
    match norm.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(idx) => norm[..idx].to_string(),
    }
}

/// Last segment of a path, empty for the root.
pub fn basename(path: &str) -> &str {
    segments(path).last().unwrap_or("")
}

/// Validate a single node name supplied by a caller.
pub fn check_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(StoreError::Lookup(format!("invalid node name '{}'", name)));
    }
    Ok(())
}
