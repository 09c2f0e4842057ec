//! Path normalization
//!
//! All namespace calls normalize their paths here before any RPC is made.
//! Normalization is pure segment math: relative paths are taken relative to
//! the root, `.` segments vanish, `..` removes the previous segment and is
//! dropped at the root.

use crate::constants::MAX_PATH_LENGTH;
use crate::error::{AccessError, AccessResult};

pub const ROOT: &str = "/";

/// Normalize `path` into an absolute path without `.`, `..`, repeated or
/// trailing slashes
pub fn normalize(path: &str) -> AccessResult<String> {
    if path.is_empty() {
        return Err(AccessError::InvalidArgument("empty path".to_string()));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(AccessError::InvalidArgument(format!(
            "path longer than {} bytes",
            MAX_PATH_LENGTH
        )));
    }
    if path.contains('\0') {
        return Err(AccessError::InvalidArgument(format!(
            "path contains NUL: {:?}",
            path
        )));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }

    if segments.is_empty() {
        return Ok(ROOT.to_string());
    }
    let mut out = String::with_capacity(path.len() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    Ok(out)
}

/// Parent of a normalized path (`None` for the root)
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(i) => Some(&path[..i]),
        None => Some(ROOT),
    }
}

/// Last segment of a normalized path (`"/"` for the root)
pub fn basename(path: &str) -> &str {
    if path == ROOT {
        return ROOT;
    }
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a normalized directory and an entry name
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Every proper prefix of a normalized path followed by the path itself,
/// root excluded: `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`
pub fn prefixes(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

/// True when `path` equals `ancestor` or lies below it
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return true;
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}
