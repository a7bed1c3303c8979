//! Path normalization and glob matching shared by the scope validators.
//!
//! Manifest paths, git diff paths and configured globs are all compared in the
//! same normalized form: forward slashes, no leading `./`, case folded.

use regex::Regex;
use std::path::{Component, Path};

/// Normalize a repo-relative path for comparison across operating systems.
pub fn normalize_for_compare(raw: &str) -> String {
    normalize_slashes(raw).to_lowercase()
}

/// Forward slashes, no leading `./`, no trailing `/`. Case is preserved.
pub fn normalize_slashes(raw: &str) -> String {
    let mut s = raw.trim().replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    s.trim_end_matches('/').to_string()
}

/// Express `path` relative to `root` when it is absolute and inside `root`;
/// relative paths are returned as-is (normalized).
pub fn relative_to_root(path: &Path, root: &Path) -> String {
    if path.is_absolute() {
        if let Ok(rel) = path.strip_prefix(root) {
            return normalize_slashes(&rel.to_string_lossy());
        }
        if let (Ok(p), Ok(r)) = (path.canonicalize(), root.canonicalize()) {
            if let Ok(rel) = p.strip_prefix(&r) {
                return normalize_slashes(&rel.to_string_lossy());
            }
        }
    }
    normalize_slashes(&path.to_string_lossy())
}

/// True when a relative path stays inside its root (no `..`, not absolute).
pub fn is_contained(raw: &str) -> bool {
    let normalized = normalize_slashes(raw);
    if normalized.is_empty() || normalized.starts_with('/') || normalized.contains(':') {
        return false;
    }
    Path::new(&normalized)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Compile a glob (`*` within a segment, `**` across segments) to an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = normalize_for_compare(pattern);
    let mut re = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '*' {
            if i + 1 < chars.len() && chars[i + 1] == '*' {
                // `**/` matches zero or more leading directories.
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    re.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            re.push_str("[^/]*");
        } else if c == '?' {
            re.push_str("[^/]");
        } else {
            re.push_str(&regex::escape(&c.to_string()));
        }
        i += 1;
    }
    re.push('$');
    Regex::new(&re)
}

/// Case-insensitive glob match on normalized paths. Invalid globs never match.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    match glob_to_regex(pattern) {
        Ok(re) => re.is_match(&normalize_for_compare(path)),
        Err(_) => false,
    }
}

/// First pattern in `patterns` matching `path`.
pub fn first_match<'a>(patterns: &'a [String], path: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| glob_match(p, path))
        .map(String::as_str)
}
