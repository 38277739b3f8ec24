//! Object key utilities
//!
//! Normalizes user-supplied prefixes and relative paths into object keys.
use std::path::Path;

/// Normalize a prefix into `a/b/` form, or `""` for the bucket root.
///
/// Rules:
/// 1. Path separators `\` become `/`
/// 2. Leading `/` and `./` segments are dropped
/// 3. Empty segments (`a//b`) are collapsed
/// 4. A non-empty prefix always ends with `/`
pub fn normalize_prefix(prefix: &str) -> String {
    let key = normalize_key(prefix);
    if key.is_empty() {
        key
    } else {
        format!("{}/", key)
    }
}

/// Normalize a relative key: same rules as [`normalize_prefix`] without the
/// trailing slash.
pub fn normalize_key(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join an optional prefix and a relative key.
pub fn join_key(prefix: Option<&str>, key: &str) -> String {
    let prefix = prefix.map(normalize_prefix).unwrap_or_default();
    format!("{}{}", prefix, normalize_key(key))
}

/// Key of `path` relative to `base`, using `/` separators.
pub fn key_from_path(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    normalize_key(&rel.to_string_lossy())
}

/// Last segment of a key, ignoring a trailing `/`.
pub fn object_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
