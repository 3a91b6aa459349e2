//! Deterministic path normalization (§9 design note: "implement normalization
//! deterministically and document it").
//!
//! `store.rs` is the enforcement point: every path it interns or hashes —
//! on insert and on query alike — is passed through [`clean_path`] first
//! (see `store::file_hash`), so the same file referenced as `./a.cpp` or
//! `a.cpp` hashes to the same key. Normalization is deliberately simple:
//! backslashes become forward slashes, a leading `./` is stripped, and
//! repeated slashes collapse. It does not fold case, and it is not a
//! substitute for canonicalization against the filesystem — callers that
//! need either should canonicalize/case-fold before calling in.

/// Normalize a path string for use as a store key.
pub fn clean_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut parts: Vec<&str> = replaced.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    if replaced.starts_with('/') {
        let mut out = String::from("/");
        out.push_str(&parts.join("/"));
        return out;
    }
    if parts.is_empty() {
        parts.push(".");
    }
    parts.join("/")
}

/// The directory component of a cleaned path, with a trailing slash, so it
/// can be used directly as a `LIKE` prefix (§4.4 `getSimilarCommandInfo`).
pub fn directory_prefix(path: &str) -> String {
    let cleaned = clean_path(path);
    match cleaned.rfind('/') {
        Some(idx) => format!("{}/", &cleaned[..idx]),
        None => String::new(),
    }
}
