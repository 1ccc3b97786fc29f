//! Keyword-based risk classification for discovered tools.
//!
//! Classification only; whether a high-risk tool may actually run is the
//! caller's policy decision.

/// Keyword families that mark a tool as high-risk when any of them appears
/// in its name or description: process execution, filesystem mutation,
/// network access, and database/query operations.
const RISK_KEYWORDS: &[&str] = &[
    // process execution
    "exec",
    "execute",
    "shell",
    "bash",
    "spawn",
    "command",
    "subprocess",
    // filesystem mutation
    "delete",
    "remove",
    "unlink",
    "write_file",
    "rmdir",
    "truncate",
    "chmod",
    // network access
    "fetch",
    "http",
    "request",
    "download",
    "upload",
    "curl",
    // database / query
    "sql",
    "query",
    "database",
    "db_",
];

/// Case-insensitive scan of the tool's name and description.
pub fn is_high_risk(name: &str, description: &str) -> bool {
    let haystack = format!("{name} {description}").to_lowercase();
    RISK_KEYWORDS
        .iter()
        .any(|keyword| haystack.contains(keyword))
}
