//! Keyword heuristics for tool classification and error triage.
//!
//! Kept apart from the supervisor and coordinator so the tables can change
//! without touching control flow. Matching is case-insensitive substring
//! search; coverage of arbitrary provider vocabularies is not guaranteed.

use serde::Serialize;

// ─── Tables ─────────────────────────────────────────────────────────────────

/// Ordered `(keyword, category)` pairs. First match wins.
const CATEGORY_KEYWORDS: &[(&str, ToolCategory)] = &[
    ("file", ToolCategory::Filesystem),
    ("search", ToolCategory::Search),
    ("web", ToolCategory::Web),
    ("http", ToolCategory::Web),
    ("git", ToolCategory::VersionControl),
];

/// Verbs that mark a tool as potentially destructive.
const DANGEROUS_KEYWORDS: &[&str] = &[
    "delete",
    "remove",
    "destroy",
    "format",
    "execute",
    "shell",
    "kill",
    "drop",
    "truncate",
    "overwrite",
    "rm",
];

/// Substrings that identify a transport/connection-level failure.
const CONNECTION_ERROR_KEYWORDS: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "refused",
    "not found",
    "closed",
    "broken pipe",
    "socket",
    "reset",
    "eof",
    "exited",
];

// ─── Categories ─────────────────────────────────────────────────────────────

/// Coarse grouping of a tool by what it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCategory {
    Filesystem,
    Search,
    Web,
    VersionControl,
    General,
}

/// Classify a tool from its raw name and description.
pub fn classify_category(name: &str, description: &str) -> ToolCategory {
    let haystack = format!("{name} {description}").to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(keyword, _)| haystack.contains(keyword))
        .map(|(_, category)| *category)
        .unwrap_or(ToolCategory::General)
}

/// Whether a tool looks destructive.
///
/// Names are split on `_`, `-`, `.` and whitespace so short verbs such as
/// `rm` only match whole words, while longer verbs also match inside words
/// (`deleteFile`).
pub fn is_dangerous(name: &str, description: &str) -> bool {
    let haystack = format!("{name} {description}").to_lowercase();
    let words: Vec<&str> = haystack
        .split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect();

    DANGEROUS_KEYWORDS.iter().any(|keyword| {
        if keyword.len() <= 2 {
            words.iter().any(|w| w == keyword)
        } else {
            haystack.contains(keyword)
        }
    })
}

/// Whether an error message describes a connection-level failure.
pub fn is_connection_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONNECTION_ERROR_KEYWORDS
        .iter()
        .any(|keyword| lower.contains(keyword))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
