use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rules deciding which files under the root count as synced documents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocumentFilter {
    /// Eligible file extensions, without the leading dot (default: `md`)
    pub extensions: Vec<String>,

    /// Exclude relative paths matching these glob-style patterns
    pub exclude_patterns: Vec<String>,

    /// Maximum document size in bytes (default: 5MB)
    pub max_file_size_bytes: u64,
}

fn default_max_file_size() -> u64 {
    5 * 1024 * 1024
}

impl Default for DocumentFilter {
    fn default() -> Self {
        DocumentFilter {
            extensions: vec!["md".to_string()],
            exclude_patterns: Vec::new(),
            max_file_size_bytes: default_max_file_size(),
        }
    }
}

impl DocumentFilter {
    /// Check whether a slash-separated relative path names an eligible document
    ///
    /// Size is not considered here; see [`DocumentFilter::within_size_limit`].
    pub fn is_eligible(&self, rel_path: &str) -> bool {
        if rel_path.is_empty() || is_hidden(rel_path) {
            return false;
        }

        if !self.has_eligible_extension(rel_path) {
            return false;
        }

        !self
            .exclude_patterns
            .iter()
            .any(|pattern| glob_match(pattern, rel_path))
    }

    /// Whether a watch event for this path is worth forwarding
    ///
    /// Extension-less paths pass so that a deleted folder still reaches the engine.
    pub fn is_candidate(&self, rel_path: &str) -> bool {
        if rel_path.is_empty() || is_hidden(rel_path) {
            return false;
        }

        let has_extension = Path::new(rel_path).extension().is_some();
        !has_extension || self.is_eligible(rel_path)
    }

    /// Check file size against the configured ceiling
    pub fn within_size_limit(&self, size: u64) -> bool {
        size <= self.max_file_size_bytes
    }

    fn has_eligible_extension(&self, rel_path: &str) -> bool {
        match Path::new(rel_path).extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

/// True if any component of the relative path is hidden (`.name`)
pub fn is_hidden(rel_path: &str) -> bool {
    rel_path
        .split('/')
        .any(|component| component.starts_with('.') && component.len() > 1)
}

/// Match a relative path against an exclude pattern
///
/// `*` stands for any run of characters, `/` included. A pattern without `*`
/// matches anywhere in the path.
fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return text.contains(pattern);
    }

    let mut parts: Vec<&str> = pattern.split('*').collect();
    let last = parts.pop().unwrap_or_default();
    let Some(mut rest) = text.strip_prefix(parts[0]) else {
        return false;
    };

    // Each literal piece is consumed in order, so pieces never overlap
    for part in &parts[1..] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
