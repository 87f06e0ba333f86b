//! Content filtering with regex patterns.
//!
//! Messages whose body matches a configured pattern are excluded from
//! forwarding. Invalid patterns are logged and skipped rather than
//! rejecting the whole configuration.

use fancy_regex::Regex;
use tracing::warn;

use crate::config::types::FiltersConfig;

/// A compiled pattern with its original string for diagnostics.
#[derive(Debug, Clone)]
struct CompiledPattern {
    original: String,
    regex: Regex,
}

/// Checks message bodies against the configured exclusion patterns.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    patterns: Vec<CompiledPattern>,
}

impl ContentFilter {
    /// Build from the optional `filters` config section. A missing or
    /// disabled section yields a filter that excludes nothing.
    pub fn from_config(filters: Option<&FiltersConfig>) -> Self {
        let patterns = match filters {
            Some(section) if section.enabled.unwrap_or(true) => {
                compile_patterns(section.patterns.clone().unwrap_or_default())
            }
            _ => Vec::new(),
        };
        Self { patterns }
    }

    /// Filter that allows all messages.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Whether the message body matches an exclusion pattern.
    pub fn excludes(&self, body: &str) -> bool {
        self.patterns.iter().any(|p| {
            p.regex.is_match(body).unwrap_or_else(|e| {
                warn!(pattern = %p.original, error = %e, "regex match error");
                false
            })
        })
    }

    pub fn has_patterns(&self) -> bool {
        !self.patterns.is_empty()
    }
}

fn compile_patterns(patterns: Vec<String>) -> Vec<CompiledPattern> {
    patterns
        .into_iter()
        .filter_map(|pattern| match Regex::new(&pattern) {
            Ok(regex) => Some(CompiledPattern {
                original: pattern,
                regex,
            }),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid filter pattern, skipping");
                None
            }
        })
        .collect()
}
