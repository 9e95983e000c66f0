//! Path exclusion filter
//!
//! A single predicate over absolute paths: any configured regular
//! expression match excludes the path from the scan entirely (no entry
//! row, no directory row, no completion, no recursion).

use crate::error::ConfigError;
use regex::Regex;

/// Default pattern excluding NFS-style snapshot directories
pub const DEFAULT_SNAPSHOT_PATTERN: &str = r"/\.snapshot(/|$)";

/// Compiled exclusion patterns
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    patterns: Vec<Regex>,
}

impl PathFilter {
    /// Compile a set of patterns, failing on the first invalid one
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let mut filter = Self::default();
        for p in patterns {
            filter.add_pattern(p.as_ref())?;
        }
        Ok(filter)
    }

    /// The default filter: NFS `.snapshot` directories only
    pub fn with_default() -> Self {
        Self {
            patterns: vec![Regex::new(DEFAULT_SNAPSHOT_PATTERN).expect("default pattern is valid")],
        }
    }

    /// Compile and append one pattern
    pub fn add_pattern(&mut self, pattern: &str) -> Result<(), ConfigError> {
        let re = Regex::new(pattern).map_err(|e| ConfigError::InvalidExcludePattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.patterns.push(re);
        Ok(())
    }

    /// True if any configured pattern matches the path
    pub fn is_excluded(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
