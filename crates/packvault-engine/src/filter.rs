//! File selection rules: suffix set, filename regex, size bounds

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// User-facing filter configuration. A plain value: built once, handed to
/// the engine, compiled at the start of each backup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    /// When false, every file passes regardless of the other fields
    pub enabled: bool,
    /// Accepted extensions; empty means no suffix constraint
    pub suffixes: BTreeSet<String>,
    /// Regex the file name must match; empty means no constraint
    pub name_regex: String,
    /// Minimum file size in bytes
    pub min_size: u64,
    /// Maximum file size in bytes; 0 means unbounded
    pub max_size: u64,
}

impl FilterOptions {
    /// Add a suffix, normalizing it to start with `.` and to lowercase.
    pub fn add_suffix(&mut self, suffix: &str) {
        let s = suffix.to_ascii_lowercase();
        if s.starts_with('.') {
            self.suffixes.insert(s);
        } else {
            self.suffixes.insert(format!(".{s}"));
        }
    }
}

/// A filter with its regex compiled. Construction fails on a malformed
/// pattern rather than silently ignoring it.
#[derive(Debug)]
pub struct CompiledFilter {
    enabled: bool,
    suffixes: BTreeSet<String>,
    name_regex: Option<Regex>,
    min_size: u64,
    max_size: u64,
}

impl CompiledFilter {
    /// Compile the given options.
    pub fn new(opts: &FilterOptions) -> Result<Self, EngineError> {
        let name_regex = if opts.name_regex.is_empty() {
            None
        } else {
            Some(
                Regex::new(&opts.name_regex)
                    .map_err(|e| EngineError::InvalidFilter(e.to_string()))?,
            )
        };
        let suffixes = opts
            .suffixes
            .iter()
            .map(|s| {
                let s = s.to_ascii_lowercase();
                if s.starts_with('.') {
                    s
                } else {
                    format!(".{s}")
                }
            })
            .collect();
        Ok(Self {
            enabled: opts.enabled,
            suffixes,
            name_regex,
            min_size: opts.min_size,
            max_size: opts.max_size,
        })
    }

    /// Decide whether a regular file qualifies for inclusion.
    ///
    /// `rel_path` is the POSIX-style root-relative path; only its final
    /// component is matched against the suffix set and regex.
    pub fn matches(&self, rel_path: &str, size: u64) -> bool {
        if !self.enabled {
            return true;
        }
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);

        if !self.suffixes.is_empty() {
            let ext = name
                .rfind('.')
                .map(|i| name[i..].to_ascii_lowercase())
                .unwrap_or_default();
            if !self.suffixes.contains(&ext) {
                return false;
            }
        }
        if let Some(re) = &self.name_regex {
            if !re.is_match(name) {
                return false;
            }
        }
        if size < self.min_size {
            return false;
        }
        if self.max_size != 0 && size > self.max_size {
            return false;
        }
        true
    }
}
