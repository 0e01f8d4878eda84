//! Input screening for diagram sources.
//!
//! The deny-list narrows the set of LaTeX constructs that reach the compiler;
//! it is not a sandbox. The compiler process still needs OS-level isolation
//! (no shell escape, restricted filesystem and network) in production.

use regex::{Regex, RegexBuilder};

use super::error::ValidationError;

pub const DEFAULT_MAX_SOURCE_BYTES: usize = 50_000;

/// File inclusion, shell escape and raw file output directives.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    r"\\input\{",
    r"\\include\{",
    r"\\write18",
    r"\\immediate\\write",
    r"\\openout",
    r"\\input\|",
    r"\\def\\input",
];

#[derive(Debug, Clone)]
struct DenyPattern {
    source: String,
    regex: Regex,
}

/// Size bound plus an ordered, case-insensitive deny-list.
#[derive(Debug, Clone)]
pub struct SourceValidator {
    max_bytes: usize,
    patterns: Vec<DenyPattern>,
}

impl SourceValidator {
    pub fn new<S: AsRef<str>>(max_bytes: usize, patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                let source = pattern.as_ref().to_string();
                RegexBuilder::new(&source)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| DenyPattern { source, regex })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            max_bytes,
            patterns,
        })
    }

    pub fn with_default_patterns(max_bytes: usize) -> Result<Self, regex::Error> {
        Self::new(max_bytes, DEFAULT_DENY_PATTERNS)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Accepts a source when it is present, non-empty, within the size bound
    /// and matches none of the deny patterns. The first matching pattern wins.
    pub fn validate<'a>(&self, source: Option<&'a str>) -> Result<&'a str, ValidationError> {
        let source = match source {
            Some(value) if !value.is_empty() => value,
            _ => return Err(ValidationError::EmptyOrWrongType),
        };

        if source.len() > self.max_bytes {
            return Err(ValidationError::TooLarge {
                actual: source.len(),
                max: self.max_bytes,
            });
        }

        if let Some(pattern) = self.patterns.iter().find(|p| p.regex.is_match(source)) {
            return Err(ValidationError::UnsafeContent {
                pattern: pattern.source.clone(),
            });
        }

        Ok(source)
    }
}
