//! Fixed-width, in-place byte rewriting for streamed dump content.
//!
//! Rules always replace a pattern with a replacement of exactly the same
//! length, so a rewrite never shifts the offsets of the bytes that follow it
//! inside a chunk. The scanner is a plain linear matcher with a single
//! running counter: on a mismatch it resets and moves on without re-testing
//! the current byte. Patterns with a repeated prefix (`aab` inside `aaab`)
//! can be missed, which is fine for the charset tokens emitted by mysqldump.
//! Occurrences split across two chunks are not seen either.

use serde::{Deserialize, Serialize};

/// Collation emitted by MySQL 8 dumps that older servers reject.
pub const MYSQL8_COLLATION: &str = "utf8mb4_0900_ai_ci";
pub const LEGACY_COLLATION: &str = "utf8_general_ci";
pub const MYSQL8_CHARSET_DECL: &str = "CHARSET=utf8mb4";
pub const LEGACY_CHARSET_DECL: &str = "CHARSET=utf8";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    #[error("rewrite pattern must not be empty")]
    EmptyPattern,

    #[error(
        "rewrite replacement {replacement:?} is {replacement_len} bytes but pattern {pattern:?} is {pattern_len} bytes; they must be the same length"
    )]
    LengthMismatch {
        pattern: String,
        replacement: String,
        pattern_len: usize,
        replacement_len: usize,
    },

    #[error("can't pad {replacement:?} to {len} bytes: already exceeds this length")]
    ReplacementTooLong { replacement: String, len: usize },
}

/// A same-length find/replace pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pattern: Vec<u8>,
    replacement: Vec<u8>,
}

impl RewriteRule {
    /// Build a rule, rejecting empty patterns and length mismatches.
    pub fn new(pattern: &[u8], replacement: &[u8]) -> Result<Self, RewriteError> {
        if pattern.is_empty() {
            return Err(RewriteError::EmptyPattern);
        }
        if pattern.len() != replacement.len() {
            return Err(RewriteError::LengthMismatch {
                pattern: String::from_utf8_lossy(pattern).into_owned(),
                replacement: String::from_utf8_lossy(replacement).into_owned(),
                pattern_len: pattern.len(),
                replacement_len: replacement.len(),
            });
        }
        Ok(Self {
            pattern: pattern.to_vec(),
            replacement: replacement.to_vec(),
        })
    }

    /// Build a rule whose replacement is right-padded with spaces up to the
    /// pattern length.
    pub fn padded(pattern: &str, replacement: &str) -> Result<Self, RewriteError> {
        let padded = pad_to_length(replacement.as_bytes(), pattern.len(), b' ').ok_or_else(|| {
            RewriteError::ReplacementTooLong {
                replacement: replacement.to_string(),
                len: pattern.len(),
            }
        })?;
        Self::new(pattern.as_bytes(), &padded)
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }
}

fn pad_to_length(data: &[u8], len: usize, pad: u8) -> Option<Vec<u8>> {
    if data.len() > len {
        return None;
    }
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(data);
    out.resize(len, pad);
    Some(out)
}

// Built-in rules are known to fit, so the padding cannot fail.
fn builtin(pattern: &str, replacement: &str) -> RewriteRule {
    debug_assert!(replacement.len() <= pattern.len());
    let mut padded = replacement.as_bytes().to_vec();
    padded.resize(pattern.len(), b' ');
    RewriteRule {
        pattern: pattern.as_bytes().to_vec(),
        replacement: padded,
    }
}

/// Rewrite every occurrence of `rule.pattern` in `buffer` in place.
///
/// Returns the number of replacements made. The buffer length never changes.
pub fn rewrite_in_place(buffer: &mut [u8], rule: &RewriteRule) -> usize {
    let pattern = rule.pattern();
    let replacement = rule.replacement();
    let mut matched = 0;
    let mut replaced = 0;

    for i in 0..buffer.len() {
        if buffer[i] != pattern[matched] {
            matched = 0;
            continue;
        }

        matched += 1;
        if matched != pattern.len() {
            continue;
        }

        let start = i + 1 - pattern.len();
        buffer[start..=i].copy_from_slice(replacement);
        matched = 0;
        replaced += 1;
    }

    replaced
}

/// An ordered set of rules applied to each chunk on its way to the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteSet {
    rules: Vec<RewriteRule>,
}

impl RewriteSet {
    /// A set that leaves every byte untouched.
    pub fn disabled() -> Self {
        Self { rules: Vec::new() }
    }

    /// Downgrade MySQL 8 `utf8mb4` declarations to `utf8`.
    pub fn charset_normalization() -> Self {
        Self {
            rules: vec![
                builtin(MYSQL8_COLLATION, LEGACY_COLLATION),
                builtin(MYSQL8_CHARSET_DECL, LEGACY_CHARSET_DECL),
            ],
        }
    }

    pub fn with_rule(mut self, rule: RewriteRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Apply every rule in order; returns the total number of replacements.
    pub fn apply(&self, buffer: &mut [u8]) -> usize {
        self.rules
            .iter()
            .map(|rule| rewrite_in_place(buffer, rule))
            .sum()
    }
}

/// A rewrite rule as written in a YAML config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRuleConfig {
    pub find: String,
    pub replace: String,
}

impl TryFrom<&RewriteRuleConfig> for RewriteRule {
    type Error = RewriteError;

    fn try_from(config: &RewriteRuleConfig) -> Result<Self, Self::Error> {
        RewriteRule::new(config.find.as_bytes(), config.replace.as_bytes())
    }
}
