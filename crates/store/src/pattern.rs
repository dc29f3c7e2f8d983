//! Glob-style key patterns.
//!
//! Only the two wildcards that key enumeration actually needs are supported:
//! `*` (any run of characters, including none) and `?` (exactly one
//! character). Every other character, including `[` and `\`, matches itself.

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use regex::Regex;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// A compiled key pattern, usable by every backend.
///
/// # Examples
///
/// ```
/// use fetchtrack_store::Pattern;
///
/// let pattern = Pattern::new("dfm:A:*").unwrap();
/// assert!(pattern.matches("dfm:A:0123abcd"));
/// assert!(!pattern.matches("dfm:B:0123abcd"));
/// ```
#[derive(Debug, Clone)]
pub struct Pattern {
    glob: String,
    regex: Regex,
}
impl Pattern {
    pub fn new(glob: impl Into<String>) -> Result<Self> {
        let glob = glob.into();
        let mut expr = String::with_capacity(glob.len() + 8);
        expr.push('^');
        for c in glob.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c => expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr).or_raise(|| ErrorKind::InvalidPattern(glob.clone()))?;
        Ok(Self { glob, regex })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The pattern as originally written.
    pub fn as_str(&self) -> &str {
        &self.glob
    }

    /// The pattern translated for SQLite's `GLOB` operator, which would
    /// otherwise treat `[` as the start of a character class.
    pub fn to_sqlite_glob(&self) -> String {
        self.glob.replace('[', "[[]")
    }
}
impl FromStr for Pattern {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}
impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.glob)
    }
}
