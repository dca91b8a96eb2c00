//! Reply matching rules
//!
//! Decides, without any I/O, whether an inbound datagram is the reply a
//! pending expectation is waiting for.

use std::fmt;

use regex::Regex;

use crate::core::{Error, Result};
use super::message::Datagram;

/// How a pending expectation recognises its reply
#[derive(Clone)]
pub enum MatchRule {
    /// Reply has exactly this many non-empty lines
    ExactLineCount(usize),
    /// Reply text matches this expression, anchored at the start of the payload
    Pattern(Regex),
}

impl MatchRule {
    /// Compiles a pattern rule. The expression is anchored at the start of the
    /// whole payload but may leave trailing text unmatched.
    pub fn pattern(expr: &str) -> Result<Self> {
        let regex = Regex::new(&format!(r"\A(?:{})", expr))
            .map_err(|e| Error::config(format!("invalid reply pattern {:?}: {}", expr, e)))?;
        Ok(MatchRule::Pattern(regex))
    }

    /// Builds a rule from a line count and an optional pattern; the pattern wins
    pub fn from_parts(expected_lines: usize, pattern: Option<&str>) -> Result<Self> {
        match pattern {
            Some(expr) => Self::pattern(expr),
            None => Ok(MatchRule::ExactLineCount(expected_lines)),
        }
    }
}

impl fmt::Debug for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchRule::ExactLineCount(n) => f.debug_tuple("ExactLineCount").field(n).finish(),
            MatchRule::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
        }
    }
}

/// What a successful match captured
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchDetails {
    /// Capture groups by index; group 0 is the matched prefix. Empty for line-count rules.
    pub groups: Vec<Option<String>>,
}

/// Tries one rule against a datagram
pub fn matches(rule: &MatchRule, datagram: &Datagram) -> Option<MatchDetails> {
    if datagram.is_nak() {
        return None;
    }

    match rule {
        MatchRule::Pattern(regex) => regex.captures(&datagram.text).map(|caps| MatchDetails {
            groups: caps
                .iter()
                .map(|group| group.map(|m| m.as_str().to_owned()))
                .collect(),
        }),
        MatchRule::ExactLineCount(n) => {
            (datagram.lines.len() == *n).then(MatchDetails::default)
        }
    }
}
