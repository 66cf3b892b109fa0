// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Message-matcher expression language.
//!
//! Analysis and output plugins declare a boolean expression over message
//! headers and user fields; the runtime compiles it once at plugin load and
//! evaluates it against every candidate message. Evaluation is infallible,
//! allocation free, and safe to run from multiple threads.
//!
//! ```
//! use hs_matcher::Matcher;
//! use hs_core::Message;
//!
//! let matcher = Matcher::new("Severity < 5 && Type == 'T'").unwrap();
//! let mut m = Message::new([0; 16], 1);
//! m.msg_type = Some("T".into());
//! m.severity = 3;
//! assert!(matcher.eval(&m));
//! ```

mod parser;
mod token;

use hs_core::Message;
use thiserror::Error;

/// Compile-time matcher failure; evaluation never fails.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("unexpected character {ch:?} at byte {pos}")]
    UnexpectedChar { pos: usize, ch: char },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated regex literal")]
    UnterminatedRegex,
    #[error("malformed number at byte {0}")]
    BadNumber(usize),
    #[error("malformed index at byte {0}")]
    BadIndex(usize),
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),
    #[error("invalid regex: {0}")]
    BadRegex(#[from] regex::Error),
    #[error("unexpected token at byte {0}")]
    UnexpectedToken(usize),
    #[error("invalid comparison at byte {0}")]
    InvalidComparison(usize),
    #[error("unbalanced parentheses")]
    UnbalancedParens,
    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

/// A compiled message matcher.
///
/// Immutable after construction; share it behind an `Arc` or a reference.
#[derive(Debug)]
pub struct Matcher {
    expression: String,
    root: parser::Node,
}

impl Matcher {
    /// Compile `expression`, failing on any syntax or type error.
    pub fn new(expression: &str) -> Result<Self, MatcherError> {
        let tokens = token::tokenize(expression)?;
        let root = parser::parse(&tokens)?;
        Ok(Self {
            expression: expression.to_owned(),
            root,
        })
    }

    /// Evaluate against a message. Short-circuits left to right.
    pub fn eval(&self, m: &Message) -> bool {
        self.root.eval(m)
    }

    /// The source expression this matcher was compiled from.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod tests;
