// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Tag conditions gating conditional writes
//!
//! A condition compares a single tag of the object currently stored at the
//! destination against a literal, for example:
//!
//! ```text
//! "MyTag" < '1'
//! ```
//!
//! The tag key is double quoted, the literal single quoted (a quote inside
//! the literal is written `''`), and the operator is one of `<`, `<=`, `=`,
//! `>=` or `>`. If both the tag value and the literal parse as integers they
//! are compared numerically, otherwise they are compared lexicographically.
//! A condition referring to a tag the object does not carry is never
//! satisfied.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::tags::TagSet;
use crate::{Error, Result};

/// Number of parsed conditions retained by a [`ConditionEvaluator`]
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// A comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Operator {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl Operator {
    /// The textual form of this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ge => ">=",
            Self::Gt => ">",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering.is_lt(),
            Self::Le => ordering.is_le(),
            Self::Eq => ordering.is_eq(),
            Self::Ge => ordering.is_ge(),
            Self::Gt => ordering.is_gt(),
        }
    }
}

/// A parsed tag condition, see the [module docs](self)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCondition {
    key: String,
    op: Operator,
    literal: String,
}

impl TagCondition {
    /// Create a condition from its parts
    pub fn new(key: impl Into<String>, op: Operator, literal: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op,
            literal: literal.into(),
        }
    }

    /// Parse a condition, returning [`Error::InvalidPredicateSyntax`] if malformed
    pub fn parse(s: &str) -> Result<Self> {
        Parser { input: s, pos: 0 }.condition()
    }

    /// The tag key this condition inspects
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The comparison operator
    pub fn op(&self) -> Operator {
        self.op
    }

    /// The literal the tag value is compared against
    pub fn literal(&self) -> &str {
        &self.literal
    }

    /// Evaluate this condition against a snapshot of an object's tags
    pub fn evaluate(&self, tags: &TagSet) -> bool {
        match tags.get(&self.key) {
            Some(value) => self.op.accepts(compare(value, &self.literal)),
            None => false,
        }
    }
}

fn compare(value: &str, literal: &str) -> Ordering {
    match (value.parse::<i128>(), literal.parse::<i128>()) {
        (Ok(v), Ok(l)) => v.cmp(&l),
        _ => value.cmp(literal),
    }
}

impl FromStr for TagCondition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for TagCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "\"{}\" {} '{}'",
            self.key,
            self.op.as_str(),
            self.literal.replace('\'', "''")
        )
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> Error {
        Error::InvalidPredicateSyntax {
            predicate: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn expect(&mut self, c: char, what: &str) -> Result<()> {
        match self.rest().starts_with(c) {
            true => {
                self.pos += c.len_utf8();
                Ok(())
            }
            false => Err(self.error(format!("expected {what} at offset {}", self.pos))),
        }
    }

    fn condition(mut self) -> Result<TagCondition> {
        self.skip_whitespace();
        let key = self.key()?;
        self.skip_whitespace();
        let op = self.operator()?;
        self.skip_whitespace();
        let literal = self.literal()?;
        self.skip_whitespace();

        if !self.rest().is_empty() {
            return Err(self.error(format!("unexpected trailing input at offset {}", self.pos)));
        }
        Ok(TagCondition { key, op, literal })
    }

    fn key(&mut self) -> Result<String> {
        self.expect('"', "'\"' opening the tag key")?;
        let len = self
            .rest()
            .find('"')
            .ok_or_else(|| self.error("unterminated tag key"))?;
        let key = &self.rest()[..len];
        if key.is_empty() {
            return Err(self.error("empty tag key"));
        }
        self.pos += len + 1;
        Ok(key.to_string())
    }

    fn operator(&mut self) -> Result<Operator> {
        let rest = self.rest();
        let (op, len) = if rest.starts_with("<=") {
            (Operator::Le, 2)
        } else if rest.starts_with(">=") {
            (Operator::Ge, 2)
        } else if rest.starts_with('<') {
            (Operator::Lt, 1)
        } else if rest.starts_with('>') {
            (Operator::Gt, 1)
        } else if rest.starts_with('=') {
            (Operator::Eq, 1)
        } else {
            return Err(self.error(format!("expected operator at offset {}", self.pos)));
        };
        self.pos += len;
        Ok(op)
    }

    fn literal(&mut self) -> Result<String> {
        self.expect('\'', "''' opening the literal")?;
        let mut out = String::new();
        let mut chars = self.rest().char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if c != '\'' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some((_, '\'')) => {
                    chars.next();
                    out.push('\'');
                }
                _ => {
                    self.pos += idx + 1;
                    return Ok(out);
                }
            }
        }
        Err(self.error("unterminated literal"))
    }
}

/// Parses and evaluates [`TagCondition`]
///
/// Parsed conditions are cached by their source text, so repeatedly
/// evaluating the same predicate string only parses it once. The cache is
/// cleared once it holds [`DEFAULT_CACHE_CAPACITY`] entries.
#[derive(Debug)]
pub struct ConditionEvaluator {
    cache: Mutex<HashMap<String, Arc<TagCondition>>>,
    capacity: usize,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl ConditionEvaluator {
    /// Create a new [`ConditionEvaluator`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`ConditionEvaluator`] retaining at most `capacity` parsed conditions
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: Default::default(),
            capacity: capacity.max(1),
        }
    }

    /// Parse `predicate`, returning a cached result where available
    pub fn parse(&self, predicate: &str) -> Result<Arc<TagCondition>> {
        if let Some(parsed) = self.cache.lock().get(predicate) {
            return Ok(Arc::clone(parsed));
        }

        let parsed = Arc::new(TagCondition::parse(predicate)?);
        let mut cache = self.cache.lock();
        if cache.len() >= self.capacity {
            cache.clear();
        }
        cache.insert(predicate.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Evaluate a parsed condition against `tags`
    pub fn evaluate(&self, condition: &TagCondition, tags: &TagSet) -> bool {
        condition.evaluate(tags)
    }

    /// Parse and evaluate `predicate` against `tags`
    pub fn evaluate_str(&self, predicate: &str, tags: &TagSet) -> Result<bool> {
        Ok(self.parse(predicate)?.evaluate(tags))
    }

    /// Returns the number of cached conditions
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}
