// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expression compiler: tokens to postfix, postfix to a binary tree.
//!
//! Precedence is fixed (`||` below `&&`); comparisons are validated while
//! the postfix queue is built, so evaluation never has to type-check.

use crate::token::{CmpOp, Spanned, Token, Variable};
use crate::MatcherError;
use hs_core::{FieldRef, Message};
use regex::bytes::Regex;

#[derive(Debug)]
pub(crate) enum Node {
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Literal(bool),
    Cmp(Comparison),
}

#[derive(Debug)]
pub(crate) struct Comparison {
    subject: Variable,
    op: CmpOp,
    value: CmpValue,
}

#[derive(Debug)]
pub(crate) enum CmpValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Pattern(Regex),
    Nil,
}

enum PostItem {
    Leaf(Node),
    And,
    Or,
}

enum StackOp {
    And,
    Or,
    LParen,
}

fn precedence(op: &StackOp) -> u8 {
    match op {
        StackOp::And => 2,
        StackOp::Or => 1,
        StackOp::LParen => 0,
    }
}

fn is_string_header(v: &Variable) -> bool {
    matches!(
        v,
        Variable::Uuid
            | Variable::Type
            | Variable::Logger
            | Variable::Payload
            | Variable::EnvVersion
            | Variable::Hostname
    )
}

fn is_numeric_header(v: &Variable) -> bool {
    matches!(
        v,
        Variable::Timestamp | Variable::Severity | Variable::Pid
    )
}

fn is_relational(op: CmpOp) -> bool {
    !matches!(op, CmpOp::Re | CmpOp::NotRe)
}

impl Comparison {
    fn build(
        subject: Variable,
        op: CmpOp,
        value: &Token,
        pos: usize,
    ) -> Result<Self, MatcherError> {
        let value = match value {
            Token::Str(s) => CmpValue::Str(s.clone()),
            Token::Num(n) => CmpValue::Num(*n),
            Token::True => CmpValue::Bool(true),
            Token::False => CmpValue::Bool(false),
            Token::Nil => CmpValue::Nil,
            Token::Regex(src) => CmpValue::Pattern(Regex::new(src)?),
            _ => return Err(MatcherError::UnexpectedToken(pos)),
        };
        let cmp = Self { subject, op, value };
        cmp.validate(pos)?;
        Ok(cmp)
    }

    fn validate(&self, pos: usize) -> Result<(), MatcherError> {
        let ok = match (&self.subject, &self.value) {
            (s, CmpValue::Str(_)) if is_string_header(s) => is_relational(self.op),
            (s, CmpValue::Pattern(_)) if is_string_header(s) => !is_relational(self.op),
            (s, CmpValue::Num(_)) if is_numeric_header(s) => is_relational(self.op),
            (Variable::Field { .. }, CmpValue::Str(_) | CmpValue::Num(_)) => {
                is_relational(self.op)
            }
            (Variable::Field { .. }, CmpValue::Pattern(_)) => !is_relational(self.op),
            (Variable::Field { .. }, CmpValue::Bool(_) | CmpValue::Nil) => {
                matches!(self.op, CmpOp::Eq | CmpOp::Ne)
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(MatcherError::InvalidComparison(pos))
        }
    }

    fn eval(&self, m: &Message) -> bool {
        let lhs = resolve(&self.subject, m);
        match (&lhs, &self.value) {
            // NIL tests existence and nothing else
            (Lhs::Missing, CmpValue::Nil) => self.op == CmpOp::Eq,
            (_, CmpValue::Nil) => self.op == CmpOp::Ne,
            (Lhs::Missing, _) => false,
            (Lhs::Bytes(v), CmpValue::Str(s)) => ord_matches(v.cmp(&s.as_bytes()), self.op),
            (Lhs::Bytes(v), CmpValue::Pattern(re)) => match self.op {
                CmpOp::Re => re.is_match(v),
                CmpOp::NotRe => !re.is_match(v),
                _ => false,
            },
            (Lhs::Num(d), CmpValue::Num(n)) => num_matches(*d, *n, self.op),
            (Lhs::Bool(b), CmpValue::Bool(want)) => match self.op {
                CmpOp::Eq => b == want,
                CmpOp::Ne => b != want,
                _ => false,
            },
            (Lhs::Bool(b), CmpValue::Num(n)) => {
                num_matches(if *b { 1.0 } else { 0.0 }, *n, self.op)
            }
            _ => false,
        }
    }
}

enum Lhs<'a> {
    Bytes(&'a [u8]),
    Num(f64),
    Bool(bool),
    Missing,
}

fn opt_bytes(s: &Option<String>) -> Lhs<'_> {
    match s {
        Some(s) => Lhs::Bytes(s.as_bytes()),
        None => Lhs::Missing,
    }
}

fn resolve<'a>(subject: &Variable, m: &'a Message) -> Lhs<'a> {
    match subject {
        Variable::Uuid => Lhs::Bytes(&m.uuid),
        Variable::Timestamp => Lhs::Num(m.timestamp as f64),
        Variable::Type => opt_bytes(&m.msg_type),
        Variable::Logger => opt_bytes(&m.logger),
        Variable::Severity => Lhs::Num(f64::from(m.severity)),
        Variable::Payload => opt_bytes(&m.payload),
        Variable::EnvVersion => opt_bytes(&m.env_version),
        Variable::Pid => Lhs::Num(f64::from(m.pid)),
        Variable::Hostname => opt_bytes(&m.hostname),
        Variable::Field { name, fi, ai } => match m.read_field(name, *fi, *ai) {
            Some(FieldRef::Str(s)) => Lhs::Bytes(s.as_bytes()),
            Some(FieldRef::Bytes(b)) => Lhs::Bytes(b),
            Some(FieldRef::Number(d)) => Lhs::Num(d),
            Some(FieldRef::Bool(b)) => Lhs::Bool(b),
            None => Lhs::Missing,
        },
    }
}

fn ord_matches(ord: std::cmp::Ordering, op: CmpOp) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Eq => ord == Equal,
        CmpOp::Ne => ord != Equal,
        CmpOp::Lt => ord == Less,
        CmpOp::Lte => ord != Greater,
        CmpOp::Gt => ord == Greater,
        CmpOp::Gte => ord != Less,
        CmpOp::Re | CmpOp::NotRe => false,
    }
}

fn num_matches(lhs: f64, rhs: f64, op: CmpOp) -> bool {
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Lt => lhs < rhs,
        CmpOp::Lte => lhs <= rhs,
        CmpOp::Gt => lhs > rhs,
        CmpOp::Gte => lhs >= rhs,
        CmpOp::Re | CmpOp::NotRe => false,
    }
}

impl Node {
    /// Short-circuit evaluation, left to right.
    pub(crate) fn eval(&self, m: &Message) -> bool {
        match self {
            Node::And(l, r) => l.eval(m) && r.eval(m),
            Node::Or(l, r) => l.eval(m) || r.eval(m),
            Node::Literal(b) => *b,
            Node::Cmp(c) => c.eval(m),
        }
    }
}

/// Compile a token stream into an evaluable tree.
pub(crate) fn parse(tokens: &[Spanned]) -> Result<Node, MatcherError> {
    let mut output: Vec<PostItem> = Vec::new();
    let mut ops: Vec<StackOp> = Vec::new();
    let mut expect_test = true;

    let mut iter = tokens.iter();
    while let Some(spanned) = iter.next() {
        let pos = spanned.pos;
        match (&spanned.token, expect_test) {
            (Token::LParen, true) => ops.push(StackOp::LParen),
            (Token::True, true) => {
                output.push(PostItem::Leaf(Node::Literal(true)));
                expect_test = false;
            }
            (Token::False, true) => {
                output.push(PostItem::Leaf(Node::Literal(false)));
                expect_test = false;
            }
            (Token::Variable(var), true) => {
                let op = match iter.next() {
                    Some(Spanned {
                        token: Token::Op(op),
                        ..
                    }) => *op,
                    Some(other) => return Err(MatcherError::UnexpectedToken(other.pos)),
                    None => return Err(MatcherError::UnexpectedEnd),
                };
                let value = iter.next().ok_or(MatcherError::UnexpectedEnd)?;
                let cmp = Comparison::build(var.clone(), op, &value.token, value.pos)?;
                output.push(PostItem::Leaf(Node::Cmp(cmp)));
                expect_test = false;
            }
            (Token::And | Token::Or, false) => {
                let (item, prec) = if spanned.token == Token::And {
                    (StackOp::And, precedence(&StackOp::And))
                } else {
                    (StackOp::Or, precedence(&StackOp::Or))
                };
                while let Some(top) = ops.last() {
                    if precedence(top) >= prec {
                        match ops.pop() {
                            Some(StackOp::And) => output.push(PostItem::And),
                            Some(StackOp::Or) => output.push(PostItem::Or),
                            _ => break,
                        }
                    } else {
                        break;
                    }
                }
                ops.push(item);
                expect_test = true;
            }
            (Token::RParen, false) => loop {
                match ops.pop() {
                    Some(StackOp::And) => output.push(PostItem::And),
                    Some(StackOp::Or) => output.push(PostItem::Or),
                    Some(StackOp::LParen) => break,
                    None => return Err(MatcherError::UnbalancedParens),
                }
            },
            _ => return Err(MatcherError::UnexpectedToken(pos)),
        }
    }

    if expect_test {
        return Err(MatcherError::UnexpectedEnd);
    }
    while let Some(op) = ops.pop() {
        match op {
            StackOp::And => output.push(PostItem::And),
            StackOp::Or => output.push(PostItem::Or),
            StackOp::LParen => return Err(MatcherError::UnbalancedParens),
        }
    }

    // reassemble the postfix queue into a tree
    let mut stack: Vec<Node> = Vec::new();
    for item in output {
        match item {
            PostItem::Leaf(node) => stack.push(node),
            PostItem::And => {
                let (l, r) = pop_pair(&mut stack)?;
                stack.push(Node::And(Box::new(l), Box::new(r)));
            }
            PostItem::Or => {
                let (l, r) = pop_pair(&mut stack)?;
                stack.push(Node::Or(Box::new(l), Box::new(r)));
            }
        }
    }
    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok(root),
        _ => Err(MatcherError::UnexpectedEnd),
    }
}

fn pop_pair(stack: &mut Vec<Node>) -> Result<(Node, Node), MatcherError> {
    let r = stack.pop().ok_or(MatcherError::UnexpectedEnd)?;
    let l = stack.pop().ok_or(MatcherError::UnexpectedEnd)?;
    Ok((l, r))
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
