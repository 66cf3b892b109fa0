// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lexer for the message-matcher expression language.

use crate::MatcherError;

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// `=~` regex match.
    Re,
    /// `!~` negated regex match.
    NotRe,
}

/// A comparison subject: a fixed message header or a user-field reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    Uuid,
    Timestamp,
    Type,
    Logger,
    Severity,
    Payload,
    EnvVersion,
    Pid,
    Hostname,
    Field { name: String, fi: usize, ai: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Variable(Variable),
    Op(CmpOp),
    And,
    Or,
    LParen,
    RParen,
    Str(String),
    Num(f64),
    Regex(String),
    True,
    False,
    Nil,
}

/// A token plus its byte offset, for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, pos: usize) -> MatcherError {
        MatcherError::UnexpectedChar {
            pos,
            ch: self.src[pos..]
                .iter()
                .next()
                .map(|&b| b as char)
                .unwrap_or('?'),
        }
    }

    /// Quoted string; the backslash escapes the active quote character.
    fn string(&mut self, quote: u8) -> Result<Token, MatcherError> {
        let mut out: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                None => return Err(MatcherError::UnterminatedString),
                Some(b'\\') if self.peek() == Some(quote) => {
                    self.pos += 1;
                    out.push(quote);
                }
                Some(b) if b == quote => {
                    // the source is valid utf-8 and only ascii pairs were
                    // collapsed, so this cannot be lossy
                    return Ok(Token::Str(String::from_utf8_lossy(&out).into_owned()));
                }
                Some(b) => out.push(b),
            }
        }
    }

    /// `/regex/` literal; `\/` escapes the delimiter.
    fn regex(&mut self) -> Result<Token, MatcherError> {
        let mut out: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                None => return Err(MatcherError::UnterminatedRegex),
                Some(b'\\') if self.peek() == Some(b'/') => {
                    self.pos += 1;
                    out.push(b'/');
                }
                Some(b'/') => return Ok(Token::Regex(String::from_utf8_lossy(&out).into_owned())),
                Some(b) => out.push(b),
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<Token, MatcherError> {
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-') {
                // sign bytes are only valid right after an exponent marker
                if matches!(b, b'+' | b'-')
                    && !matches!(self.src.get(self.pos - 1), Some(b'e') | Some(b'E'))
                {
                    break;
                }
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| MatcherError::BadNumber(start))?;
        text.parse::<f64>()
            .map(Token::Num)
            .map_err(|_| MatcherError::BadNumber(start))
    }

    fn index(&mut self) -> Result<usize, MatcherError> {
        // `[digits]`, defaulting to 0 when absent
        if !self.eat(b'[') {
            return Ok(0);
        }
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos || !self.eat(b']') {
            return Err(MatcherError::BadIndex(start));
        }
        std::str::from_utf8(&self.src[start..self.pos - 1])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(MatcherError::BadIndex(start))
    }

    fn fields(&mut self) -> Result<Token, MatcherError> {
        // caller consumed `Fields[`
        let start = self.pos;
        while self.peek().is_some_and(|b| b != b']') {
            self.pos += 1;
        }
        if !self.eat(b']') {
            return Err(MatcherError::BadIndex(start));
        }
        let name = String::from_utf8(self.src[start..self.pos - 1].to_vec())
            .map_err(|_| MatcherError::BadIndex(start))?;
        let fi = self.index()?;
        let ai = self.index()?;
        Ok(Token::Variable(Variable::Field { name, fi, ai }))
    }

    fn word(&mut self, start: usize) -> Result<Token, MatcherError> {
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        let word = &self.src[start..self.pos];
        if word == b"Fields" && self.eat(b'[') {
            return self.fields();
        }
        let token = match word {
            b"TRUE" => Token::True,
            b"FALSE" => Token::False,
            b"NIL" => Token::Nil,
            b"Uuid" => Token::Variable(Variable::Uuid),
            b"Timestamp" => Token::Variable(Variable::Timestamp),
            b"Type" => Token::Variable(Variable::Type),
            b"Logger" => Token::Variable(Variable::Logger),
            b"Severity" => Token::Variable(Variable::Severity),
            b"Payload" => Token::Variable(Variable::Payload),
            b"EnvVersion" => Token::Variable(Variable::EnvVersion),
            b"Pid" => Token::Variable(Variable::Pid),
            b"Hostname" => Token::Variable(Variable::Hostname),
            other => {
                return Err(MatcherError::UnknownVariable(
                    String::from_utf8_lossy(other).into_owned(),
                ))
            }
        };
        Ok(token)
    }
}

/// Tokenize a matcher expression.
pub fn tokenize(src: &str) -> Result<Vec<Spanned>, MatcherError> {
    let mut lex = Lexer {
        src: src.as_bytes(),
        pos: 0,
    };
    let mut out = Vec::new();
    while let Some(b) = lex.peek() {
        let pos = lex.pos;
        let token = match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                lex.pos += 1;
                continue;
            }
            b'(' => {
                lex.pos += 1;
                Token::LParen
            }
            b')' => {
                lex.pos += 1;
                Token::RParen
            }
            b'&' => {
                lex.pos += 1;
                if !lex.eat(b'&') {
                    return Err(lex.unexpected(pos));
                }
                Token::And
            }
            b'|' => {
                lex.pos += 1;
                if !lex.eat(b'|') {
                    return Err(lex.unexpected(pos));
                }
                Token::Or
            }
            b'=' => {
                lex.pos += 1;
                if lex.eat(b'=') {
                    Token::Op(CmpOp::Eq)
                } else if lex.eat(b'~') {
                    Token::Op(CmpOp::Re)
                } else {
                    return Err(lex.unexpected(pos));
                }
            }
            b'!' => {
                lex.pos += 1;
                if lex.eat(b'=') {
                    Token::Op(CmpOp::Ne)
                } else if lex.eat(b'~') {
                    Token::Op(CmpOp::NotRe)
                } else {
                    return Err(lex.unexpected(pos));
                }
            }
            b'<' => {
                lex.pos += 1;
                if lex.eat(b'=') {
                    Token::Op(CmpOp::Lte)
                } else {
                    Token::Op(CmpOp::Lt)
                }
            }
            b'>' => {
                lex.pos += 1;
                if lex.eat(b'=') {
                    Token::Op(CmpOp::Gte)
                } else {
                    Token::Op(CmpOp::Gt)
                }
            }
            b'"' | b'\'' => {
                lex.pos += 1;
                lex.string(b)?
            }
            b'/' => {
                lex.pos += 1;
                lex.regex()?
            }
            b'+' | b'-' | b'.' => {
                lex.pos += 1;
                lex.number(pos)?
            }
            b if b.is_ascii_digit() => {
                lex.pos += 1;
                lex.number(pos)?
            }
            b if b.is_ascii_alphabetic() => {
                lex.pos += 1;
                lex.word(pos)?
            }
            _ => return Err(lex.unexpected(pos)),
        };
        out.push(Spanned { token, pos });
    }
    Ok(out)
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
