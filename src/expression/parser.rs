//! Pratt parser for the expression mini-language.
//!
//! Binding powers, loosest first:
//! ```text
//! |            pipe (right side takes the rest of the expression)
//! ?:           ternary, right-associative
//! ??           coalesce
//! ||
//! &&
//! == != < <= > >= =~ in
//! + -
//! * / %
//! ! -          prefix
//! . [] ()      postfix
//! ```

use serde_json::Value;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::lexer::{Spanned, Token, tokenize};
use crate::pipeline::EvalError;

const PIPE: u8 = 1;
const TERNARY: u8 = 2;
const PREFIX: u8 = 9;

/// Parse expression source (without the leading `=`)
pub fn parse(src: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression(0)?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.unexpected(other.clone())),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvalError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(EvalError::syntax(
                self.offset(),
                format!("expected {:?}, found {:?}", expected, self.peek()),
            ))
        }
    }

    fn unexpected(&self, token: Token) -> EvalError {
        match token {
            Token::Eof => EvalError::syntax(self.offset(), "unexpected end of expression"),
            token => EvalError::syntax(self.offset(), format!("unexpected {:?}", token)),
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, EvalError> {
        let mut lhs = self.prefix()?;

        loop {
            let token = self.peek().clone();

            if let Some(bp) = postfix_bp(&token) {
                if bp < min_bp {
                    break;
                }
                lhs = self.postfix(lhs)?;
                continue;
            }

            match token {
                Token::Pipe if PIPE >= min_bp => {
                    self.advance();
                    let rhs = self.expression(PIPE)?;
                    lhs = Expr::Pipe(Box::new(lhs), Box::new(rhs));
                }
                Token::Question if TERNARY >= min_bp => {
                    self.advance();
                    let then = self.expression(0)?;
                    self.expect(Token::Colon)?;
                    let otherwise = self.expression(TERNARY)?;
                    lhs = Expr::Ternary(Box::new(lhs), Box::new(then), Box::new(otherwise));
                }
                _ => {
                    let Some((op, lbp, rbp)) = infix_bp(&token) else {
                        break;
                    };
                    if lbp < min_bp {
                        break;
                    }
                    self.advance();
                    let rhs = self.expression(rbp)?;
                    lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
                }
            }
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::JsonPath(path) => Ok(Expr::JsonPath(path)),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "nil" => Ok(Expr::Literal(Value::Null)),
                _ if *self.peek() == Token::LParen => {
                    self.advance();
                    let args = self.list(Token::RParen)?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Ident(name)),
            },
            Token::Not => {
                let operand = self.expression(PREFIX)?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)))
            }
            Token::Minus => {
                let operand = self.expression(PREFIX)?;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)))
            }
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(self.list(Token::RBracket)?)),
            Token::LBrace => self.map(),
            other => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected(other))
            }
        }
    }

    fn postfix(&mut self, lhs: Expr) -> Result<Expr, EvalError> {
        match self.advance() {
            Token::Dot => match self.advance() {
                Token::Ident(name) => Ok(Expr::Field(Box::new(lhs), name)),
                other => {
                    self.pos = self.pos.saturating_sub(1);
                    Err(self.unexpected(other))
                }
            },
            Token::LBracket => {
                let index = self.expression(0)?;
                self.expect(Token::RBracket)?;
                Ok(Expr::Index(Box::new(lhs), Box::new(index)))
            }
            other => Err(self.unexpected(other)),
        }
    }

    /// Comma-separated expressions up to `close` (already past the opener)
    fn list(&mut self, close: Token) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        if *self.peek() == close {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            if *self.peek() == Token::Comma {
                self.advance();
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn map(&mut self) -> Result<Expr, EvalError> {
        let mut entries = Vec::new();
        if *self.peek() == Token::RBrace {
            self.advance();
            return Ok(Expr::Map(entries));
        }
        loop {
            let key = match self.advance() {
                Token::Str(s) | Token::Ident(s) => s,
                other => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.unexpected(other));
                }
            };
            self.expect(Token::Colon)?;
            entries.push((key, self.expression(0)?));
            if *self.peek() == Token::Comma {
                self.advance();
                continue;
            }
            self.expect(Token::RBrace)?;
            return Ok(Expr::Map(entries));
        }
    }
}

fn postfix_bp(token: &Token) -> Option<u8> {
    match token {
        Token::Dot | Token::LBracket => Some(10),
        _ => None,
    }
}

/// (operator, left binding power, right binding power)
fn infix_bp(token: &Token) -> Option<(BinaryOp, u8, u8)> {
    let entry = match token {
        Token::Coalesce => (BinaryOp::Coalesce, 3, 4),
        Token::OrOr => (BinaryOp::Or, 4, 5),
        Token::AndAnd => (BinaryOp::And, 5, 6),
        Token::EqEq => (BinaryOp::Eq, 6, 7),
        Token::NotEq => (BinaryOp::Ne, 6, 7),
        Token::Lt => (BinaryOp::Lt, 6, 7),
        Token::Le => (BinaryOp::Le, 6, 7),
        Token::Gt => (BinaryOp::Gt, 6, 7),
        Token::Ge => (BinaryOp::Ge, 6, 7),
        Token::Matches => (BinaryOp::Matches, 6, 7),
        Token::Ident(word) if word == "in" => (BinaryOp::In, 6, 7),
        Token::Plus => (BinaryOp::Add, 7, 8),
        Token::Minus => (BinaryOp::Sub, 7, 8),
        Token::Star => (BinaryOp::Mul, 8, 9),
        Token::Slash => (BinaryOp::Div, 8, 9),
        Token::Percent => (BinaryOp::Mod, 8, 9),
        _ => return None,
    };
    Some(entry)
}
