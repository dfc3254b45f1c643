use serde_json::Number;

use crate::pipeline::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(Number),
    Str(String),
    Ident(String),
    /// Raw JSONPath text, starting with `$`
    JsonPath(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Question,
    Coalesce,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Pipe,
    Matches,
    Eof,
}

/// A token and the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Split expression source into tokens, ending with [`Token::Eof`]
pub fn tokenize(src: &str) -> Result<Vec<Spanned>, EvalError> {
    let mut lexer = Lexer {
        src,
        bytes: src.as_bytes(),
        pos: 0,
    };
    let mut tokens = Vec::new();
    loop {
        lexer.skip_whitespace();
        let offset = lexer.pos;
        let token = lexer.next_token()?;
        let done = token == Token::Eof;
        tokens.push(Spanned { token, offset });
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<Token, EvalError> {
        let Some(b) = self.peek() else {
            return Ok(Token::Eof);
        };
        let two = |lexer: &mut Self, token: Token| {
            lexer.pos += 2;
            Ok(token)
        };
        let one = |lexer: &mut Self, token: Token| {
            lexer.pos += 1;
            Ok(token)
        };
        match (b, self.peek_at(1)) {
            (b'=', Some(b'=')) => two(self, Token::EqEq),
            (b'=', Some(b'~')) => two(self, Token::Matches),
            (b'!', Some(b'=')) => two(self, Token::NotEq),
            (b'<', Some(b'=')) => two(self, Token::Le),
            (b'>', Some(b'=')) => two(self, Token::Ge),
            (b'&', Some(b'&')) => two(self, Token::AndAnd),
            (b'|', Some(b'|')) => two(self, Token::OrOr),
            (b'?', Some(b'?')) => two(self, Token::Coalesce),
            (b'(', _) => one(self, Token::LParen),
            (b')', _) => one(self, Token::RParen),
            (b'[', _) => one(self, Token::LBracket),
            (b']', _) => one(self, Token::RBracket),
            (b'{', _) => one(self, Token::LBrace),
            (b'}', _) => one(self, Token::RBrace),
            (b',', _) => one(self, Token::Comma),
            (b':', _) => one(self, Token::Colon),
            (b'?', _) => one(self, Token::Question),
            (b'+', _) => one(self, Token::Plus),
            (b'-', _) => one(self, Token::Minus),
            (b'*', _) => one(self, Token::Star),
            (b'/', _) => one(self, Token::Slash),
            (b'%', _) => one(self, Token::Percent),
            (b'<', _) => one(self, Token::Lt),
            (b'>', _) => one(self, Token::Gt),
            (b'!', _) => one(self, Token::Not),
            (b'|', _) => one(self, Token::Pipe),
            (b'.', Some(d)) if d.is_ascii_digit() => self.number(),
            (b'.', _) => one(self, Token::Dot),
            (b'"', _) => self.double_quoted(),
            (b'`', _) => self.raw_string(),
            (b'$', _) => self.jsonpath(),
            (d, _) if d.is_ascii_digit() => self.number(),
            (c, _) if c.is_ascii_alphabetic() || c == b'_' => Ok(Token::Ident(self.ident())),
            _ => {
                let ch = self.src[self.pos..].chars().next().unwrap_or('?');
                Err(EvalError::syntax(
                    self.pos,
                    format!("unexpected character '{}'", ch),
                ))
            }
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        self.src[start..self.pos].to_string()
    }

    fn number(&mut self) -> Result<Token, EvalError> {
        let start = self.pos;
        let mut float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !float && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => {
                    float = true;
                    self.pos += 1;
                }
                b'e' | b'E' => {
                    float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+' | b'-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text = &self.src[start..self.pos];
        let invalid = || EvalError::syntax(start, format!("invalid number '{}'", text));
        if !float {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Token::Number(Number::from(i)));
            }
        }
        let f: f64 = text.parse().map_err(|_| invalid())?;
        Number::from_f64(f).map(Token::Number).ok_or_else(invalid)
    }

    fn double_quoted(&mut self) -> Result<Token, EvalError> {
        let start = self.pos;
        self.pos += 1;
        let mut escaped = false;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                b'\\' if !escaped => escaped = true,
                b'"' if !escaped => {
                    let literal = &self.src[start..self.pos];
                    return serde_json::from_str::<String>(literal)
                        .map(Token::Str)
                        .map_err(|e| EvalError::syntax(start, format!("invalid string: {}", e)));
                }
                _ => escaped = false,
            }
        }
        Err(EvalError::syntax(start, "unterminated string"))
    }

    fn raw_string(&mut self) -> Result<Token, EvalError> {
        let start = self.pos;
        let body = start + 1;
        match self.src[body..].find('`') {
            Some(len) => {
                self.pos = body + len + 1;
                Ok(Token::Str(self.src[body..body + len].to_string()))
            }
            None => Err(EvalError::syntax(start, "unterminated string")),
        }
    }

    /// `$` followed by `.name`, `..name`, `.*` and `[...]` segments
    fn jsonpath(&mut self) -> Result<Token, EvalError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek() {
                Some(b'.') => {
                    self.pos += 1;
                    if self.peek() == Some(b'.') {
                        self.pos += 1;
                    }
                    if self.peek() == Some(b'*') {
                        self.pos += 1;
                    } else {
                        self.ident();
                    }
                }
                Some(b'[') => self.bracket(start)?,
                _ => break,
            }
        }
        Ok(Token::JsonPath(self.src[start..self.pos].to_string()))
    }

    fn bracket(&mut self, path_start: usize) -> Result<(), EvalError> {
        let mut depth = 0usize;
        let mut quote: Option<u8> = None;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), b'\\') => self.pos += 1,
                (Some(_), _) => {}
                (None, b'\'' | b'"') => quote = Some(c),
                (None, b'[') => depth += 1,
                (None, b']') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(EvalError::syntax(path_start, "unterminated JSONPath bracket"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("a == b != c <= >= && || ?? ? =~ | !"),
            vec![
                Token::Ident("a".to_string()),
                Token::EqEq,
                Token::Ident("b".to_string()),
                Token::NotEq,
                Token::Ident("c".to_string()),
                Token::Le,
                Token::Ge,
                Token::AndAnd,
                Token::OrOr,
                Token::Coalesce,
                Token::Question,
                Token::Matches,
                Token::Pipe,
                Token::Not,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 1.5 2e3"),
            vec![
                Token::Number(Number::from(42)),
                Token::Number(Number::from_f64(1.5).unwrap()),
                Token::Number(Number::from_f64(2000.0).unwrap()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokens(r#""a\"b\n" `raw\n`"#),
            vec![
                Token::Str("a\"b\n".to_string()),
                Token::Str("raw\\n".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_jsonpath() {
        assert_eq!(
            tokens(r#"{"a": 1}| $.a..b[0]['x]y'] + 1"#)[6..],
            vec![
                Token::JsonPath("$.a..b[0]['x]y']".to_string()),
                Token::Plus,
                Token::Number(Number::from(1)),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize(r#""abc"#).unwrap_err();
        assert_eq!(err, EvalError::syntax(0, "unterminated string"));
    }

    #[test]
    fn test_unexpected_character() {
        assert!(matches!(
            tokenize("a # b"),
            Err(EvalError::Syntax { offset: 2, .. })
        ));
    }
}
