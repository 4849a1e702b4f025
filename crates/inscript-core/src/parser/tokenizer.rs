//! Inscript tokenizer — converts contract source into a token stream
//!
//! Handles: keywords, identifiers, string literals, integer literals,
//! 40-hex address literals, symbols (braces, parens, operators).
//! Comments (//) are discarded.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Error reporting with line:column for every failure

use crate::{Error, Result};

/// Token types for Inscript syntax
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Pragma,
    Contract,
    Is,
    Abstract,
    Upgradeable,
    Storage,
    Fn,
    Public,
    Internal,
    Let,
    Require,
    Emit,
    Return,
    If,
    Else,
    Call,
    TryCall,
    Upgrade,

    // Type keywords
    UintType,
    BoolType,
    StringType,
    AddressType,
    MapType,

    // Literals
    StringLiteral(String),
    IntegerLiteral(i64),
    AddressLiteral(String),
    BooleanLiteral(bool),

    // Symbols
    LBrace,    // {
    RBrace,    // }
    LParen,    // (
    RParen,    // )
    LBracket,  // [
    RBracket,  // ]
    Lt,        // <
    Gt,        // >
    Le,        // <=
    Ge,        // >=
    EqEq,      // ==
    NotEq,     // !=
    Eq,        // =
    PlusEq,    // +=
    MinusEq,   // -=
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Bang,      // !
    AndAnd,    // &&
    OrOr,      // ||
    Colon,     // :
    Semicolon, // ;
    Comma,     // ,
    Dot,       // .

    // Other
    Identifier(String),
    Eof,
}

/// Position in source text for error reporting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token with source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenizer for Inscript source text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Tokenizer {
    /// Create a new tokenizer for the given input text
    pub fn new(text: &str) -> Self {
        Tokenizer {
            input: text.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments();

            if self.is_at_end() {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    span: self.current_span(),
                });
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if let Some(c) = ch {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    // ── Whitespace & Comments ──────────────────────────────

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.advance();
            }
            if self.peek() == Some('/') && self.peek_ahead(1) == Some('/') {
                while matches!(self.peek(), Some(c) if c != '\n') {
                    self.advance();
                }
                continue;
            }
            break;
        }
    }

    // ── Token scanning ─────────────────────────────────────

    fn next_token(&mut self) -> Result<SpannedToken> {
        let span = self.current_span();
        let ch = match self.peek() {
            Some(c) => c,
            None => {
                return Ok(SpannedToken {
                    token: Token::Eof,
                    span,
                })
            }
        };

        let token = if ch == '"' {
            self.scan_string()?
        } else if ch == '0' && self.peek_ahead(1) == Some('x') {
            self.scan_address()?
        } else if ch.is_ascii_digit() {
            self.scan_integer()?
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            self.scan_word()
        } else {
            self.scan_symbol()?
        };

        Ok(SpannedToken { token, span })
    }

    fn scan_string(&mut self) -> Result<Token> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.advance() {
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some(c) => return Err(self.error(format!("unknown escape '\\{}'", c))),
                    None => return Err(self.error("unterminated string literal")),
                },
                Some('\n') | None => return Err(self.error("unterminated string literal")),
                Some(c) => value.push(c),
            }
        }
        Ok(Token::StringLiteral(value))
    }

    fn scan_address(&mut self) -> Result<Token> {
        self.advance(); // 0
        self.advance(); // x
        let mut hex = String::new();
        while let Some(c) = self.peek() {
            if !c.is_ascii_hexdigit() {
                break;
            }
            self.advance();
            hex.push(c);
        }
        if hex.len() != 40 {
            return Err(self.error(format!(
                "address literal must be 40 hex digits, got {}",
                hex.len()
            )));
        }
        Ok(Token::AddressLiteral(format!("0x{}", hex.to_lowercase())))
    }

    fn scan_integer(&mut self) -> Result<Token> {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() && c != '_' {
                break;
            }
            self.advance();
            if c != '_' {
                digits.push(c);
            }
        }
        digits
            .parse::<i64>()
            .map(Token::IntegerLiteral)
            .map_err(|_| self.error(format!("integer literal out of range: {}", digits)))
    }

    fn scan_word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            self.advance();
            word.push(c);
        }
        match word.as_str() {
            "pragma" => Token::Pragma,
            "contract" => Token::Contract,
            "is" => Token::Is,
            "abstract" => Token::Abstract,
            "upgradeable" => Token::Upgradeable,
            "storage" => Token::Storage,
            "fn" => Token::Fn,
            "public" => Token::Public,
            "internal" => Token::Internal,
            "let" => Token::Let,
            "require" => Token::Require,
            "emit" => Token::Emit,
            "return" => Token::Return,
            "if" => Token::If,
            "else" => Token::Else,
            "call" => Token::Call,
            "try_call" => Token::TryCall,
            "upgrade" => Token::Upgrade,
            "true" => Token::BooleanLiteral(true),
            "false" => Token::BooleanLiteral(false),
            "uint" => Token::UintType,
            "bool" => Token::BoolType,
            "string" => Token::StringType,
            "address" => Token::AddressType,
            "map" => Token::MapType,
            _ => Token::Identifier(word),
        }
    }

    fn scan_symbol(&mut self) -> Result<Token> {
        let ch = match self.advance() {
            Some(c) => c,
            None => return Err(self.error("unexpected end of input")),
        };
        let token = match ch {
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ':' => Token::Colon,
            ';' => Token::Semicolon,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '*' => Token::Star,
            '/' => Token::Slash,
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::EqEq
                } else {
                    Token::Eq
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::NotEq
                } else {
                    Token::Bang
                }
            }
            '+' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::PlusEq
                } else {
                    Token::Plus
                }
            }
            '-' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::MinusEq
                } else {
                    Token::Minus
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.advance();
                    Token::AndAnd
                } else {
                    return Err(self.error("expected '&&'"));
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.advance();
                    Token::OrOr
                } else {
                    return Err(self.error("expected '||'"));
                }
            }
            other => return Err(self.error(format!("unexpected character '{}'", other))),
        };
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens_of(text: &str) -> Vec<Token> {
        Tokenizer::new(text)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_tokenize_contract_header() {
        let tokens = tokens_of("contract Token is Ownable {");
        assert_eq!(
            tokens,
            vec![
                Token::Contract,
                Token::Identifier("Token".into()),
                Token::Is,
                Token::Identifier("Ownable".into()),
                Token::LBrace,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_comments_discarded() {
        let tokens = tokens_of("// header comment\nstorage x: uint; // trailing\n");
        assert_eq!(
            tokens,
            vec![
                Token::Storage,
                Token::Identifier("x".into()),
                Token::Colon,
                Token::UintType,
                Token::Semicolon,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokens_of("a += 1; b == c; d != e; f <= g;");
        assert!(tokens.contains(&Token::PlusEq));
        assert!(tokens.contains(&Token::EqEq));
        assert!(tokens.contains(&Token::NotEq));
        assert!(tokens.contains(&Token::Le));
    }

    #[test]
    fn test_tokenize_address_literal() {
        let addr = "0xC2172a6315c1D7f6855768F843c420EbB36eDa97";
        let tokens = tokens_of(addr);
        assert_eq!(
            tokens[0],
            Token::AddressLiteral(addr.to_lowercase()),
            "address literals are lowercased"
        );
    }

    #[test]
    fn test_tokenize_bad_address_length() {
        let result = Tokenizer::new("0xabc").tokenize();
        assert!(result.is_err());
    }

    #[test]
    fn test_tokenize_string_escapes() {
        let tokens = tokens_of(r#""line\none""#);
        assert_eq!(tokens[0], Token::StringLiteral("line\none".into()));
    }

    #[test]
    fn test_unterminated_string_errors_with_position() {
        let err = Tokenizer::new("\"abc").tokenize().unwrap_err();
        match err {
            Error::Parse { line, .. } => assert_eq!(line, 1),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_spans_track_lines() {
        let spanned = Tokenizer::new("contract A {\n}\n").tokenize().unwrap();
        let rbrace = spanned
            .iter()
            .find(|t| t.token == Token::RBrace)
            .unwrap();
        assert_eq!(rbrace.span.line, 2);
    }
}
