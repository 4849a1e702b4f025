//! Inscript parser — tokenizer, AST types, and recursive descent parser
//!
//! Converts contract source text into a `SourceUnit`. Together with the
//! canonical printer this forms the parse/print pair the rest of the core
//! depends on; no other module inspects tokens directly.

pub mod ast;
pub mod tokenizer;

use crate::{Error, Result};
use ast::*;
use tokenizer::{Span, SpannedToken, Token, Tokenizer};

/// Parse Inscript source text into a `SourceUnit`
///
/// # Guarantees
/// - Deterministic: same input always produces same AST
///
/// # Errors
/// Returns `Error::Parse` with line:column for syntax violations.
pub fn parse(text: &str) -> Result<SourceUnit> {
    let tokens = Tokenizer::new(text).tokenize()?;
    Parser::new(tokens).parse_unit()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    // ── Token helpers ──────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)].token
    }

    fn span(&self) -> Span {
        self.tokens[self.position.min(self.tokens.len() - 1)].span
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.position.min(self.tokens.len() - 1)]
            .token
            .clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn check(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {:?}", what, self.peek())))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {}, found {:?}", what, other))),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<String> {
        match self.peek().clone() {
            Token::StringLiteral(value) => {
                self.advance();
                Ok(value)
            }
            other => Err(self.error(format!("expected {}, found {:?}", what, other))),
        }
    }

    fn error(&self, message: String) -> Error {
        let span = self.span();
        Error::Parse {
            line: span.line,
            column: span.column,
            message,
        }
    }

    // ── File ───────────────────────────────────────────────

    fn parse_unit(&mut self) -> Result<SourceUnit> {
        let pragma = self.parse_pragma()?;
        let mut contracts = Vec::new();
        while self.peek() != &Token::Eof {
            contracts.push(self.parse_contract()?);
        }
        Ok(SourceUnit { pragma, contracts })
    }

    fn parse_pragma(&mut self) -> Result<Option<Pragma>> {
        if self.peek() != &Token::Pragma {
            return Ok(None);
        }
        let span = self.span();
        self.advance();
        let lang = self.expect_identifier("language name after 'pragma'")?;
        if lang != "inscript" {
            return Err(self.error(format!("unknown pragma language '{}'", lang)));
        }
        let version = self.expect_string("pragma version string")?;
        self.expect(Token::Semicolon, "';' after pragma")?;
        Ok(Some(Pragma { version, span }))
    }

    // ── Declarations ───────────────────────────────────────

    fn parse_contract(&mut self) -> Result<ContractDecl> {
        let span = self.span();
        let mut is_abstract = false;
        let mut is_upgradeable = false;
        loop {
            match self.peek() {
                Token::Abstract => {
                    self.advance();
                    is_abstract = true;
                }
                Token::Upgradeable => {
                    self.advance();
                    is_upgradeable = true;
                }
                _ => break,
            }
        }
        self.expect(Token::Contract, "'contract'")?;
        let name = self.expect_identifier("contract name")?;

        let mut parents = Vec::new();
        if self.check(&Token::Is) {
            loop {
                parents.push(self.expect_identifier("parent contract name")?);
                if !self.check(&Token::Comma) {
                    break;
                }
            }
        }

        self.expect(Token::LBrace, "'{' opening contract body")?;
        let mut items = Vec::new();
        while self.peek() != &Token::RBrace {
            items.push(self.parse_item()?);
        }
        self.expect(Token::RBrace, "'}' closing contract body")?;

        Ok(ContractDecl {
            name,
            parents,
            is_abstract,
            is_upgradeable,
            items,
            span,
        })
    }

    fn parse_item(&mut self) -> Result<Item> {
        match self.peek() {
            Token::Storage => self.parse_storage().map(Item::Storage),
            Token::Fn => self.parse_function().map(Item::Function),
            other => Err(self.error(format!(
                "expected 'storage' or 'fn' in contract body, found {:?}",
                other
            ))),
        }
    }

    fn parse_storage(&mut self) -> Result<StorageDecl> {
        let span = self.span();
        self.expect(Token::Storage, "'storage'")?;
        let name = self.expect_identifier("storage variable name")?;
        self.expect(Token::Colon, "':' after storage variable name")?;
        let ty = self.parse_type()?;
        self.expect(Token::Semicolon, "';' after storage declaration")?;
        Ok(StorageDecl { name, ty, span })
    }

    fn parse_type(&mut self) -> Result<TypeExpr> {
        match self.advance() {
            Token::UintType => Ok(TypeExpr::Uint),
            Token::BoolType => Ok(TypeExpr::Bool),
            Token::StringType => Ok(TypeExpr::StringTy),
            Token::AddressType => Ok(TypeExpr::Address),
            Token::MapType => {
                self.expect(Token::Lt, "'<' after 'map'")?;
                let key = self.parse_type()?;
                self.expect(Token::Comma, "',' between map key and value types")?;
                let value = self.parse_type()?;
                self.expect(Token::Gt, "'>' closing map type")?;
                Ok(TypeExpr::Map(Box::new(key), Box::new(value)))
            }
            other => Err(self.error(format!("expected type, found {:?}", other))),
        }
    }

    fn parse_function(&mut self) -> Result<FunctionDecl> {
        let span = self.span();
        self.expect(Token::Fn, "'fn'")?;
        let name = self.expect_identifier("function name")?;
        self.expect(Token::LParen, "'(' after function name")?;

        let mut params = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                let param_name = self.expect_identifier("parameter name")?;
                self.expect(Token::Colon, "':' after parameter name")?;
                let ty = self.parse_type()?;
                params.push(Param {
                    name: param_name,
                    ty,
                });
                if !self.check(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')' closing parameter list")?;

        let visibility = if self.check(&Token::Internal) {
            Visibility::Internal
        } else {
            self.check(&Token::Public);
            Visibility::Public
        };

        self.expect(Token::LBrace, "'{' opening function body")?;
        let body = self.parse_block_body()?;

        Ok(FunctionDecl {
            name,
            params,
            visibility,
            body,
            span,
        })
    }

    // ── Statements ─────────────────────────────────────────

    /// Parse statements up to and including the closing '}'
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while self.peek() != &Token::RBrace {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(Token::RBrace, "'}' closing block")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Token::Let => {
                self.advance();
                let name = self.expect_identifier("local variable name")?;
                self.expect(Token::Eq, "'=' after 'let' name")?;
                let value = self.parse_expr()?;
                self.expect(Token::Semicolon, "';' after let statement")?;
                Ok(Stmt::Let { name, value })
            }
            Token::Require => {
                self.advance();
                self.expect(Token::LParen, "'(' after 'require'")?;
                let cond = self.parse_expr()?;
                self.expect(Token::Comma, "',' before require message")?;
                let message = self.expect_string("require message string")?;
                self.expect(Token::RParen, "')' closing require")?;
                self.expect(Token::Semicolon, "';' after require")?;
                Ok(Stmt::Require { cond, message })
            }
            Token::Emit => {
                self.advance();
                let event = self.expect_identifier("event name after 'emit'")?;
                self.expect(Token::LParen, "'(' after event name")?;
                let args = self.parse_args()?;
                self.expect(Token::Semicolon, "';' after emit")?;
                Ok(Stmt::Emit { event, args })
            }
            Token::Return => {
                self.advance();
                let value = if self.peek() == &Token::Semicolon {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(Token::Semicolon, "';' after return")?;
                Ok(Stmt::Return { value })
            }
            Token::If => self.parse_if(),
            _ => {
                let expr = self.parse_expr()?;
                let op = match self.peek() {
                    Token::Eq => Some(AssignOp::Assign),
                    Token::PlusEq => Some(AssignOp::AddAssign),
                    Token::MinusEq => Some(AssignOp::SubAssign),
                    _ => None,
                };
                if let Some(op) = op {
                    self.advance();
                    let target = Self::lvalue_of(expr)
                        .ok_or_else(|| self.error("invalid assignment target".into()))?;
                    let value = self.parse_expr()?;
                    self.expect(Token::Semicolon, "';' after assignment")?;
                    Ok(Stmt::Assign { target, op, value })
                } else {
                    self.expect(Token::Semicolon, "';' after expression")?;
                    Ok(Stmt::Expr(expr))
                }
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(Token::If, "'if'")?;
        let cond = self.parse_expr()?;
        self.expect(Token::LBrace, "'{' opening if body")?;
        let then_branch = self.parse_block_body()?;

        let else_branch = if self.check(&Token::Else) {
            if self.peek() == &Token::If {
                Some(vec![self.parse_if()?])
            } else {
                self.expect(Token::LBrace, "'{' opening else body")?;
                Some(self.parse_block_body()?)
            }
        } else {
            None
        };

        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn lvalue_of(expr: Expr) -> Option<LValue> {
        match expr {
            Expr::Ident(name) => Some(LValue::Var(name)),
            Expr::Index { name, key } => Some(LValue::Index { name, key: *key }),
            _ => None,
        }
    }

    // ── Expressions ────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.check(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.check(&Token::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                })
            }
            Token::Bang => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Token::IntegerLiteral(value) => {
                self.advance();
                Ok(Expr::Integer(value))
            }
            Token::StringLiteral(value) => {
                self.advance();
                Ok(Expr::Str(value))
            }
            Token::BooleanLiteral(value) => {
                self.advance();
                Ok(Expr::Bool(value))
            }
            Token::AddressLiteral(value) => {
                self.advance();
                Ok(Expr::AddressLit(value))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "')' closing parenthesized expression")?;
                Ok(expr)
            }
            Token::Call => {
                self.advance();
                let (to, function, args) = self.parse_cross_contract_args()?;
                Ok(Expr::ExternalCall { to, function, args })
            }
            Token::TryCall => {
                self.advance();
                let (to, function, args) = self.parse_cross_contract_args()?;
                Ok(Expr::TryCall { to, function, args })
            }
            Token::Upgrade => {
                self.advance();
                self.expect(Token::LParen, "'(' after 'upgrade'")?;
                let new_hash = self.parse_expr()?;
                self.expect(Token::RParen, "')' closing upgrade")?;
                Ok(Expr::Upgrade {
                    new_hash: Box::new(new_hash),
                })
            }
            Token::Identifier(name) => {
                self.advance();
                self.parse_postfix(name)
            }
            other => Err(self.error(format!("expected expression, found {:?}", other))),
        }
    }

    fn parse_postfix(&mut self, name: String) -> Result<Expr> {
        match self.peek() {
            Token::Dot => {
                self.advance();
                let member = self.expect_identifier("member name after '.'")?;
                match (name.as_str(), member.as_str()) {
                    ("msg", "sender") => Ok(Expr::MsgSender),
                    ("block", "number") => Ok(Expr::BlockNumber),
                    ("block", "timestamp") => Ok(Expr::BlockTimestamp),
                    ("block", "chainid") => Ok(Expr::BlockChainId),
                    _ => Err(self.error(format!("unknown member access {}.{}", name, member))),
                }
            }
            Token::LParen => {
                self.advance();
                let args = self.parse_args()?;
                Ok(Expr::InternalCall {
                    function: name,
                    args,
                })
            }
            Token::LBracket => {
                self.advance();
                let key = self.parse_expr()?;
                self.expect(Token::RBracket, "']' closing index")?;
                Ok(Expr::Index {
                    name,
                    key: Box::new(key),
                })
            }
            _ => Ok(Expr::Ident(name)),
        }
    }

    /// Parse `(to_expr, "function" [, arg...])` for call/try_call
    fn parse_cross_contract_args(&mut self) -> Result<(Box<Expr>, String, Vec<Expr>)> {
        self.expect(Token::LParen, "'(' after call keyword")?;
        let to = self.parse_expr()?;
        self.expect(Token::Comma, "',' after call target")?;
        let function = self.expect_string("function name string")?;
        let mut args = Vec::new();
        while self.check(&Token::Comma) {
            args.push(self.parse_expr()?);
        }
        self.expect(Token::RParen, "')' closing call")?;
        Ok((Box::new(to), function, args))
    }

    /// Parse argument list up to and including the closing ')'
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                args.push(self.parse_expr()?);
                if !self.check(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')' closing argument list")?;
        Ok(args)
    }
}
