//! Inscript AST types
//!
//! These types represent the parsed structure of a contract source file.
//! All nodes are immutable after construction. The linearizer consumes a
//! `SourceUnit` only through its declaration list (names, parents, bodies)
//! and the canonical printer turns a rewritten unit back into text.

use crate::parser::tokenizer::Span;

/// One parsed source file: an optional pragma plus contract declarations
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    pub pragma: Option<Pragma>,
    pub contracts: Vec<ContractDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pragma {
    pub version: String,
    pub span: Span,
}

/// A raw contract declaration before dependency resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDecl {
    pub name: String,
    pub parents: Vec<String>,
    pub is_abstract: bool,
    pub is_upgradeable: bool,
    pub items: Vec<Item>,
    pub span: Span,
}

impl ContractDecl {
    pub fn storage_decls(&self) -> impl Iterator<Item = &StorageDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Storage(decl) => Some(decl),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(decl) => Some(decl),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Storage(StorageDecl),
    Function(FunctionDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

/// Storage/parameter type
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Uint,
    Bool,
    StringTy,
    Address,
    Map(Box<TypeExpr>, Box<TypeExpr>),
}

impl std::fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TypeExpr::Uint => write!(f, "uint"),
            TypeExpr::Bool => write!(f, "bool"),
            TypeExpr::StringTy => write!(f, "string"),
            TypeExpr::Address => write!(f, "address"),
            TypeExpr::Map(key, value) => write!(f, "map<{}, {}>", key, value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub visibility: Visibility,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl FunctionDecl {
    /// The construction entry point never appears in the public ABI
    pub fn is_constructor(&self) -> bool {
        self.name == "constructor"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        value: Expr,
    },
    Assign {
        target: LValue,
        op: AssignOp,
        value: Expr,
    },
    Require {
        cond: Expr,
        message: String,
    },
    Emit {
        event: String,
        args: Vec<Expr>,
    },
    Return {
        value: Option<Expr>,
    },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    Var(String),
    Index { name: String, key: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Integer(i64),
    Str(String),
    Bool(bool),
    AddressLit(String),
    Ident(String),
    Index {
        name: String,
        key: Box<Expr>,
    },
    MsgSender,
    BlockNumber,
    BlockTimestamp,
    BlockChainId,
    /// Same-contract call; resolves through the merged function table
    InternalCall {
        function: String,
        args: Vec<Expr>,
    },
    /// Cross-contract call; a failure propagates to this frame
    ExternalCall {
        to: Box<Expr>,
        function: String,
        args: Vec<Expr>,
    },
    /// Low-level cross-contract call; evaluates to a success boolean
    TryCall {
        to: Box<Expr>,
        function: String,
        args: Vec<Expr>,
    },
    /// Swap the bound contract type (upgradeable contracts only)
    Upgrade {
        new_hash: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}
