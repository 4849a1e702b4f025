//! Error types for the Inscript runtime
//!
//! All fallible operations return `Result<T, Error>`.
//! The taxonomy mirrors the protocol's propagation rules: validation and
//! dependency errors fail fast before execution, execution errors fail the
//! enclosing call frame, storage errors abort the whole transaction.

use thiserror::Error;

/// Inscript runtime error types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Syntax violation while parsing contract source
    #[error("Parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Payload shape, address format, or unknown op — raised before any
    /// state is touched
    #[error("Invalid payload: {0}")]
    Validation(String),

    /// Unresolvable contract parent, duplicate declaration, unknown init
    /// code hash — fatal to compilation/deployment
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Raised by contract logic (assertion failures, reverts); fails the
    /// enclosing call frame
    #[error("Contract execution error: {0}")]
    Execution(String),

    /// A contract execution error encountered during read-only simulation
    #[error("Static call error: {0}")]
    StaticCall(Box<Error>),

    /// State store adapter I/O failure; aborts the transaction with no
    /// partial snapshot
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Short machine-readable kind tag, used in receipts
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Parse { .. } => "parse",
            Error::Validation(_) => "validation",
            Error::Dependency(_) => "dependency",
            Error::Execution(_) => "execution",
            Error::StaticCall(_) => "static_call",
            Error::Storage(_) => "storage",
        }
    }

    /// Structured form for transaction receipts
    pub fn as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        })
    }
}

/// Result type alias for Inscript operations
pub type Result<T> = std::result::Result<T, Error>;
