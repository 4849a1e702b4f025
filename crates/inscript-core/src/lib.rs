//! Inscript Core - deterministic contract execution over an inscription stream
//!
//! This is the single source of truth for Inscript semantics: given the
//! same ordered transaction stream, every node running this core produces
//! byte-identical contract state.
//!
//! # Architecture
//!
//! ```text
//! Source Text → Parser → AST → Linearizer → Canonical Source → SHA-256
//!                                  ↓
//!                          Contract Builder → ContractType → Registry
//!                                  ↓
//! Payload → Validator → Execution Engine → Call Frames → State Snapshots
//!                                  ↓
//!                        Static-Call Simulator (memoized, read-only)
//! ```
//!
//! # Guarantees
//!
//! - **Deterministic**: same transaction stream always produces identical
//!   state and receipts
//! - **Canonical**: one normalized source form per contract; its hash is
//!   the contract's identity
//! - **Minimal persistence**: a snapshot is written only when serialized
//!   state actually changed, and only after the whole transaction succeeds

pub mod contract;
pub mod engine;
pub mod error;
mod interpreter;
pub mod linearizer;
pub mod parser;
pub mod printer;
pub mod registry;
pub mod simulator;
pub mod state;
pub mod validator;

pub use contract::{AbiFunction, AbiParam, ContractType};
pub use engine::{
    Engine, EngineConfig, InstanceRecord, Transaction, TransactionReceipt, TxStatus,
};
pub use error::{Error, Result};
pub use linearizer::{linearize, LinearizedContract};
pub use registry::ContractRegistry;
pub use simulator::StaticCallSimulator;
pub use state::{InMemoryStateStore, StateMap, StateSnapshot, StateStore, Value};
pub use validator::{validate_payload, TransactionPayload};
