//! Contract state values, snapshots, and the state store adapter
//!
//! State maps use `BTreeMap` throughout so that iteration order — and
//! therefore serialized form — is deterministic. Snapshot comparison is
//! byte-for-byte over the serialized map; the engine persists a snapshot
//! only when that comparison differs.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::parser::ast::TypeExpr;
use crate::{Error, Result};

/// The all-zero address, used as the default for address-typed storage
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// A typed runtime value in contract state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null / uninitialized
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (i64, checked arithmetic)
    Int(i64),
    /// String value; addresses are lowercase hex strings
    Str(String),
    /// Ordered map (BTreeMap for deterministic iteration)
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Map(_) => "map",
        }
    }

    /// Default value for a declared storage type
    pub fn default_for(ty: &TypeExpr) -> Value {
        match ty {
            TypeExpr::Uint => Value::Int(0),
            TypeExpr::Bool => Value::Bool(false),
            TypeExpr::StringTy => Value::Str(String::new()),
            TypeExpr::Address => Value::Str(ZERO_ADDRESS.to_string()),
            TypeExpr::Map(_, _) => Value::Map(BTreeMap::new()),
        }
    }

    /// Convert from a JSON value at the payload boundary
    pub fn from_json(json: &serde_json::Value) -> Result<Value> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| Error::Execution(format!("unsupported numeric value {}", n))),
            serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
            serde_json::Value::Object(map) => {
                let mut btree = BTreeMap::new();
                for (key, value) in map {
                    btree.insert(key.clone(), Value::from_json(value)?);
                }
                Ok(Value::Map(btree))
            }
            serde_json::Value::Array(_) => {
                Err(Error::Execution("array values are not supported".into()))
            }
        }
    }

    /// Convert to a JSON value for receipts and introspection
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::json!(*i),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Map(map) => {
                let obj: serde_json::Map<String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Render as a map key (map storage is keyed by strings)
    pub fn as_map_key(&self) -> Result<String> {
        match self {
            Value::Int(i) => Ok(i.to_string()),
            Value::Str(s) => Ok(s.clone()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(Error::Execution(format!(
                "{} cannot be used as a map key",
                other.type_name()
            ))),
        }
    }
}

/// A contract's full storage state: variable name → value
pub type StateMap = BTreeMap<String, Value>;

/// Deterministic serialized form of a state map, used for change detection
pub fn serialize_state(state: &StateMap) -> Result<String> {
    serde_json::to_string(state)
        .map_err(|e| Error::Storage(format!("state serialization failed: {}", e)))
}

/// Immutable record of a contract's full state at one point in history
///
/// Ordering key is (block_number, transaction_index, call_index) ascending;
/// the most recent snapshot for an address is its current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub contract_address: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub transaction_index: u32,
    pub call_index: u32,
    pub state: StateMap,
}

impl StateSnapshot {
    fn ordering_key(&self) -> (u64, u32, u32) {
        (self.block_number, self.transaction_index, self.call_index)
    }
}

/// External collaborator interface for durable state
///
/// Calls may block on I/O; the engine treats them as synchronous
/// boundaries. Implementations must be shareable across threads.
pub trait StateStore: Send + Sync {
    /// Latest persisted state for an address (empty map if none yet)
    fn latest_state(&self, address: &str) -> Result<StateMap>;

    /// Append one state snapshot
    fn append_snapshot(&self, snapshot: StateSnapshot) -> Result<()>;

    /// Highest imported block number
    fn read_block_tip(&self) -> Result<u64>;
}

/// In-memory state store backing tests and the CLI
#[derive(Default)]
pub struct InMemoryStateStore {
    snapshots: RwLock<HashMap<String, Vec<StateSnapshot>>>,
    block_tip: RwLock<u64>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the imported-block watermark
    pub fn set_block_tip(&self, block_number: u64) {
        let mut tip = self.block_tip.write();
        if block_number > *tip {
            *tip = block_number;
        }
    }

    /// All snapshots for an address in ordering-key order
    pub fn snapshots(&self, address: &str) -> Vec<StateSnapshot> {
        self.snapshots
            .read()
            .get(address)
            .cloned()
            .unwrap_or_default()
    }
}

impl StateStore for InMemoryStateStore {
    fn latest_state(&self, address: &str) -> Result<StateMap> {
        Ok(self
            .snapshots
            .read()
            .get(address)
            .and_then(|all| all.last())
            .map(|snapshot| snapshot.state.clone())
            .unwrap_or_default())
    }

    fn append_snapshot(&self, snapshot: StateSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write();
        let all = snapshots
            .entry(snapshot.contract_address.clone())
            .or_default();
        if let Some(last) = all.last() {
            if last.ordering_key() > snapshot.ordering_key() {
                return Err(Error::Storage(format!(
                    "snapshot for {} arrived out of order",
                    snapshot.contract_address
                )));
            }
        }
        all.push(snapshot);
        Ok(())
    }

    fn read_block_tip(&self) -> Result<u64> {
        Ok(*self.block_tip.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(address: &str, block: u64, tx: u32, call: u32, balance: i64) -> StateSnapshot {
        let mut state = StateMap::new();
        state.insert("balance".into(), Value::Int(balance));
        StateSnapshot {
            contract_address: address.into(),
            transaction_hash: "0xabc".into(),
            block_number: block,
            transaction_index: tx,
            call_index: call,
            state,
        }
    }

    #[test]
    fn test_value_defaults() {
        assert_eq!(Value::default_for(&TypeExpr::Uint), Value::Int(0));
        assert_eq!(Value::default_for(&TypeExpr::Bool), Value::Bool(false));
        assert_eq!(
            Value::default_for(&TypeExpr::Address),
            Value::Str(ZERO_ADDRESS.into())
        );
        assert_eq!(
            Value::default_for(&TypeExpr::Map(
                Box::new(TypeExpr::Address),
                Box::new(TypeExpr::Uint)
            )),
            Value::Map(BTreeMap::new())
        );
    }

    #[test]
    fn test_value_json_roundtrip() {
        let json = serde_json::json!({"amount": 5, "to": "0xabc", "flag": true});
        let value = Value::from_json(&json).unwrap();
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_value_rejects_floats_and_arrays() {
        assert!(Value::from_json(&serde_json::json!(1.5)).is_err());
        assert!(Value::from_json(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_serialize_state_is_deterministic() {
        let mut a = StateMap::new();
        a.insert("zeta".into(), Value::Int(1));
        a.insert("alpha".into(), Value::Int(2));

        let mut b = StateMap::new();
        b.insert("alpha".into(), Value::Int(2));
        b.insert("zeta".into(), Value::Int(1));

        assert_eq!(serialize_state(&a).unwrap(), serialize_state(&b).unwrap());
    }

    #[test]
    fn test_latest_state_empty_when_unknown() {
        let store = InMemoryStateStore::new();
        assert!(store.latest_state("0xdead").unwrap().is_empty());
    }

    #[test]
    fn test_latest_state_is_newest_snapshot() {
        let store = InMemoryStateStore::new();
        store.append_snapshot(snapshot("0xaaa", 1, 0, 0, 5)).unwrap();
        store.append_snapshot(snapshot("0xaaa", 1, 0, 1, 3)).unwrap();
        store.append_snapshot(snapshot("0xaaa", 2, 0, 0, 9)).unwrap();

        let latest = store.latest_state("0xaaa").unwrap();
        assert_eq!(latest.get("balance"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let store = InMemoryStateStore::new();
        store.append_snapshot(snapshot("0xaaa", 2, 0, 0, 5)).unwrap();
        let err = store
            .append_snapshot(snapshot("0xaaa", 1, 0, 0, 3))
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_block_tip_watermark() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.read_block_tip().unwrap(), 0);
        store.set_block_tip(7);
        store.set_block_tip(3);
        assert_eq!(store.read_block_tip().unwrap(), 7);
    }
}
