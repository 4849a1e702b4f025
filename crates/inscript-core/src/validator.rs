//! Transaction payload validation
//!
//! Pure predicate/transform over the parsed payload JSON: confirms the op
//! is one of the protocol's three, that the data key-set exactly matches a
//! permitted combination for that op, and that call targets are well-formed
//! addresses. Any violation fails before execution begins; no state is
//! touched.

use std::collections::BTreeSet;

use crate::{Error, Result};

/// A validated protocol payload
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionPayload {
    Create {
        init_code_hash: String,
        source_code: Option<String>,
        args: Option<serde_json::Value>,
    },
    Call {
        to: String,
        function: String,
        args: Option<serde_json::Value>,
    },
    StaticCall {
        to: String,
        function: String,
        args: Option<serde_json::Value>,
    },
}

impl TransactionPayload {
    pub fn op(&self) -> &'static str {
        match self {
            TransactionPayload::Create { .. } => "create",
            TransactionPayload::Call { .. } => "call",
            TransactionPayload::StaticCall { .. } => "static_call",
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, TransactionPayload::StaticCall { .. })
    }
}

/// Check a payload against the protocol's op grammar
pub fn validate_payload(raw: &serde_json::Value) -> Result<TransactionPayload> {
    let top = raw
        .as_object()
        .ok_or_else(|| Error::Validation("payload must be a JSON object".into()))?;

    let top_keys: BTreeSet<&str> = top.keys().map(String::as_str).collect();
    if top_keys != BTreeSet::from(["op", "data"]) {
        return Err(Error::Validation(format!(
            "payload keys must be exactly op and data, got {:?}",
            top_keys
        )));
    }

    let op = top["op"]
        .as_str()
        .ok_or_else(|| Error::Validation("op must be a string".into()))?;
    let data = top["data"]
        .as_object()
        .ok_or_else(|| Error::Validation("data must be a JSON object".into()))?;
    let data_keys: BTreeSet<&str> = data.keys().map(String::as_str).collect();

    match op {
        "create" => {
            let permitted: [&[&str]; 4] = [
                &["init_code_hash"],
                &["args", "init_code_hash"],
                &["init_code_hash", "source_code"],
                &["args", "init_code_hash", "source_code"],
            ];
            check_key_set(&data_keys, &permitted)?;

            let init_code_hash = string_field(data, "init_code_hash")?;
            let source_code = data
                .get("source_code")
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        Error::Validation("source_code must be a string".into())
                    })
                })
                .transpose()?;
            Ok(TransactionPayload::Create {
                init_code_hash,
                source_code,
                args: data.get("args").cloned(),
            })
        }
        "call" | "static_call" => {
            let permitted: [&[&str]; 2] = [&["function", "to"], &["args", "function", "to"]];
            check_key_set(&data_keys, &permitted)?;

            let to = string_field(data, "to")?;
            if !is_address(&to) {
                return Err(Error::Validation(format!("Invalid to address: {}", to)));
            }
            let function = string_field(data, "function")?;
            let args = data.get("args").cloned();

            if op == "call" {
                Ok(TransactionPayload::Call {
                    to: to.to_lowercase(),
                    function,
                    args,
                })
            } else {
                Ok(TransactionPayload::StaticCall {
                    to: to.to_lowercase(),
                    function,
                    args,
                })
            }
        }
        other => Err(Error::Validation(format!("Invalid op: {}", other))),
    }
}

/// `^0x[a-f0-9]{40}$`, case-insensitive
pub fn is_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn check_key_set(keys: &BTreeSet<&str>, permitted: &[&[&str]]) -> Result<()> {
    for allowed in permitted {
        if keys.len() == allowed.len() && allowed.iter().all(|k| keys.contains(k)) {
            return Ok(());
        }
    }
    Err(Error::Validation(format!("Invalid data keys: {:?}", keys)))
}

fn string_field(data: &serde_json::Map<String, serde_json::Value>, key: &str) -> Result<String> {
    data.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("{} must be a string", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDR: &str = "0xc2172a6315c1d7f6855768f843c420ebb36eda97";

    #[test]
    fn test_create_minimal() {
        let payload = json!({"op": "create", "data": {"init_code_hash": "ab12"}});
        match validate_payload(&payload).unwrap() {
            TransactionPayload::Create {
                init_code_hash,
                source_code,
                args,
            } => {
                assert_eq!(init_code_hash, "ab12");
                assert!(source_code.is_none());
                assert!(args.is_none());
            }
            other => panic!("expected create, got {:?}", other),
        }
    }

    #[test]
    fn test_create_with_source_and_args() {
        let payload = json!({
            "op": "create",
            "data": {
                "init_code_hash": "ab12",
                "source_code": "contract A {\n}",
                "args": {"name": "Fun"}
            }
        });
        assert!(validate_payload(&payload).is_ok());
    }

    #[test]
    fn test_call_key_sets() {
        let ok = json!({"op": "call", "data": {"to": ADDR, "function": "mint"}});
        assert!(validate_payload(&ok).is_ok());

        let ok = json!({"op": "call", "data": {"to": ADDR, "function": "mint", "args": {"amount": 5}}});
        assert!(validate_payload(&ok).is_ok());
    }

    #[test]
    fn test_extra_data_key_rejected() {
        let payload = json!({
            "op": "call",
            "data": {"to": ADDR, "function": "mint", "args": {}, "extra": 1}
        });
        let err = validate_payload(&payload).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("Invalid data keys"));
    }

    #[test]
    fn test_missing_data_key_rejected() {
        let payload = json!({"op": "call", "data": {"to": ADDR}});
        assert!(validate_payload(&payload).is_err());

        let payload = json!({"op": "create", "data": {"source_code": "x"}});
        assert!(validate_payload(&payload).is_err());
    }

    #[test]
    fn test_unknown_op_rejected() {
        let payload = json!({"op": "burn", "data": {"to": ADDR, "function": "f"}});
        let err = validate_payload(&payload).unwrap_err();
        assert!(err.to_string().contains("Invalid op: burn"));
    }

    #[test]
    fn test_address_format() {
        assert!(is_address(ADDR));
        assert!(is_address(&ADDR.to_uppercase().replace("0X", "0x")));
        assert!(!is_address("0x1234"));
        assert!(!is_address("c2172a6315c1d7f6855768f843c420ebb36eda97"));
        assert!(!is_address("0xzz72a6315c1d7f6855768f843c420ebb36eda97"));
    }

    #[test]
    fn test_bad_address_rejected() {
        let payload = json!({"op": "call", "data": {"to": "0x123", "function": "f"}});
        let err = validate_payload(&payload).unwrap_err();
        assert!(err.to_string().contains("Invalid to address"));
    }

    #[test]
    fn test_mixed_case_address_normalized() {
        let mixed = "0xC2172a6315c1D7f6855768F843c420EbB36eDa97";
        let payload = json!({"op": "static_call", "data": {"to": mixed, "function": "f"}});
        match validate_payload(&payload).unwrap() {
            TransactionPayload::StaticCall { to, .. } => {
                assert_eq!(to, mixed.to_lowercase());
            }
            other => panic!("expected static_call, got {:?}", other),
        }
    }

    #[test]
    fn test_top_level_shape() {
        assert!(validate_payload(&json!("nope")).is_err());
        assert!(validate_payload(&json!({"op": "call"})).is_err());
        assert!(validate_payload(&json!({"op": "call", "data": {}, "extra": 1})).is_err());
        assert!(validate_payload(&json!({"op": "call", "data": "not an object"})).is_err());
    }
}
