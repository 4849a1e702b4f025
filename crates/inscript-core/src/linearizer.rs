//! Dependency resolver — linearizes a contract's inheritance graph
//!
//! Given a parsed source unit and a target contract, computes the retained
//! set (the target plus everything it transitively depends on), a single
//! deterministic total order over it, and the canonical source + content
//! hash of the rewritten unit.
//!
//! # Guarantees
//!
//! - **Idempotent**: linearizing a canonical source again yields identical
//!   canonical source and identical content hash
//! - **Order independent**: reordering non-dependent declarations in the
//!   input never changes the output (ties break by ascending name)
//! - **Pruning**: declarations not reachable from the target vanish

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use crate::parser::ast::{ContractDecl, SourceUnit};
use crate::printer;
use crate::{Error, Result};

/// Number of leading hex characters of the content hash used as the
/// registry key; the full digest is the payload-facing init code hash.
pub const REGISTRY_KEY_LEN: usize = 32;

/// A contract declaration after dependency resolution
#[derive(Debug, Clone, PartialEq)]
pub struct LinearizedContract {
    /// Name of the target contract (always the last entry of `order`)
    pub name: String,
    /// Retained contract names in linearization order, most-base first
    pub order: Vec<String>,
    /// The rewritten unit: retained declarations only, in `order`
    pub unit: SourceUnit,
    /// Canonical round-trip print of the rewritten unit
    pub canonical_source: String,
    /// Hex SHA-256 of the canonical source (64 chars)
    pub init_code_hash: String,
}

/// Linearize `target` and its transitive dependencies within `unit`
pub fn linearize(unit: &SourceUnit, target: &str) -> Result<LinearizedContract> {
    let decls = declarations_by_name(unit)?;

    if !decls.contains_key(target) {
        return Err(Error::Dependency(format!(
            "contract {} is not declared in this file",
            target
        )));
    }

    let retained = reachable_from(target, &decls)?;
    let order = topological_order(&retained, &decls)?;

    let rewritten = SourceUnit {
        pragma: unit.pragma.clone(),
        contracts: order
            .iter()
            .map(|name| (*decls[name.as_str()]).clone())
            .collect(),
    };

    let canonical_source = printer::print_unit(&rewritten);
    let init_code_hash = content_hash(&canonical_source);

    Ok(LinearizedContract {
        name: target.to_string(),
        order,
        unit: rewritten,
        canonical_source,
        init_code_hash,
    })
}

/// Hex SHA-256 of canonical source bytes
pub fn content_hash(canonical_source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The registry key is the leading slice of a full content hash
pub fn registry_key(init_code_hash: &str) -> &str {
    &init_code_hash[..REGISTRY_KEY_LEN.min(init_code_hash.len())]
}

// ── Graph walks ────────────────────────────────────────────

fn declarations_by_name<'a>(unit: &'a SourceUnit) -> Result<BTreeMap<&'a str, &'a ContractDecl>> {
    let mut decls = BTreeMap::new();
    for decl in &unit.contracts {
        if decls.insert(decl.name.as_str(), decl).is_some() {
            return Err(Error::Dependency(format!(
                "duplicate contract name {} in file",
                decl.name
            )));
        }
    }
    Ok(decls)
}

/// Depth-first reachability over declared-parent edges
fn reachable_from(
    target: &str,
    decls: &BTreeMap<&str, &ContractDecl>,
) -> Result<BTreeSet<String>> {
    let mut retained = BTreeSet::new();
    let mut stack = vec![target.to_string()];

    while let Some(name) = stack.pop() {
        if !retained.insert(name.clone()) {
            continue;
        }
        let decl = decls
            .get(name.as_str())
            .ok_or_else(|| Error::Dependency(format!("Dependency {} is not available", name)))?;
        for parent in &decl.parents {
            stack.push(parent.clone());
        }
    }

    Ok(retained)
}

/// Kahn's algorithm over "parent precedes child", restricted to the
/// retained set; the ready set is kept sorted so ambiguity always resolves
/// by ascending name.
fn topological_order(
    retained: &BTreeSet<String>,
    decls: &BTreeMap<&str, &ContractDecl>,
) -> Result<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for name in retained {
        let decl = decls[name.as_str()];
        let parents: BTreeSet<&str> = decl.parents.iter().map(String::as_str).collect();
        in_degree.insert(decl.name.as_str(), parents.len());
        for parent in parents {
            children.entry(parent).or_default().push(decl.name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(retained.len());
    while let Some(name) = ready.iter().next().copied() {
        ready.remove(name);
        order.push(name.to_string());
        let kids = children.get(name).cloned().unwrap_or_default();
        for child in kids {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    if order.len() < retained.len() {
        let stuck = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(name, _)| *name)
            .next()
            .unwrap_or("?");
        return Err(Error::Dependency(format!(
            "dependency cycle involving contract {}",
            stuck
        )));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn linearize_source(text: &str, target: &str) -> LinearizedContract {
        linearize(&parser::parse(text).unwrap(), target).unwrap()
    }

    #[test]
    fn test_retains_the_bottom_contract() {
        let result = linearize_source("contract Bottom {\n}", "Bottom");
        assert_eq!(result.order, vec!["Bottom"]);
        assert_eq!(result.canonical_source, "contract Bottom {\n}\n");
    }

    #[test]
    fn test_prunes_unreferenced_contracts() {
        let source = r#"
contract A {
}

contract B {
}

contract Bottom {
}
"#;
        let result = linearize_source(source, "Bottom");
        assert_eq!(result.order, vec!["Bottom"]);
        assert!(!result.canonical_source.contains("contract A"));
        assert!(!result.canonical_source.contains("contract B"));
    }

    #[test]
    fn test_prunes_contracts_depending_on_pruned_ones() {
        let source = r#"
contract A {
}

contract B is A {
}

contract Bottom {
}
"#;
        let result = linearize_source(source, "Bottom");
        assert_eq!(result.order, vec!["Bottom"]);
    }

    #[test]
    fn test_retains_transitive_dependencies() {
        let source = r#"
contract A {
}

contract X {
}

contract AFKJ is A {
}

contract AFKZ is A {
}

contract Bottom is AFKJ, AFKZ {
}
"#;
        let result = linearize_source(source, "Bottom");
        assert_eq!(result.order, vec!["A", "AFKJ", "AFKZ", "Bottom"]);
        assert!(!result.canonical_source.contains("contract X"));
    }

    #[test]
    fn test_ambiguity_resolved_lexicographically() {
        let source = r#"
contract A {
}

contract C is A {
}

contract B is A {
}

contract Bottom is B, C {
}
"#;
        let result = linearize_source(source, "Bottom");
        assert_eq!(result.order, vec!["A", "B", "C", "Bottom"]);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let forward = r#"
contract A {
}

contract B is A {
}

contract Bottom is B {
}
"#;
        let backward = r#"
contract Bottom is B {
}

contract B is A {
}

contract A {
}
"#;
        let first = linearize_source(forward, "Bottom");
        let second = linearize_source(backward, "Bottom");
        assert_eq!(first.canonical_source, second.canonical_source);
        assert_eq!(first.init_code_hash, second.init_code_hash);
    }

    #[test]
    fn test_idempotence() {
        let source = r#"
contract A {
}

contract B is A {
}

contract Bottom is B {
}
"#;
        let once = linearize_source(source, "Bottom");
        let again = linearize_source(&once.canonical_source, "Bottom");
        assert_eq!(once.canonical_source, again.canonical_source);
        assert_eq!(once.init_code_hash, again.init_code_hash);
    }

    #[test]
    fn test_duplicate_names_fail() {
        let source = r#"
contract A {
}

contract A {
}
"#;
        let err = linearize(&parser::parse(source).unwrap(), "A").unwrap_err();
        assert!(matches!(err, Error::Dependency(_)));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_missing_parent_fails() {
        let source = r#"
contract Bottom is Ghost {
}
"#;
        let err = linearize(&parser::parse(source).unwrap(), "Bottom").unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_cycle_fails() {
        let source = r#"
contract A is B {
}

contract B is A {
}
"#;
        let err = linearize(&parser::parse(source).unwrap(), "A").unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_missing_target_fails() {
        let source = "contract A {\n}";
        let err = linearize(&parser::parse(source).unwrap(), "Nope").unwrap_err();
        assert!(matches!(err, Error::Dependency(_)));
    }

    #[test]
    fn test_hash_shape() {
        let result = linearize_source("contract Bottom {\n}", "Bottom");
        assert_eq!(result.init_code_hash.len(), 64);
        assert!(result
            .init_code_hash
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
        assert_eq!(registry_key(&result.init_code_hash).len(), 32);
    }

    #[test]
    fn test_determinism() {
        let source = r#"
contract A {
}

contract Bottom is A {
}
"#;
        let first = linearize_source(source, "Bottom");
        for _ in 0..20 {
            assert_eq!(first, linearize_source(source, "Bottom"));
        }
    }
}
