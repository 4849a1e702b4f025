//! Compiled contract types and the contract builder
//!
//! A `ContractType` is the immutable, compiled form of a linearized
//! declaration: merged function table, merged storage layout, flags, and
//! the canonical source whose hash is the type's identity. The builder
//! turns a whole source file into types, resolving each declaration's
//! parents against an availability scope and registering the result back
//! into that scope so later declarations in the same pass can depend on it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::linearizer;
use crate::parser::ast::{FunctionDecl, SourceUnit, TypeExpr, Visibility};
use crate::{Error, Result};

/// One entry of a contract's public ABI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbiFunction {
    pub name: String,
    pub inputs: Vec<AbiParam>,
    pub visibility: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbiParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// A compiled, immutable contract definition
///
/// Identity is the hash of the canonical source of this type's own
/// linearized view of its defining file. Types are owned by the registry
/// and shared as `Arc`; they are never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractType {
    pub name: String,
    /// Transitive ancestors in linearization order, most-base first
    pub parent_chain: Vec<String>,
    /// Merged function table: later (more-derived) definitions shadow
    /// earlier ones of the same name
    pub functions: BTreeMap<String, Arc<FunctionDecl>>,
    /// Merged storage layout, same shadowing rule
    pub storage_layout: BTreeMap<String, TypeExpr>,
    pub is_abstract: bool,
    pub is_upgradeable: bool,
    /// True when this declaration is the one the file is named after
    pub is_main: bool,
    /// Canonical source of this type's own linearized view
    pub source: String,
    /// Canonical source of the whole defining file (main view)
    pub file_source: String,
    /// Full hex SHA-256 of `source`
    pub init_code_hash: String,
    /// Functions declared directly in this contract's body
    own_functions: BTreeMap<String, Arc<FunctionDecl>>,
}

impl ContractType {
    /// A contract is deployable if it is not abstract
    pub fn is_deployable(&self) -> bool {
        !self.is_abstract
    }

    /// Look up a function in the merged table
    pub fn function(&self, name: &str) -> Option<&Arc<FunctionDecl>> {
        self.functions.get(name)
    }

    /// The construction entry point, if the contract declares one
    pub fn constructor(&self) -> Option<&Arc<FunctionDecl>> {
        self.functions.get("constructor")
    }

    /// Public ABI: public functions, constructor excluded
    pub fn public_abi(&self) -> Vec<AbiFunction> {
        self.functions
            .values()
            .filter(|f| f.visibility == Visibility::Public && !f.is_constructor())
            .map(|f| AbiFunction {
                name: f.name.clone(),
                inputs: f
                    .params
                    .iter()
                    .map(|p| AbiParam {
                        name: p.name.clone(),
                        ty: p.ty.to_string(),
                    })
                    .collect(),
                visibility: "public".to_string(),
            })
            .collect()
    }
}

/// Compile every contract retained by `main_name`'s linearization, in
/// linearization order; the main type is the last element.
///
/// The availability scope starts from `seed` (types compiled in earlier
/// passes); each built type is registered under its declared name before
/// the next declaration is processed.
pub fn build_file(
    unit: &SourceUnit,
    main_name: &str,
    seed: &BTreeMap<String, Arc<ContractType>>,
) -> Result<Vec<Arc<ContractType>>> {
    let lin_main = linearizer::linearize(unit, main_name)?;
    let file_source = lin_main.canonical_source.clone();

    let mut scope = seed.clone();
    let mut build_order: Vec<String> = Vec::new();
    let mut built: Vec<Arc<ContractType>> = Vec::new();

    for name in &lin_main.order {
        let decl = lin_main
            .unit
            .contracts
            .iter()
            .find(|d| &d.name == name)
            .ok_or_else(|| Error::Dependency(format!("Dependency {} is not available", name)))?;

        // Ancestors = declared parents plus everything they inherit from
        let mut ancestors: BTreeSet<String> = BTreeSet::new();
        for parent_name in &decl.parents {
            let parent = scope.get(parent_name).ok_or_else(|| {
                Error::Dependency(format!("Dependency {} is not available", parent_name))
            })?;
            ancestors.extend(parent.parent_chain.iter().cloned());
            ancestors.insert(parent_name.clone());
        }

        let parent_chain: Vec<String> = build_order
            .iter()
            .filter(|built_name| ancestors.contains(*built_name))
            .cloned()
            .collect();

        // Merge tables in chain order; later definitions shadow earlier
        let mut functions: BTreeMap<String, Arc<FunctionDecl>> = BTreeMap::new();
        let mut storage_layout: BTreeMap<String, TypeExpr> = BTreeMap::new();
        for ancestor in &parent_chain {
            if let Some(ancestor_type) = scope.get(ancestor) {
                for (fn_name, def) in &ancestor_type.own_functions {
                    functions.insert(fn_name.clone(), Arc::clone(def));
                }
                for (var, ty) in &ancestor_type.storage_layout {
                    storage_layout.insert(var.clone(), ty.clone());
                }
            }
        }
        let mut own_functions: BTreeMap<String, Arc<FunctionDecl>> = BTreeMap::new();
        for func in decl.functions() {
            let def = Arc::new(func.clone());
            own_functions.insert(func.name.clone(), Arc::clone(&def));
            functions.insert(func.name.clone(), def);
        }
        for storage in decl.storage_decls() {
            storage_layout.insert(storage.name.clone(), storage.ty.clone());
        }

        let lin_self = if name == main_name {
            lin_main.clone()
        } else {
            linearizer::linearize(unit, name)?
        };

        let contract_type = Arc::new(ContractType {
            name: name.clone(),
            parent_chain,
            functions,
            storage_layout,
            is_abstract: decl.is_abstract,
            is_upgradeable: decl.is_upgradeable,
            is_main: name == main_name,
            source: lin_self.canonical_source,
            file_source: file_source.clone(),
            init_code_hash: lin_self.init_code_hash,
            own_functions,
        });

        scope.insert(name.clone(), Arc::clone(&contract_type));
        build_order.push(name.clone());
        built.push(contract_type);
    }

    Ok(built)
}
