//! Contract registry — process-wide content-addressed cache of compiled types
//!
//! The registry is the only cross-transaction shared mutable state in the
//! core. It is append-only: the first build of a given canonical source
//! wins and identical re-inserts are no-ops, so a race to insert the same
//! type is harmless. Lookups are O(1) amortized and safe under concurrent
//! readers once populated.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::contract::{self, AbiFunction, ContractType};
use crate::linearizer;
use crate::parser;
use crate::{Error, Result};

/// Append-only cache keyed by the leading slice of the content hash
#[derive(Default)]
pub struct ContractRegistry {
    inner: RwLock<HashMap<String, Arc<ContractType>>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a type by full init code hash or by registry key
    pub fn get(&self, init_code_hash: &str) -> Option<Arc<ContractType>> {
        let key = linearizer::registry_key(init_code_hash);
        self.inner.read().get(key).cloned()
    }

    /// Insert a compiled type; the first insert for a hash wins and the
    /// canonical entry is returned
    pub fn insert(&self, contract_type: Arc<ContractType>) -> Arc<ContractType> {
        let key = linearizer::registry_key(&contract_type.init_code_hash).to_string();
        let mut inner = self.inner.write();
        Arc::clone(inner.entry(key).or_insert(contract_type))
    }

    /// Compile a whole source file into the registry.
    ///
    /// `main_name` is the contract the file is named after; every type it
    /// retains is registered. Returns the main type.
    pub fn compile_source(&self, main_name: &str, text: &str) -> Result<Arc<ContractType>> {
        let unit = parser::parse(text)?;
        let types = contract::build_file(&unit, main_name, &BTreeMap::new())?;
        let mut main_type = None;
        for contract_type in types {
            let is_main = contract_type.is_main;
            let registered = self.insert(contract_type);
            if is_main {
                main_type = Some(registered);
            }
        }
        main_type.ok_or_else(|| {
            Error::Dependency(format!("contract {} is not declared in this file", main_name))
        })
    }

    /// Compile a payload-supplied source file.
    ///
    /// Create payloads carry bare source text with no filename, so the
    /// last declaration is taken as the main contract.
    pub fn compile_inline(&self, text: &str) -> Result<Arc<ContractType>> {
        let unit = parser::parse(text)?;
        let main_name = unit
            .contracts
            .last()
            .map(|decl| decl.name.clone())
            .ok_or_else(|| Error::Dependency("source file declares no contracts".into()))?;
        self.compile_source(&main_name, text)
    }

    /// Public ABIs of registered main types, keyed by contract name.
    ///
    /// With `deployable_only`, abstract types are excluded as well.
    pub fn all_abis(&self, deployable_only: bool) -> BTreeMap<String, Vec<AbiFunction>> {
        self.inner
            .read()
            .values()
            .filter(|ty| ty.is_main && (!deployable_only || ty.is_deployable()))
            .map(|ty| (ty.name.clone(), ty.public_abi()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
