//! Resolution of script argument values into ABI values.
//!
//! - `"@Name"` is the address of a recorded contract (or a harness actor).
//! - `"${KEY}"` is the value of the setting `KEY`, resolved recursively.
//! - Arrays map onto Solidity arrays and tuples.
//! - Anything else is a literal coerced to the parameter type.

use std::collections::{BTreeMap, BTreeSet};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::Address,
};
use anyhow::{Context, Result};

/// Guards against settings that refer to each other in a cycle.
const MAX_SETTING_DEPTH: usize = 16;

/// Resolves `@Name` references.
pub trait AddressLookup {
    fn lookup(&self, name: &str) -> Option<Address>;
}

impl AddressLookup for BTreeMap<String, Address> {
    fn lookup(&self, name: &str) -> Option<Address> {
        self.get(name).copied()
    }
}

/// What a string argument stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    Contract(&'a str),
    Setting(&'a str),
    Literal(&'a str),
}

impl<'a> Reference<'a> {
    pub fn classify(s: &'a str) -> Self {
        if let Some(name) = s.strip_prefix('@')
            && !name.is_empty()
        {
            return Self::Contract(name);
        }
        if let Some(key) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}'))
            && !key.is_empty()
        {
            return Self::Setting(key);
        }
        Self::Literal(s)
    }
}

/// Strip the optional `@` in front of a contract name.
pub fn contract_name(s: &str) -> &str {
    s.strip_prefix('@').unwrap_or(s)
}

/// Contracts and settings an argument list depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub contracts: BTreeSet<String>,
    pub settings: BTreeSet<String>,
}

impl References {
    /// Walk `values`, following references through declared settings.
    pub fn collect<'v>(
        values: impl IntoIterator<Item = &'v toml::Value>,
        settings: &BTreeMap<String, toml::Value>,
    ) -> Self {
        let mut refs = Self::default();
        for value in values {
            refs.walk(value, settings);
        }
        refs
    }

    fn walk(&mut self, value: &toml::Value, settings: &BTreeMap<String, toml::Value>) {
        match value {
            toml::Value::String(s) => match Reference::classify(s) {
                Reference::Contract(name) => {
                    self.contracts.insert(name.to_string());
                }
                Reference::Setting(key) => {
                    if self.settings.insert(key.to_string())
                        && let Some(setting) = settings.get(key)
                    {
                        self.walk(setting, settings);
                    }
                }
                Reference::Literal(_) => {}
            },
            toml::Value::Array(items) => {
                for item in items {
                    self.walk(item, settings);
                }
            }
            _ => {}
        }
    }
}

/// Turns script values into ABI values.
pub struct ValueResolver<'a> {
    settings: &'a BTreeMap<String, toml::Value>,
    addresses: &'a dyn AddressLookup,
}

impl<'a> ValueResolver<'a> {
    pub fn new(settings: &'a BTreeMap<String, toml::Value>, addresses: &'a dyn AddressLookup) -> Self {
        Self {
            settings,
            addresses,
        }
    }

    /// Resolve an argument list against parameter types.
    pub fn resolve_all(&self, types: &[DynSolType], values: &[toml::Value]) -> Result<Vec<DynSolValue>> {
        if types.len() != values.len() {
            anyhow::bail!(
                "Expected {} argument(s), got {}",
                types.len(),
                values.len()
            );
        }

        types
            .iter()
            .zip(values)
            .enumerate()
            .map(|(i, (ty, value))| {
                self.resolve(value, ty)
                    .with_context(|| format!("Argument #{} ({})", i, ty.sol_type_name()))
            })
            .collect()
    }

    pub fn resolve(&self, value: &toml::Value, ty: &DynSolType) -> Result<DynSolValue> {
        self.resolve_at(value, ty, 0)
    }

    /// Resolve a value that must be an address.
    pub fn address(&self, value: &toml::Value) -> Result<Address> {
        match self.resolve(value, &DynSolType::Address)? {
            DynSolValue::Address(address) => Ok(address),
            other => anyhow::bail!("Expected an address, got {:?}", other),
        }
    }

    fn resolve_at(&self, value: &toml::Value, ty: &DynSolType, depth: usize) -> Result<DynSolValue> {
        if depth > MAX_SETTING_DEPTH {
            anyhow::bail!("Settings nest deeper than {} levels (cycle?)", MAX_SETTING_DEPTH);
        }

        match value {
            toml::Value::String(s) => match Reference::classify(s) {
                Reference::Contract(name) => {
                    let address = self
                        .addresses
                        .lookup(name)
                        .with_context(|| format!("Unknown contract or actor `@{}`", name))?;
                    match ty {
                        DynSolType::Address => Ok(DynSolValue::Address(address)),
                        other => anyhow::bail!(
                            "`@{}` is an address but the parameter is {}",
                            name,
                            other.sol_type_name()
                        ),
                    }
                }
                Reference::Setting(key) => {
                    let setting = self
                        .settings
                        .get(key)
                        .with_context(|| format!("Setting `{}` is not declared", key))?;
                    self.resolve_at(setting, ty, depth + 1)
                        .with_context(|| format!("Setting `{}`", key))
                }
                Reference::Literal(literal) => coerce(ty, literal),
            },
            toml::Value::Integer(i) => coerce(ty, &i.to_string()),
            toml::Value::Boolean(b) => coerce(ty, &b.to_string()),
            toml::Value::Array(items) => self.resolve_array(items, ty, depth),
            toml::Value::Float(f) => anyhow::bail!(
                "Floating point value {} cannot be ABI encoded, write it as a string such as \"1.5e18\"",
                f
            ),
            other => anyhow::bail!("Unsupported argument value {}", other),
        }
    }

    fn resolve_array(&self, items: &[toml::Value], ty: &DynSolType, depth: usize) -> Result<DynSolValue> {
        match ty {
            DynSolType::Array(inner) => items
                .iter()
                .map(|item| self.resolve_at(item, inner, depth))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::Array),
            DynSolType::FixedArray(inner, len) => {
                if items.len() != *len {
                    anyhow::bail!("Expected {} elements, got {}", len, items.len());
                }
                items
                    .iter()
                    .map(|item| self.resolve_at(item, inner, depth))
                    .collect::<Result<Vec<_>>>()
                    .map(DynSolValue::FixedArray)
            }
            DynSolType::Tuple(types) => {
                if items.len() != types.len() {
                    anyhow::bail!("Expected a tuple of {} elements, got {}", types.len(), items.len());
                }
                types
                    .iter()
                    .zip(items)
                    .map(|(ty, item)| self.resolve_at(item, ty, depth))
                    .collect::<Result<Vec<_>>>()
                    .map(DynSolValue::Tuple)
            }
            other => anyhow::bail!("An array cannot be passed as {}", other.sol_type_name()),
        }
    }
}

/// An argument with settings expanded and literals normalized, so two argument lists
/// can be compared without a chain. `"100"` and `100` compare equal, and so do two
/// spellings of the same address once the parameter type is known.
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    Contract(String),
    Value(DynSolValue),
    Text(String),
    List(Vec<Canonical>),
}

impl Canonical {
    pub fn of(
        value: &toml::Value,
        ty: Option<&DynSolType>,
        settings: &BTreeMap<String, toml::Value>,
    ) -> Self {
        Self::at(value, ty, settings, 0)
    }

    fn at(
        value: &toml::Value,
        ty: Option<&DynSolType>,
        settings: &BTreeMap<String, toml::Value>,
        depth: usize,
    ) -> Self {
        let literal = match value {
            toml::Value::String(s) => match Reference::classify(s) {
                Reference::Contract(name) => return Self::Contract(name.to_string()),
                Reference::Setting(key) => {
                    return match settings.get(key) {
                        Some(setting) if depth < MAX_SETTING_DEPTH => {
                            Self::at(setting, ty, settings, depth + 1)
                        }
                        _ => Self::Text(s.clone()),
                    };
                }
                Reference::Literal(literal) => literal.to_string(),
            },
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Array(items) => {
                return Self::List(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| Self::at(item, element_type(ty, i), settings, depth))
                        .collect(),
                );
            }
            other => other.to_string(),
        };

        match ty.and_then(|ty| coerce(ty, &literal).ok()) {
            Some(value) => Self::Value(value),
            None => Self::Text(literal),
        }
    }
}

fn element_type(ty: Option<&DynSolType>, index: usize) -> Option<&DynSolType> {
    match ty? {
        DynSolType::Array(inner) | DynSolType::FixedArray(inner, _) => Some(inner.as_ref()),
        DynSolType::Tuple(types) => types.get(index),
        _ => None,
    }
}

fn coerce(ty: &DynSolType, literal: &str) -> Result<DynSolValue> {
    if *ty == DynSolType::String {
        return Ok(DynSolValue::String(literal.to_string()));
    }
    ty.coerce_str(literal)
        .with_context(|| format!("`{}` is not a valid {}", literal, ty.sol_type_name()))
}
