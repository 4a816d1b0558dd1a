// src/types.rs

//! Value identifiers shared by the protocol, the dependency graph and the
//! log-mode controller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use minicbor::{Decode, Encode};

/// Kind of object a computation is performed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
#[cbor(index_only)]
pub enum TargetType {
    #[n(0)]
    Primitive,
    #[n(1)]
    Security,
    #[n(2)]
    Position,
    #[n(3)]
    Portfolio,
    #[n(4)]
    Trade,
}

/// Reference to the object a function is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct ComputationTargetSpecification {
    #[n(0)]
    pub target_type: TargetType,
    #[n(1)]
    pub unique_id: String,
}

impl ComputationTargetSpecification {
    pub fn new(target_type: TargetType, unique_id: impl Into<String>) -> Self {
        Self {
            target_type,
            unique_id: unique_id.into(),
        }
    }

    pub fn primitive(unique_id: impl Into<String>) -> Self {
        Self::new(TargetType::Primitive, unique_id)
    }
}

impl fmt::Display for ComputationTargetSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.target_type, self.unique_id)
    }
}

/// Property bag used to disambiguate values of the same name on the same
/// target (e.g. `Currency = {USD}`, `Curve = {FUNDING}`).
pub type ValueProperties = BTreeMap<String, BTreeSet<String>>;

/// Identifies one computed output. Compared and hashed by value, so it can
/// be used directly as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct ValueSpecification {
    #[n(0)]
    pub value_name: String,
    #[n(1)]
    pub target: ComputationTargetSpecification,
    #[n(2)]
    pub properties: ValueProperties,
}

impl ValueSpecification {
    pub fn new(value_name: impl Into<String>, target: ComputationTargetSpecification) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            properties: BTreeMap::new(),
        }
    }

    /// Add a property value, keeping any values already present for `name`.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .entry(name.into())
            .or_default()
            .insert(value.into());
        self
    }

    /// Single value of a property, if exactly one is set.
    pub fn single_property(&self, name: &str) -> Option<&str> {
        let values = self.properties.get(name)?;
        if values.len() == 1 {
            values.iter().next().map(|s| s.as_str())
        } else {
            None
        }
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.value_name, self.target)?;
        if !self.properties.is_empty() {
            let props: Vec<String> = self
                .properties
                .iter()
                .map(|(k, v)| {
                    let values: Vec<&str> = v.iter().map(|s| s.as_str()).collect();
                    format!("{k}={}", values.join("|"))
                })
                .collect();
            write!(f, "[{}]", props.join(","))?;
        }
        Ok(())
    }
}

/// Minimum verbosity of the execution log attached to a computed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Encode, Decode)]
#[cbor(index_only)]
pub enum ExecutionLogMode {
    /// Only record whether warnings or errors occurred.
    #[default]
    #[n(0)]
    Indicators,
    /// Record every log event.
    #[n(1)]
    Full,
}
