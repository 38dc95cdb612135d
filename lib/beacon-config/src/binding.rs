//! Binding declarations

use beacon_core::ValueKind;
use serde_json::Value;
use std::fmt;

/// Association between a remote configuration path and a local cell
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigBinding {
    /// Watch/query key in the store; the property name is used when absent
    pub path: Option<String>,
    /// Name of the bound property on its owner
    pub property: String,
    pub default_value: Option<Value>,
    pub kind: ValueKind,
}

impl ConfigBinding {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            path: None,
            property: property.into(),
            default_value: None,
            kind: ValueKind::Text,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    /// The key actually watched in the store
    pub fn effective_path(&self) -> &str {
        match self.path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => &self.property,
        }
    }
}

/// Identity of a binding: several owners may bind the same path
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub path: String,
    pub property: String,
    pub owner: String,
}

impl BindingKey {
    pub fn new(binding: &ConfigBinding, owner: &str) -> Self {
        Self {
            path: binding.path.clone().unwrap_or_default(),
            property: binding.property.clone(),
            owner: owner.to_string(),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}__{}", self.path, self.property, self.owner)
    }
}
