//! Capability registry: the closed vocabulary of library handles a script
//! may reference, and the per-request bindings of those names.
//!
//! No network, filesystem or process capability is ever registered.

pub mod catalog;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::value::Value;

pub use catalog::{Catalog, CatalogError};

/// Object a script can call into. Implementations receive and return plain
/// [`Value`]s only and must not expose I/O to the script.
pub trait Capability: Send + Sync + fmt::Debug {
    /// Short description used in logs and `repr()`.
    fn kind(&self) -> &str;

    /// Read-only data attribute, if any.
    fn attr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn has_method(&self, name: &str) -> bool;

    fn call(
        &self,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value, CapabilityError>;
}

/// Failure reported by a capability call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    #[error("'{capability}' has no method '{method}'")]
    UnknownMethod { capability: String, method: String },
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    Tabular,
    Mapping,
    Plotting,
    HostUi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Binding name visible to scripts.
    pub name: &'static str,
    /// Module a script imports to obtain the same handle.
    pub module: &'static str,
    pub category: CapabilityCategory,
}

/// Every name a request may bind.
pub const REGISTRY: &[RegistryEntry] = &[
    RegistryEntry {
        name: "pl",
        module: "polars",
        category: CapabilityCategory::Tabular,
    },
    RegistryEntry {
        name: "pd",
        module: "pandas",
        category: CapabilityCategory::Tabular,
    },
    RegistryEntry {
        name: "gpd",
        module: "geopandas",
        category: CapabilityCategory::Mapping,
    },
    RegistryEntry {
        name: "folium",
        module: "folium",
        category: CapabilityCategory::Mapping,
    },
    RegistryEntry {
        name: "alt",
        module: "altair",
        category: CapabilityCategory::Plotting,
    },
    RegistryEntry {
        name: "px",
        module: "plotly.express",
        category: CapabilityCategory::Plotting,
    },
    RegistryEntry {
        name: "go",
        module: "plotly.graph_objects",
        category: CapabilityCategory::Plotting,
    },
    RegistryEntry {
        name: "st",
        module: "streamlit",
        category: CapabilityCategory::HostUi,
    },
];

pub fn registry_entry(name: &str) -> Option<&'static RegistryEntry> {
    REGISTRY.iter().find(|e| e.name == name)
}

pub fn entry_for_module(module: &str) -> Option<&'static RegistryEntry> {
    REGISTRY.iter().find(|e| e.module == module)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("'{0}' is not a registered capability name")]
    UnknownName(String),
    #[error("capability '{0}' is bound more than once")]
    Duplicate(String),
}

/// Capability handles bound for one request, keyed by registry name.
#[derive(Debug, Clone, Default)]
pub struct CapabilityBindings {
    handles: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(
        &mut self,
        name: &str,
        handle: Arc<dyn Capability>,
    ) -> Result<(), BindingError> {
        if registry_entry(name).is_none() {
            return Err(BindingError::UnknownName(name.to_string()));
        }
        if self.handles.contains_key(name) {
            return Err(BindingError::Duplicate(name.to_string()));
        }
        self.handles.insert(name.to_string(), handle);
        Ok(())
    }

    /// Builder form of [`CapabilityBindings::bind`].
    pub fn with(mut self, name: &str, handle: Arc<dyn Capability>) -> Result<Self, BindingError> {
        self.bind(name, handle)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.handles.get(name)
    }

    /// The bound handle whose registry entry provides `module`.
    pub fn for_module(&self, module: &str) -> Option<(&'static RegistryEntry, &Arc<dyn Capability>)> {
        let entry = entry_for_module(module)?;
        self.handles.get(entry.name).map(|h| (entry, h))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Capability>)> {
        self.handles.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> Arc<dyn Capability> {
        Arc::new(Catalog::new())
    }

    #[test]
    fn test_bind_known_names() {
        let bindings = CapabilityBindings::new()
            .with("pl", handle())
            .unwrap()
            .with("st", handle())
            .unwrap();
        assert_eq!(bindings.names().collect::<Vec<_>>(), vec!["pl", "st"]);
        assert!(bindings.for_module("polars").is_some());
        assert!(bindings.for_module("pandas").is_none());
    }

    #[test]
    fn test_bind_rejects_unknown_and_duplicate() {
        let mut bindings = CapabilityBindings::new();
        assert_eq!(
            bindings.bind("os", handle()),
            Err(BindingError::UnknownName("os".into()))
        );
        bindings.bind("pd", handle()).unwrap();
        assert_eq!(
            bindings.bind("pd", handle()),
            Err(BindingError::Duplicate("pd".into()))
        );
    }

    #[test]
    fn test_registry_is_closed() {
        assert_eq!(REGISTRY.len(), 8);
        for entry in REGISTRY {
            assert_eq!(entry_for_module(entry.module), Some(entry));
        }
        assert!(registry_entry("subprocess").is_none());
    }
}
