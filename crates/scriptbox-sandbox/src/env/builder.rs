//! Build the restricted namespace for one execution.

use std::sync::Arc;

use crate::capability::{Capability, CapabilityBindings};

/// Reserved name a script binds its output to.
pub const OUTPUT_NAME: &str = "result";

/// Identifiers resolvable by every script. Anything not listed here (or
/// bound as a capability) is a `NameError`.
pub const ALLOWED_PRIMITIVES: &[&str] = &[
    "abs",
    "all",
    "any",
    "bin",
    "bool",
    "chr",
    "dict",
    "divmod",
    "enumerate",
    "filter",
    "float",
    "format",
    "hex",
    "int",
    "len",
    "list",
    "map",
    "max",
    "min",
    "oct",
    "ord",
    "pow",
    "print",
    "range",
    "repr",
    "reversed",
    "round",
    "sorted",
    "str",
    "sum",
    "tuple",
    "type",
    "zip",
    // error constructors
    "Exception",
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "ZeroDivisionError",
    "RuntimeError",
];

/// Immutable starting namespace: allow-listed primitives plus the request's
/// capability bindings. [`OUTPUT_NAME`] is never part of it.
#[derive(Debug, Clone)]
pub struct Environment {
    capabilities: CapabilityBindings,
}

impl Environment {
    pub fn is_primitive(&self, name: &str) -> bool {
        ALLOWED_PRIMITIVES.contains(&name)
    }

    pub fn capability(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.capabilities.get(name)
    }

    pub fn capabilities(&self) -> &CapabilityBindings {
        &self.capabilities
    }

    pub fn contains(&self, name: &str) -> bool {
        self.is_primitive(name) || self.capability(name).is_some()
    }

    /// Every name resolvable before the script binds anything.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        ALLOWED_PRIMITIVES
            .iter()
            .copied()
            .chain(self.capabilities.names())
    }
}

pub fn build_environment(bindings: CapabilityBindings) -> Environment {
    tracing::debug!(
        primitives = ALLOWED_PRIMITIVES.len(),
        capabilities = bindings.len(),
        "Built execution environment"
    );
    Environment {
        capabilities: bindings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Catalog;
    use crate::security::rules::{DENIED_CALL_NAMES, DENIED_MODULES};

    #[test]
    fn test_environment_excludes_denied_names() {
        let bindings = CapabilityBindings::new()
            .with("pl", Arc::new(Catalog::new()))
            .unwrap();
        let env = build_environment(bindings);
        for name in DENIED_CALL_NAMES.iter().chain(DENIED_MODULES) {
            assert!(!env.contains(name), "{} must not be reachable", name);
        }
        for name in ["getattr", "setattr", "vars", "globals", "locals", "dir", "input"] {
            assert!(!env.contains(name), "{} must not be reachable", name);
        }
        assert!(!env.contains(OUTPUT_NAME));
        assert!(env.contains("pl"));
        assert!(env.contains("sorted"));
    }

    #[test]
    fn test_names_cover_primitives_and_capabilities() {
        let bindings = CapabilityBindings::new()
            .with("st", Arc::new(Catalog::new()))
            .unwrap();
        let env = build_environment(bindings);
        let names: Vec<&str> = env.names().collect();
        assert_eq!(names.len(), ALLOWED_PRIMITIVES.len() + 1);
        assert_eq!(names.last(), Some(&"st"));
    }
}
