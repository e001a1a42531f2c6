//! Step definitions and the step registry.
//!
//! A [`StepDefinition`] declares a step's ports and names the external
//! handler that performs its work. The [`StepRegistry`] is the catalog
//! definitions are registered in before graph construction; handler code
//! is reached through [`crate::handler::StepHandler`], never embedded in
//! the definition itself.

use crate::core::{PortType, Value};
use crate::errors::BuildError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A declared input or output port of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDecl {
    /// The port name, unique within the step's inputs or outputs.
    pub name: String,

    /// The declared type of values crossing this port.
    #[serde(rename = "type")]
    pub port_type: PortType,

    /// A default value for a parameter input port.
    ///
    /// A default counts as a bound source; binding the port replaces it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PortDecl {
    /// Creates a new port declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            default: None,
        }
    }

    /// Sets a default value for a parameter input port.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// The definition of a step: identity, declared ports, handler reference.
///
/// Definitions are pure data; the opaque `handler_ref` is resolved to an
/// implementation by the executor's handler registry at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// The unique step name.
    pub name: String,

    /// Declared input ports, in declaration order.
    #[serde(default)]
    pub inputs: Vec<PortDecl>,

    /// Declared output ports, in declaration order.
    #[serde(default)]
    pub outputs: Vec<PortDecl>,

    /// Opaque identifier of the external handler performing the work.
    pub handler_ref: String,

    /// Per-step timeout, forwarded opaquely to the handler invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StepDefinition {
    /// Creates a new step definition with no ports.
    #[must_use]
    pub fn new(name: impl Into<String>, handler_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            handler_ref: handler_ref.into(),
            timeout_ms: None,
        }
    }

    /// Adds an input port.
    #[must_use]
    pub fn input(mut self, port: PortDecl) -> Self {
        self.inputs.push(port);
        self
    }

    /// Adds an output port.
    #[must_use]
    pub fn output(mut self, port: PortDecl) -> Self {
        self.outputs.push(port);
        self
    }

    /// Sets the per-step timeout forwarded to the handler.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Looks up a declared input port by name.
    #[must_use]
    pub fn find_input(&self, name: &str) -> Option<&PortDecl> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Looks up a declared output port by name.
    #[must_use]
    pub fn find_output(&self, name: &str) -> Option<&PortDecl> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// The catalog of step definitions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    definitions: HashMap<String, StepDefinition>,
    order: Vec<String>,
}

impl StepRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step definition.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DuplicateStep`] if the name is already taken.
    pub fn register(&mut self, definition: StepDefinition) -> Result<(), BuildError> {
        if self.definitions.contains_key(&definition.name) {
            return Err(BuildError::DuplicateStep {
                name: definition.name,
            });
        }
        self.order.push(definition.name.clone());
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Resolves a step definition by name.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::UnknownStep`] if no definition exists.
    pub fn resolve(&self, name: &str) -> Result<&StepDefinition, BuildError> {
        self.definitions.get(name).ok_or_else(|| BuildError::UnknownStep {
            name: name.to_string(),
        })
    }

    /// Returns the number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if no definitions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Iterates definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &StepDefinition> {
        self.order.iter().filter_map(|name| self.definitions.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ParamType;

    fn export_definition() -> StepDefinition {
        StepDefinition::new("export", "handlers.features_to_gcs")
            .input(PortDecl::new("bucket", PortType::Param(ParamType::String)))
            .output(PortDecl::new("snapshot", PortType::artifact("dataset")))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StepRegistry::new();
        registry.register(export_definition()).unwrap();

        let resolved = registry.resolve("export").unwrap();
        assert_eq!(resolved.handler_ref, "handlers.features_to_gcs");
        assert_eq!(resolved.inputs.len(), 1);
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut registry = StepRegistry::new();
        registry.register(export_definition()).unwrap();

        let err = registry.register(export_definition()).unwrap_err();
        assert_eq!(err, BuildError::DuplicateStep { name: "export".into() });
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = StepRegistry::new();
        let err = registry.resolve("missing").unwrap_err();
        assert_eq!(err, BuildError::UnknownStep { name: "missing".into() });
    }

    #[test]
    fn test_iter_preserves_registration_order() {
        let mut registry = StepRegistry::new();
        registry.register(StepDefinition::new("b", "h.b")).unwrap();
        registry.register(StepDefinition::new("a", "h.a")).unwrap();

        let names: Vec<_> = registry.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_find_ports() {
        let def = export_definition();
        assert!(def.find_input("bucket").is_some());
        assert!(def.find_input("snapshot").is_none());
        assert!(def.find_output("snapshot").is_some());
    }
}
