// # Interface Registry
//
// Named, semver-versioned interface contracts. Implementations register a
// manifest of their operation signatures and are validated against the
// contract (operation names, parameter shapes, return shapes). Successful
// registrations are announced on the event bus.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{FabricError, Result};
use crate::events::{event_types, spawn_publish, Event, EventBus, EventCategory, EventPriority};

use super::ComponentId;

/// A single named parameter in an operation signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub type_name: String,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Abstract operation signature within an interface contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub returns: Option<String>,
}

impl OperationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push(ParamSpec::new(name, type_name));
        self
    }

    pub fn with_return(mut self, type_name: impl Into<String>) -> Self {
        self.returns = Some(type_name.into());
        self
    }
}

/// A versioned interface descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub operations: Vec<OperationSpec>,
}

impl InterfaceSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            operations: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_operation(mut self, operation: OperationSpec) -> Self {
        self.operations.push(operation);
        self
    }

    fn operation(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Semver-style compatibility: major versions must match.
    pub fn is_compatible(&self, requested: &str) -> bool {
        major_of(&self.version)
            .zip(major_of(requested))
            .is_some_and(|(a, b)| a == b)
    }
}

fn major_of(version: &str) -> Option<u64> {
    version.split('.').next()?.parse().ok()
}

/// The operations an implementation actually exposes, declared at
/// registration time and validated against the interface contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementationManifest {
    pub operations: Vec<OperationSpec>,
}

impl ImplementationManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: OperationSpec) -> Self {
        self.operations.push(operation);
        self
    }

    fn operation(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.iter().find(|op| op.name == name)
    }
}

#[derive(Debug, Clone)]
struct Registration {
    component_id: ComponentId,
    manifest: ImplementationManifest,
}

struct InterfaceRegistryInner {
    interfaces: HashMap<String, InterfaceSpec>,
    implementations: HashMap<String, Vec<Registration>>,
}

pub struct InterfaceRegistry {
    inner: RwLock<InterfaceRegistryInner>,
    events: Option<Arc<EventBus>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(InterfaceRegistryInner {
                interfaces: HashMap::new(),
                implementations: HashMap::new(),
            }),
            events: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    // Register an interface contract. Re-registering the identical spec is
    // an idempotent no-op (returns false); a conflicting redefinition of
    // the same name is an error.
    pub fn register_interface(&self, spec: InterfaceSpec) -> Result<bool> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.interfaces.get(&spec.name) {
            if *existing == spec {
                return Ok(false);
            }
            return Err(FabricError::Interface(format!(
                "Interface {} already registered with a different contract",
                spec.name
            )));
        }

        info!("Registered interface: {} v{}", spec.name, spec.version);
        let (name, version) = (spec.name.clone(), spec.version.clone());
        inner.interfaces.insert(spec.name.clone(), spec);
        drop(inner);

        if let Some(bus) = &self.events {
            let event = Event::new(
                event_types::INTERFACE_REGISTERED,
                EventCategory::Integration,
                "interface.registry",
            )
            .with_data_entry("interface", name)
            .with_data_entry("version", version);
            spawn_publish(bus, event);
        }
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<InterfaceSpec> {
        self.inner.read().interfaces.get(name).cloned()
    }

    pub fn get_version(&self, name: &str) -> Option<String> {
        self.inner
            .read()
            .interfaces
            .get(name)
            .map(|spec| spec.version.clone())
    }

    pub fn all(&self) -> Vec<InterfaceSpec> {
        self.inner.read().interfaces.values().cloned().collect()
    }

    /// Validate a manifest against the named contract. Returns the list
    /// of violations; empty means conformant.
    pub fn validate_manifest(&self, name: &str, manifest: &ImplementationManifest) -> Vec<String> {
        let inner = self.inner.read();
        let Some(spec) = inner.interfaces.get(name) else {
            return vec![format!("Unknown interface: {}", name)];
        };

        let mut errors = Vec::new();
        for required in &spec.operations {
            let Some(provided) = manifest.operation(&required.name) else {
                errors.push(format!("Missing operation: {}", required.name));
                continue;
            };

            if provided.params.len() < required.params.len() {
                errors.push(format!(
                    "Operation {} has too few parameters ({} < {})",
                    required.name,
                    provided.params.len(),
                    required.params.len()
                ));
            }

            for (required_param, provided_param) in
                required.params.iter().zip(provided.params.iter())
            {
                if required_param.name != provided_param.name {
                    errors.push(format!(
                        "Parameter name mismatch in {}: {} != {}",
                        required.name, provided_param.name, required_param.name
                    ));
                } else if required_param.type_name != provided_param.type_name {
                    errors.push(format!(
                        "Parameter type mismatch for {}.{}: {} != {}",
                        required.name,
                        required_param.name,
                        provided_param.type_name,
                        required_param.type_name
                    ));
                }
            }

            if required.returns.is_some() && provided.returns != required.returns {
                errors.push(format!(
                    "Return type mismatch in {}: {:?} != {:?}",
                    required.name, provided.returns, required.returns
                ));
            }
        }
        errors
    }

    // Register a component as an implementation of an interface. Emits an
    // `interface.registered` event on success.
    pub fn register_implementation(
        &self,
        name: &str,
        component_id: ComponentId,
        manifest: ImplementationManifest,
    ) -> Result<()> {
        let errors = self.validate_manifest(name, &manifest);
        if !errors.is_empty() {
            warn!(
                "Implementation of {} by {} rejected: {} violation(s)",
                name,
                component_id,
                errors.len()
            );
            return Err(FabricError::InterfaceValidation(errors));
        }

        let version = {
            let mut inner = self.inner.write();
            inner
                .implementations
                .entry(name.to_string())
                .or_default()
                .push(Registration {
                    component_id: component_id.clone(),
                    manifest,
                });
            inner.interfaces[name].version.clone()
        };

        info!("Registered implementation of {} by {}", name, component_id);

        if let Some(bus) = &self.events {
            let event = Event::new(
                event_types::INTERFACE_REGISTERED,
                EventCategory::Integration,
                component_id,
            )
            .with_priority(EventPriority::Normal)
            .with_data_entry("interface", name)
            .with_data_entry("version", version);
            spawn_publish(bus, event);
        }

        Ok(())
    }

    pub fn implementations_of(&self, name: &str) -> Vec<ComponentId> {
        self.inner
            .read()
            .implementations
            .get(name)
            .map(|regs| regs.iter().map(|r| r.component_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Documentation payload for an interface: name, version, and the
    /// operation signatures in a dictionary shape.
    pub fn describe(&self, name: &str) -> Option<Value> {
        let inner = self.inner.read();
        let spec = inner.interfaces.get(name)?;
        Some(json!({
            "name": spec.name,
            "version": spec.version,
            "description": spec.description,
            "operations": spec.operations.iter().map(|op| json!({
                "name": op.name,
                "params": op.params.iter().map(|p| json!({
                    "name": p.name,
                    "type": p.type_name,
                })).collect::<Vec<_>>(),
                "returns": op.returns,
            })).collect::<Vec<_>>(),
            "implementations": inner
                .implementations
                .get(name)
                .map(|regs| regs.iter().map(|r| r.component_id.0.clone()).collect::<Vec<_>>())
                .unwrap_or_default(),
        }))
    }

    pub fn stats(&self) -> (usize, usize) {
        let inner = self.inner.read();
        let implementations = inner.implementations.values().map(Vec::len).sum();
        (inner.interfaces.len(), implementations)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.interfaces.clear();
        inner.implementations.clear();
    }
}

impl Default for InterfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_interface() -> InterfaceSpec {
        InterfaceSpec::new("content.search", "2.1.0")
            .with_description("Keyword search over indexed content")
            .with_operation(
                OperationSpec::new("search")
                    .with_param("query", "string")
                    .with_param("limit", "int")
                    .with_return("list"),
            )
            .with_operation(OperationSpec::new("reindex").with_return("bool"))
    }

    fn conformant_manifest() -> ImplementationManifest {
        ImplementationManifest::new()
            .with_operation(
                OperationSpec::new("search")
                    .with_param("query", "string")
                    .with_param("limit", "int")
                    .with_return("list"),
            )
            .with_operation(OperationSpec::new("reindex").with_return("bool"))
    }

    #[test]
    fn test_register_interface_idempotent() {
        let registry = InterfaceRegistry::new();
        assert!(registry.register_interface(search_interface()).unwrap());
        assert!(!registry.register_interface(search_interface()).unwrap());

        let conflicting = InterfaceSpec::new("content.search", "3.0.0");
        assert!(registry.register_interface(conflicting).is_err());
    }

    #[test]
    fn test_conformant_manifest_passes() {
        let registry = InterfaceRegistry::new();
        registry.register_interface(search_interface()).unwrap();
        let errors = registry.validate_manifest("content.search", &conformant_manifest());
        assert!(errors.is_empty(), "unexpected violations: {:?}", errors);
    }

    #[test]
    fn test_validation_reports_each_violation() {
        let registry = InterfaceRegistry::new();
        registry.register_interface(search_interface()).unwrap();

        let manifest = ImplementationManifest::new().with_operation(
            OperationSpec::new("search")
                .with_param("q", "string")
                .with_param("limit", "int")
                .with_return("string"),
        );
        let errors = registry.validate_manifest("content.search", &manifest);
        assert!(errors.iter().any(|e| e.contains("Missing operation: reindex")));
        assert!(errors.iter().any(|e| e.contains("Parameter name mismatch")));
        assert!(errors.iter().any(|e| e.contains("Return type mismatch")));
    }

    #[test]
    fn test_register_implementation_rejects_invalid() {
        let registry = InterfaceRegistry::new();
        registry.register_interface(search_interface()).unwrap();

        let err = registry
            .register_implementation(
                "content.search",
                ComponentId::new("search.engine"),
                ImplementationManifest::new(),
            )
            .unwrap_err();
        assert!(matches!(err, FabricError::InterfaceValidation(_)));
        assert!(registry.implementations_of("content.search").is_empty());
    }

    #[test]
    fn test_register_implementation_and_describe() {
        let registry = InterfaceRegistry::new();
        registry.register_interface(search_interface()).unwrap();
        registry
            .register_implementation(
                "content.search",
                ComponentId::new("search.engine"),
                conformant_manifest(),
            )
            .unwrap();

        assert_eq!(
            registry.implementations_of("content.search"),
            vec![ComponentId::new("search.engine")]
        );

        let doc = registry.describe("content.search").unwrap();
        assert_eq!(doc["version"], "2.1.0");
        assert_eq!(doc["operations"][0]["name"], "search");
        assert_eq!(doc["implementations"][0], "search.engine");
        assert_eq!(registry.stats(), (1, 1));
    }

    #[test]
    fn test_version_compatibility_is_major_based() {
        let spec = search_interface();
        assert!(spec.is_compatible("2.0.0"));
        assert!(spec.is_compatible("2.9.3"));
        assert!(!spec.is_compatible("1.9.0"));
        assert!(!spec.is_compatible("not-a-version"));
    }
}
