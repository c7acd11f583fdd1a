// Component registry: component records, dependency graph, lifecycle
// management, and the interface contract system.

pub mod component;
pub mod component_registry;
pub mod dependency_graph;
pub mod interface_registry;

pub use component::{Component, ComponentId, ComponentLifecycle, ComponentState};
pub use component_registry::ComponentRegistry;
pub use dependency_graph::DependencyGraph;
pub use interface_registry::{
    ImplementationManifest, InterfaceRegistry, InterfaceSpec, OperationSpec, ParamSpec,
};
