// # Component Registry
//
// Owns component records, maintains registration order for deterministic
// bulk operations, and delegates edge management to the dependency graph.
//
// Registries are per-instance so tests can build isolated fabrics; the
// process-wide accessor exists only as a convenience for glue code.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{FabricError, Result};

use super::{Component, ComponentId, ComponentLifecycle, ComponentState, DependencyGraph};

static GLOBAL_REGISTRY: Lazy<Arc<ComponentRegistry>> =
    Lazy::new(|| Arc::new(ComponentRegistry::new()));

struct RegistryInner {
    components: HashMap<ComponentId, Arc<RwLock<Component>>>,
    graph: DependencyGraph,
    registration_order: Vec<ComponentId>,
    lifecycles: HashMap<ComponentId, Arc<dyn ComponentLifecycle>>,
}

pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                components: HashMap::new(),
                graph: DependencyGraph::new(),
                registration_order: Vec::new(),
                lifecycles: HashMap::new(),
            }),
        }
    }

    // Process-wide shared instance. Prefer explicit injection in new code.
    pub fn global() -> Arc<ComponentRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    // Register a component. Fails on an empty id or a duplicate.
    pub fn register(
        &self,
        id: impl Into<ComponentId>,
        state: ComponentState,
        version: Option<&str>,
        description: Option<&str>,
    ) -> Result<Arc<RwLock<Component>>> {
        let id = id.into();
        if id.is_empty() {
            return Err(FabricError::InvalidId);
        }

        let mut inner = self.inner.write();
        if inner.components.contains_key(&id) {
            return Err(FabricError::AlreadyRegistered(id.0));
        }

        let mut component = Component::new(id.clone()).with_state(state);
        if let Some(version) = version {
            component = component.with_version(version);
        }
        if let Some(description) = description {
            component = component.with_description(description);
        }

        let component = Arc::new(RwLock::new(component));
        inner.components.insert(id.clone(), Arc::clone(&component));
        inner.graph.add_node(id.clone());
        inner.registration_order.push(id.clone());
        drop(inner);

        info!("Registered component: {} ({})", id, state);
        Ok(component)
    }

    // Remove a component from the registry, the graph, and the
    // registration order. Returns false if it was never registered.
    pub fn unregister(&self, id: &ComponentId) -> bool {
        let mut inner = self.inner.write();
        if inner.components.remove(id).is_none() {
            return false;
        }
        inner.graph.remove_node(id);
        inner.registration_order.retain(|c| c != id);
        inner.lifecycles.remove(id);
        drop(inner);

        info!("Unregistered component: {}", id);
        true
    }

    // Declare that `src` depends on `dep`. Both must be registered.
    // Idempotent; the edge is mirrored into the source component record.
    pub fn declare_dependency(&self, src: &ComponentId, dep: &ComponentId) -> Result<bool> {
        let inner = self.inner.read();
        if !inner.components.contains_key(src) {
            return Err(FabricError::UnknownComponent(src.0.clone()));
        }
        if !inner.components.contains_key(dep) {
            return Err(FabricError::UnknownComponent(dep.0.clone()));
        }
        drop(inner);

        let mut inner = self.inner.write();
        let added = inner.graph.add_edge(src, dep);
        if added {
            if let Some(component) = inner.components.get(src) {
                component.write().declare_dependency(dep.clone());
            }
        }
        drop(inner);

        debug!("Declared dependency: {} -> {}", src, dep);
        Ok(added)
    }

    pub fn get_component(&self, id: &ComponentId) -> Option<Arc<RwLock<Component>>> {
        self.inner.read().components.get(id).cloned()
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.inner.read().components.contains_key(id)
    }

    // All components in registration order.
    pub fn get_all_components(&self) -> Vec<(ComponentId, Arc<RwLock<Component>>)> {
        let inner = self.inner.read();
        inner
            .registration_order
            .iter()
            .map(|id| (id.clone(), Arc::clone(&inner.components[id])))
            .collect()
    }

    pub fn get_dependencies(&self, id: &ComponentId) -> Vec<ComponentId> {
        self.inner.read().graph.dependencies_of(id)
    }

    pub fn get_dependents(&self, id: &ComponentId) -> Vec<ComponentId> {
        self.inner.read().graph.dependents_of(id)
    }

    // Transitive dependents of `id` in breadth-first order.
    pub fn analyze_impact(&self, id: &ComponentId) -> Vec<ComponentId> {
        self.inner.read().graph.impact_bfs(id)
    }

    // Snapshot of the full edge map in registration order.
    pub fn dependency_graph(&self) -> Vec<(ComponentId, Vec<ComponentId>)> {
        self.inner.read().graph.all_edges()
    }

    // Dependency cycles, each as the component path forming the loop.
    // Cycles are permitted at declaration time; this surfaces them for
    // validation and diagnostics.
    pub fn detect_cycles(&self) -> Vec<Vec<ComponentId>> {
        self.inner.read().graph.find_cycles()
    }

    /// Components ordered so every dependency precedes its dependents.
    /// Fails with `CircularDependency` naming the cycles when no such
    /// order exists. The bulk lifecycle operations deliberately use
    /// registration order instead; this is for callers that want a
    /// dependency-aware bring-up sequence.
    pub fn initialization_order(&self) -> Result<Vec<ComponentId>> {
        let inner = self.inner.read();
        if let Some(order) = inner.graph.topological_order() {
            return Ok(order);
        }
        let rendered: Vec<String> = inner
            .graph
            .find_cycles()
            .iter()
            .map(|cycle| {
                cycle
                    .iter()
                    .map(|c| c.0.clone())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            })
            .collect();
        Err(FabricError::CircularDependency(rendered.join(", ")))
    }

    // Attach the optional lifecycle capability for a registered component.
    pub fn attach_lifecycle(
        &self,
        id: &ComponentId,
        lifecycle: Arc<dyn ComponentLifecycle>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.components.contains_key(id) {
            return Err(FabricError::UnknownComponent(id.0.clone()));
        }
        inner.lifecycles.insert(id.clone(), lifecycle);
        Ok(())
    }

    fn lifecycle_of(&self, id: &ComponentId) -> Option<Arc<dyn ComponentLifecycle>> {
        self.inner.read().lifecycles.get(id).cloned()
    }

    // Lifecycle handles in registration order (reversed for stop).
    fn lifecycles_in_order(&self, reverse: bool) -> Vec<(ComponentId, Arc<dyn ComponentLifecycle>)> {
        let inner = self.inner.read();
        let mut ids: Vec<ComponentId> = inner.registration_order.clone();
        if reverse {
            ids.reverse();
        }
        ids.into_iter()
            .filter_map(|id| inner.lifecycles.get(&id).cloned().map(|lc| (id, lc)))
            .collect()
    }

    pub async fn initialize_component(&self, id: &ComponentId) -> Result<()> {
        match self.lifecycle_of(id) {
            Some(lifecycle) => lifecycle.initialize().await,
            None => Ok(()),
        }
    }

    pub async fn start_component(&self, id: &ComponentId) -> Result<()> {
        match self.lifecycle_of(id) {
            Some(lifecycle) => lifecycle.start().await,
            None => Ok(()),
        }
    }

    pub async fn stop_component(&self, id: &ComponentId) -> Result<()> {
        match self.lifecycle_of(id) {
            Some(lifecycle) => lifecycle.stop().await,
            None => Ok(()),
        }
    }

    // Initialize every component with a lifecycle, in registration order.
    pub async fn initialize_all(&self) -> Result<()> {
        let mut failed = Vec::new();
        for (id, lifecycle) in self.lifecycles_in_order(false) {
            debug!("Initializing component: {}", id);
            if let Err(e) = lifecycle.initialize().await {
                warn!("Failed to initialize {}: {}", id, e);
                failed.push(id.0);
            }
        }
        Self::bulk_result("initialize", failed)
    }

    pub async fn start_all(&self) -> Result<()> {
        let mut failed = Vec::new();
        for (id, lifecycle) in self.lifecycles_in_order(false) {
            debug!("Starting component: {}", id);
            if let Err(e) = lifecycle.start().await {
                warn!("Failed to start {}: {}", id, e);
                failed.push(id.0);
            }
        }
        Self::bulk_result("start", failed)
    }

    // Stop in reverse registration order so dependents go down first.
    pub async fn stop_all(&self) -> Result<()> {
        let mut failed = Vec::new();
        for (id, lifecycle) in self.lifecycles_in_order(true) {
            debug!("Stopping component: {}", id);
            if let Err(e) = lifecycle.stop().await {
                warn!("Failed to stop {}: {}", id, e);
                failed.push(id.0);
            }
        }
        Self::bulk_result("stop", failed)
    }

    fn bulk_result(op: &str, failed: Vec<String>) -> Result<()> {
        if failed.is_empty() {
            Ok(())
        } else {
            Err(FabricError::Internal(format!(
                "Failed to {} {} component(s): {}",
                op,
                failed.len(),
                failed.join(", ")
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().components.is_empty()
    }

    // Test-only full reset.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.components.clear();
        inner.graph.clear();
        inner.registration_order.clear();
        inner.lifecycles.clear();
        info!("Component registry cleared");
    }

    pub fn reset_for_test(&self) {
        self.clear();
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn id(s: &str) -> ComponentId {
        ComponentId::new(s)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ComponentRegistry::new();
        registry
            .register("db", ComponentState::Running, Some("2.1.0"), None)
            .unwrap();

        let comp = registry.get_component(&id("db")).unwrap();
        let comp = comp.read();
        assert_eq!(comp.state, ComponentState::Running);
        assert_eq!(comp.version.as_deref(), Some("2.1.0"));
    }

    #[test]
    fn test_register_empty_id_rejected() {
        let registry = ComponentRegistry::new();
        let err = registry
            .register("", ComponentState::Unknown, None, None)
            .unwrap_err();
        assert!(matches!(err, FabricError::InvalidId));
    }

    #[test]
    fn test_duplicate_registration_does_not_mutate() {
        let registry = ComponentRegistry::new();
        registry
            .register("db", ComponentState::Running, Some("1.0.0"), None)
            .unwrap();

        let err = registry
            .register("db", ComponentState::Failed, Some("9.9.9"), None)
            .unwrap_err();
        assert!(matches!(err, FabricError::AlreadyRegistered(_)));

        // Original record untouched.
        let comp = registry.get_component(&id("db")).unwrap();
        assert_eq!(comp.read().state, ComponentState::Running);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_declare_dependency_requires_registration() {
        let registry = ComponentRegistry::new();
        registry
            .register("api", ComponentState::Unknown, None, None)
            .unwrap();

        let err = registry
            .declare_dependency(&id("api"), &id("db"))
            .unwrap_err();
        assert!(matches!(err, FabricError::UnknownComponent(_)));
    }

    #[test]
    fn test_dependency_order_is_declaration_order() {
        let registry = ComponentRegistry::new();
        for c in ["a", "b", "c"] {
            registry.register(c, ComponentState::Unknown, None, None).unwrap();
        }
        registry.declare_dependency(&id("a"), &id("b")).unwrap();
        registry.declare_dependency(&id("a"), &id("c")).unwrap();
        assert_eq!(registry.get_dependencies(&id("a")), vec![id("b"), id("c")]);

        // Mirrored onto the component record as well.
        let comp = registry.get_component(&id("a")).unwrap();
        assert_eq!(comp.read().dependencies, vec![id("b"), id("c")]);
    }

    #[test]
    fn test_unregister_cleans_graph() {
        let registry = ComponentRegistry::new();
        for c in ["a", "b"] {
            registry.register(c, ComponentState::Unknown, None, None).unwrap();
        }
        registry.declare_dependency(&id("a"), &id("b")).unwrap();

        assert!(registry.unregister(&id("b")));
        assert!(!registry.unregister(&id("b")));
        assert!(registry.get_dependencies(&id("a")).is_empty());
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry = ComponentRegistry::new();
        for c in ["z", "a", "m"] {
            registry.register(c, ComponentState::Unknown, None, None).unwrap();
        }
        let ids: Vec<_> = registry
            .get_all_components()
            .into_iter()
            .map(|(id, _)| id.0)
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_initialization_order_is_dependency_aware() {
        let registry = ComponentRegistry::new();
        for c in ["ui", "api", "db"] {
            registry.register(c, ComponentState::Unknown, None, None).unwrap();
        }
        registry.declare_dependency(&id("ui"), &id("api")).unwrap();
        registry.declare_dependency(&id("api"), &id("db")).unwrap();

        assert!(registry.detect_cycles().is_empty());
        assert_eq!(
            registry.initialization_order().unwrap(),
            vec![id("db"), id("api"), id("ui")]
        );
    }

    #[test]
    fn test_initialization_order_rejects_cycles() {
        let registry = ComponentRegistry::new();
        for c in ["a", "b"] {
            registry.register(c, ComponentState::Unknown, None, None).unwrap();
        }
        registry.declare_dependency(&id("a"), &id("b")).unwrap();
        registry.declare_dependency(&id("b"), &id("a")).unwrap();

        let cycles = registry.detect_cycles();
        assert_eq!(cycles, vec![vec![id("a"), id("b")]]);

        let err = registry.initialization_order().unwrap_err();
        match err {
            FabricError::CircularDependency(detail) => {
                assert!(detail.contains("a -> b"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    struct CountingLifecycle {
        started: AtomicUsize,
        stopped: AtomicUsize,
        stop_log: Arc<parking_lot::Mutex<Vec<String>>>,
        name: String,
    }

    #[async_trait::async_trait]
    impl ComponentLifecycle for CountingLifecycle {
        async fn start(&self) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            self.stop_log.lock().push(self.name.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_all_reverse_order() {
        let registry = ComponentRegistry::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for c in ["first", "second", "third"] {
            registry.register(c, ComponentState::Unknown, None, None).unwrap();
            registry
                .attach_lifecycle(
                    &id(c),
                    Arc::new(CountingLifecycle {
                        started: AtomicUsize::new(0),
                        stopped: AtomicUsize::new(0),
                        stop_log: Arc::clone(&log),
                        name: c.to_string(),
                    }),
                )
                .unwrap();
        }

        registry.start_all().await.unwrap();
        registry.stop_all().await.unwrap();

        assert_eq!(*log.lock(), vec!["third", "second", "first"]);
    }
}
