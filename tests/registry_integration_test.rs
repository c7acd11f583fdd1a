// Registry, dependency graph, and interface contract integration tests.

use std::sync::Arc;

use integration_fabric::registry::{
    ComponentId, ComponentLifecycle, ComponentRegistry, ComponentState, ImplementationManifest,
    InterfaceRegistry, InterfaceSpec, OperationSpec,
};
use integration_fabric::FabricError;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn id(s: &str) -> ComponentId {
    ComponentId::new(s)
}

#[test]
fn test_reregistration_fails_without_mutation() {
    let registry = ComponentRegistry::new();
    registry
        .register("auth", ComponentState::Running, Some("1.0.0"), Some("auth service"))
        .unwrap();

    let err = registry
        .register("auth", ComponentState::Failed, Some("2.0.0"), None)
        .unwrap_err();
    assert!(matches!(err, FabricError::AlreadyRegistered(_)));

    let component = registry.get_component(&id("auth")).unwrap();
    let component = component.read();
    assert_eq!(component.state, ComponentState::Running);
    assert_eq!(component.version.as_deref(), Some("1.0.0"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_dependency_edges_keep_declaration_order() {
    let registry = ComponentRegistry::new();
    for c in ["a", "b", "c"] {
        registry.register(c, ComponentState::Unknown, None, None).unwrap();
    }
    registry.declare_dependency(&id("a"), &id("b")).unwrap();
    registry.declare_dependency(&id("a"), &id("c")).unwrap();
    // Idempotent redeclaration does not duplicate or reorder.
    registry.declare_dependency(&id("a"), &id("b")).unwrap();

    assert_eq!(registry.get_dependencies(&id("a")), vec![id("b"), id("c")]);
}

#[test]
fn test_impact_analysis_chain_order() {
    // A -> B, B -> C, A -> D: impact of C starts at B, A only after B.
    let registry = ComponentRegistry::new();
    for c in ["a", "b", "c", "d"] {
        registry.register(c, ComponentState::Unknown, None, None).unwrap();
    }
    registry.declare_dependency(&id("a"), &id("b")).unwrap();
    registry.declare_dependency(&id("b"), &id("c")).unwrap();
    registry.declare_dependency(&id("a"), &id("d")).unwrap();

    let impact = registry.analyze_impact(&id("c"));
    assert_eq!(impact, vec![id("b"), id("a")]);
}

#[test]
fn test_impact_analysis_diamond_bfs_order() {
    // A -> B, A -> C, B -> D, C -> D: impact of D is [B, C, A].
    let registry = ComponentRegistry::new();
    for c in ["a", "b", "c", "d"] {
        registry.register(c, ComponentState::Unknown, None, None).unwrap();
    }
    registry.declare_dependency(&id("a"), &id("b")).unwrap();
    registry.declare_dependency(&id("a"), &id("c")).unwrap();
    registry.declare_dependency(&id("b"), &id("d")).unwrap();
    registry.declare_dependency(&id("c"), &id("d")).unwrap();

    assert_eq!(
        registry.analyze_impact(&id("d")),
        vec![id("b"), id("c"), id("a")]
    );
}

#[test]
fn test_unregister_scrubs_every_table() {
    let registry = ComponentRegistry::new();
    for c in ["db", "api"] {
        registry.register(c, ComponentState::Running, None, None).unwrap();
    }
    registry.declare_dependency(&id("api"), &id("db")).unwrap();

    assert!(registry.unregister(&id("db")));
    assert!(registry.get_component(&id("db")).is_none());
    assert!(registry.get_dependencies(&id("api")).is_empty());
    assert!(registry.analyze_impact(&id("db")).is_empty());

    // Re-registration after unregister works again.
    registry.register("db", ComponentState::Unknown, None, None).unwrap();
}

struct OrderedLifecycle {
    name: &'static str,
    log: Arc<parking_lot::Mutex<Vec<(&'static str, &'static str)>>>,
}

#[async_trait::async_trait]
impl ComponentLifecycle for OrderedLifecycle {
    async fn initialize(&self) -> integration_fabric::Result<()> {
        self.log.lock().push(("init", self.name));
        Ok(())
    }

    async fn start(&self) -> integration_fabric::Result<()> {
        self.log.lock().push(("start", self.name));
        Ok(())
    }

    async fn stop(&self) -> integration_fabric::Result<()> {
        self.log.lock().push(("stop", self.name));
        Ok(())
    }
}

#[tokio::test]
async fn test_lifecycle_bulk_operations_ordering() {
    init_tracing();
    let registry = ComponentRegistry::new();
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for name in ["db", "api", "ui"] {
        registry.register(name, ComponentState::Unknown, None, None).unwrap();
    }
    for name in ["db", "api", "ui"] {
        registry
            .attach_lifecycle(
                &id(name),
                Arc::new(OrderedLifecycle {
                    name,
                    log: Arc::clone(&log),
                }),
            )
            .unwrap();
    }

    registry.initialize_all().await.unwrap();
    registry.start_all().await.unwrap();
    registry.stop_all().await.unwrap();

    let log = log.lock();
    let inits: Vec<_> = log.iter().filter(|(op, _)| *op == "init").map(|(_, n)| *n).collect();
    let starts: Vec<_> = log.iter().filter(|(op, _)| *op == "start").map(|(_, n)| *n).collect();
    let stops: Vec<_> = log.iter().filter(|(op, _)| *op == "stop").map(|(_, n)| *n).collect();

    assert_eq!(inits, vec!["db", "api", "ui"]);
    assert_eq!(starts, vec!["db", "api", "ui"]);
    // Reverse registration order for stop.
    assert_eq!(stops, vec!["ui", "api", "db"]);
}

#[test]
fn test_interface_contract_validation_end_to_end() {
    let interfaces = InterfaceRegistry::new();
    interfaces
        .register_interface(
            InterfaceSpec::new("storage.blob", "1.2.0")
                .with_description("Blob read/write contract")
                .with_operation(
                    OperationSpec::new("put")
                        .with_param("key", "string")
                        .with_param("bytes", "bytes")
                        .with_return("bool"),
                )
                .with_operation(
                    OperationSpec::new("get")
                        .with_param("key", "string")
                        .with_return("bytes"),
                ),
        )
        .unwrap();

    // A manifest missing `get` and misnaming a parameter is rejected with
    // every violation listed.
    let bad = ImplementationManifest::new().with_operation(
        OperationSpec::new("put")
            .with_param("k", "string")
            .with_param("bytes", "bytes")
            .with_return("bool"),
    );
    let err = interfaces
        .register_implementation("storage.blob", id("blob.store"), bad)
        .unwrap_err();
    match err {
        FabricError::InterfaceValidation(errors) => {
            assert_eq!(errors.len(), 2);
        }
        other => panic!("unexpected error: {}", other),
    }

    // A conformant manifest registers and shows up in describe().
    let good = ImplementationManifest::new()
        .with_operation(
            OperationSpec::new("put")
                .with_param("key", "string")
                .with_param("bytes", "bytes")
                .with_return("bool"),
        )
        .with_operation(
            OperationSpec::new("get")
                .with_param("key", "string")
                .with_return("bytes"),
        );
    interfaces
        .register_implementation("storage.blob", id("blob.store"), good)
        .unwrap();

    assert_eq!(
        interfaces.implementations_of("storage.blob"),
        vec![id("blob.store")]
    );
    let doc = interfaces.describe("storage.blob").unwrap();
    assert_eq!(doc["name"], "storage.blob");
    assert_eq!(doc["operations"].as_array().unwrap().len(), 2);
}

#[test]
fn test_registry_clear_resets_state() {
    let registry = ComponentRegistry::new();
    registry.register("db", ComponentState::Running, None, None).unwrap();
    registry.clear();
    assert!(registry.is_empty());
    assert!(registry.get_component(&id("db")).is_none());
}
