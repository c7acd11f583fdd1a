// Integration Fabric - process-local substrate for component
// registration, dependency tracking, typed event routing, health
// monitoring with cascading status propagation, and cross-component
// transaction logging.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod error;
pub mod events;
pub mod monitoring;
pub mod registry;
pub mod transactions;

pub use error::{FabricError, Result};
pub use events::{Event, EventBus, EventCategory, EventFilter, EventPriority, EventSubscriber};
pub use monitoring::{
    ComponentStatus, ComponentStatusAdapter, HealthMetric, HealthStatus, IntegrationHealth,
    ServiceHealthDashboard, StatusRecord, StatusTracker,
};
pub use registry::{
    Component, ComponentId, ComponentLifecycle, ComponentRegistry, ComponentState,
    InterfaceRegistry,
};
pub use transactions::{Transaction, TransactionLogger, TransactionScope, TransactionStage};

/// Fabric configuration, externalized at startup.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub event_log_path: PathBuf,
    pub mailbox_capacity: usize,
    pub shutdown_wait: Duration,
    pub history_limit: usize,
    pub max_transactions: usize,
    pub transaction_log_path: Option<PathBuf>,
    pub metrics_history_limit: usize,
    pub polling_interval: Duration,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            event_log_path: std::env::temp_dir()
                .join(format!("fabric_events_{}.jsonl", std::process::id())),
            mailbox_capacity: 256,
            shutdown_wait: Duration::from_secs(2),
            history_limit: 1000,
            max_transactions: 1000,
            transaction_log_path: None,
            metrics_history_limit: 1000,
            polling_interval: Duration::from_secs(60),
        }
    }
}

/// The whole substrate constructed as one unit: registry, tracker,
/// dashboard, adapter, event bus, interface registry, transaction
/// logger, and health collector, wired together from one config.
pub struct Fabric {
    config: FabricConfig,
    registry: Arc<ComponentRegistry>,
    tracker: Arc<StatusTracker>,
    dashboard: Arc<ServiceHealthDashboard>,
    adapter: Arc<ComponentStatusAdapter>,
    events: Arc<EventBus>,
    interfaces: Arc<InterfaceRegistry>,
    transactions: Arc<TransactionLogger>,
    health: Arc<IntegrationHealth>,
}

impl Fabric {
    pub fn new(config: FabricConfig) -> Self {
        let registry = Arc::new(ComponentRegistry::new());
        let tracker = Arc::new(
            StatusTracker::new(config.history_limit).with_registry(Arc::clone(&registry)),
        );
        let dashboard = Arc::new(ServiceHealthDashboard::new(
            Arc::clone(&tracker),
            Arc::clone(&registry),
        ));
        let events = Arc::new(EventBus::with_settings(
            config.event_log_path.clone(),
            config.mailbox_capacity,
            config.shutdown_wait,
        ));
        let adapter = ComponentStatusAdapter::with_event_bus(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&dashboard),
            Arc::clone(&events),
        );
        let interfaces = Arc::new(InterfaceRegistry::new().with_event_bus(Arc::clone(&events)));

        let mut transactions = TransactionLogger::new(config.max_transactions);
        if let Some(path) = &config.transaction_log_path {
            transactions = transactions.with_persistence(path);
        }
        let transactions = Arc::new(transactions);

        let health = Arc::new(IntegrationHealth::new(
            config.polling_interval,
            config.metrics_history_limit,
        ));

        Self {
            config,
            registry,
            tracker,
            dashboard,
            adapter,
            events,
            interfaces,
            transactions,
            health,
        }
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub fn dashboard(&self) -> &Arc<ServiceHealthDashboard> {
        &self.dashboard
    }

    pub fn adapter(&self) -> &Arc<ComponentStatusAdapter> {
        &self.adapter
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn interfaces(&self) -> &Arc<InterfaceRegistry> {
        &self.interfaces
    }

    pub fn transactions(&self) -> &Arc<TransactionLogger> {
        &self.transactions
    }

    pub fn health(&self) -> &Arc<IntegrationHealth> {
        &self.health
    }

    pub fn start(&self) {
        self.events.start();
    }

    pub async fn shutdown(&self) {
        self.health.stop_polling();
        self.events.stop().await;
    }

    // Test-only: wipe every part of the fabric.
    pub fn reset_for_test(&self) {
        self.health.stop_polling();
        self.health.clear();
        self.transactions.clear();
        self.adapter.clear();
        self.dashboard.reset_for_test();
        self.tracker.clear();
        self.interfaces.clear();
        self.registry.clear();
        self.events.reset_for_test();
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new(FabricConfig::default())
    }
}
