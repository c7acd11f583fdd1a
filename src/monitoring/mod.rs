// Health monitoring: status tracking with transition validation, the
// service health dashboard with cascading, the registry/tracker/dashboard
// adapter, and periodic health metric collection.

pub mod adapter;
pub mod dashboard;
pub mod health;
pub mod status;

pub use adapter::ComponentStatusAdapter;
pub use dashboard::{AlertCallback, CallbackId, ServiceHealthDashboard, StatusListener};
pub use health::{
    HealthMetric, HealthMetricType, HealthProvider, HealthStatus, IntegrationHealth, MetricTimer,
};
pub use status::{
    ComponentStatus, ComponentStatusProvider, StatusProvider, StatusRecord, StatusTracker,
    FORCED_KEY,
};
