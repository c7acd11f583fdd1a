// # Component Status Adapter
//
// Glue between the registry, the status tracker, and the dashboard.
// Registration creates a provider bound to the live component record and
// seeds the first status with a forced update. The adapter observes every
// dashboard update (including cascades) through a dashboard listener, so
// its own listeners and alert dedup see the same stream, and optionally
// announces accepted updates on the event bus.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::events::{event_types, spawn_publish, Event, EventBus, EventCategory, EventPriority};
use crate::registry::{Component, ComponentId, ComponentRegistry, ComponentState};

use super::dashboard::{AlertCallback, ServiceHealthDashboard, StatusListener};
use super::status::{ComponentStatus, ComponentStatusProvider, StatusTracker};

const CHANGE_HISTORY_LIMIT: usize = 1000;

struct AdapterInner {
    global_listeners: Vec<StatusListener>,
    component_listeners: HashMap<ComponentId, Vec<StatusListener>>,
    alert_callbacks: Vec<AlertCallback>,
    last_alerted: HashMap<ComponentId, ComponentState>,
    last_states: HashMap<ComponentId, ComponentState>,
    change_history: HashMap<ComponentId, Vec<ComponentStatus>>,
}

pub struct ComponentStatusAdapter {
    registry: Arc<ComponentRegistry>,
    tracker: Arc<StatusTracker>,
    dashboard: Arc<ServiceHealthDashboard>,
    events: Option<Arc<EventBus>>,
    inner: Mutex<AdapterInner>,
}

impl ComponentStatusAdapter {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        tracker: Arc<StatusTracker>,
        dashboard: Arc<ServiceHealthDashboard>,
    ) -> Arc<Self> {
        Self::build(registry, tracker, dashboard, None)
    }

    pub fn with_event_bus(
        registry: Arc<ComponentRegistry>,
        tracker: Arc<StatusTracker>,
        dashboard: Arc<ServiceHealthDashboard>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Self::build(registry, tracker, dashboard, Some(bus))
    }

    fn build(
        registry: Arc<ComponentRegistry>,
        tracker: Arc<StatusTracker>,
        dashboard: Arc<ServiceHealthDashboard>,
        events: Option<Arc<EventBus>>,
    ) -> Arc<Self> {
        let adapter = Arc::new(Self {
            registry,
            tracker,
            dashboard: Arc::clone(&dashboard),
            events,
            inner: Mutex::new(AdapterInner {
                global_listeners: Vec::new(),
                component_listeners: HashMap::new(),
                alert_callbacks: Vec::new(),
                last_alerted: HashMap::new(),
                last_states: HashMap::new(),
                change_history: HashMap::new(),
            }),
        });

        // Observe every dashboard update, cascades included.
        let weak: Weak<Self> = Arc::downgrade(&adapter);
        dashboard.register_status_listener(Arc::new(move |id, status| {
            if let Some(adapter) = weak.upgrade() {
                adapter.on_dashboard_update(id, status);
            }
        }));

        adapter
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn dashboard(&self) -> &Arc<ServiceHealthDashboard> {
        &self.dashboard
    }

    /// Register a component with the registry, bind a provider to the
    /// live record, and seed the tracker with a forced initial update.
    pub fn register_component(
        &self,
        id: impl Into<ComponentId>,
        state: Option<ComponentState>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<Arc<RwLock<Component>>> {
        let id = id.into();
        let state = state.unwrap_or(ComponentState::Unknown);
        let component = self.registry.register(id.clone(), state, None, None)?;

        if let Some(metadata) = metadata {
            component.write().metadata.extend(metadata);
        }

        self.tracker.register_provider(
            id.clone(),
            Arc::new(ComponentStatusProvider::new(Arc::clone(&component))),
        );
        self.dashboard
            .update_component_status(&id, Some(state), None, true)?;

        info!("Adapter registered component: {} ({})", id, state);
        Ok(component)
    }

    /// Symmetric cleanup: provider, registry record, listeners, and
    /// bookkeeping for the id.
    pub fn unregister_component(&self, id: &ComponentId) -> bool {
        self.tracker.unregister_provider(id);
        let removed = self.registry.unregister(id);

        let mut inner = self.inner.lock();
        inner.component_listeners.remove(id);
        inner.last_alerted.remove(id);
        inner.last_states.remove(id);
        drop(inner);

        removed
    }

    /// Update a component's status through the dashboard, which validates
    /// via the tracker (unless forced) and owns the cascade.
    pub fn update_component_status(
        &self,
        id: &ComponentId,
        state: Option<ComponentState>,
        details: Option<HashMap<String, Value>>,
        force: bool,
    ) -> Result<bool> {
        self.dashboard.update_component_status(id, state, details, force)
    }

    // Dashboard listener hook: change history, adapter listeners, alert
    // dedup, and the status-change event. Runs with no dashboard lock
    // held; adapter locks are released before any callback fires.
    fn on_dashboard_update(&self, id: &ComponentId, status: &ComponentStatus) {
        let new_state = status.state;

        let (listeners, alerts, old_state) = {
            let mut inner = self.inner.lock();

            let history = inner.change_history.entry(id.clone()).or_default();
            history.push(status.clone());
            if history.len() > CHANGE_HISTORY_LIMIT {
                history.remove(0);
            }

            let old_state = inner.last_states.insert(id.clone(), new_state);

            let mut listeners: Vec<StatusListener> = inner.global_listeners.clone();
            if let Some(bound) = inner.component_listeners.get(id) {
                listeners.extend(bound.iter().cloned());
            }

            let alerts = if new_state.is_alerting() {
                if inner.last_alerted.get(id) != Some(&new_state) {
                    inner.last_alerted.insert(id.clone(), new_state);
                    inner.alert_callbacks.clone()
                } else {
                    Vec::new()
                }
            } else {
                inner.last_alerted.remove(id);
                Vec::new()
            };

            (listeners, alerts, old_state)
        };

        for listener in listeners {
            listener(id, status);
        }
        for alert in alerts {
            alert(id, new_state);
        }

        if let Some(bus) = &self.events {
            let priority = if new_state.is_alerting() {
                EventPriority::High
            } else {
                EventPriority::Normal
            };
            let mut event = Event::new(
                event_types::STATUS_CHANGE,
                EventCategory::System,
                id.clone(),
            )
            .with_priority(priority)
            .with_data_entry("new_state", new_state.to_string());
            if let Some(old_state) = old_state {
                event = event.with_data_entry("old_state", old_state.to_string());
            }
            for key in ["reason", "cascaded"] {
                if let Some(value) = status.details.get(key) {
                    event = event.with_data_entry(key, value.clone());
                }
            }
            spawn_publish(bus, event);
        }

        debug!("Adapter observed update: {} -> {}", id, new_state);
    }

    /// Listener for every component's updates.
    pub fn register_status_listener(&self, listener: StatusListener) {
        self.inner.lock().global_listeners.push(listener);
    }

    /// Listener bound to one component's updates.
    pub fn register_component_listener(&self, id: ComponentId, listener: StatusListener) {
        self.inner
            .lock()
            .component_listeners
            .entry(id)
            .or_default()
            .push(listener);
    }

    /// Alert callback with adapter-level dedup on the last alerted state.
    pub fn register_alert_callback(&self, callback: AlertCallback) {
        self.inner.lock().alert_callbacks.push(callback);
    }

    /// Watch a component on the dashboard, optionally with a listener.
    pub fn watch_component(&self, id: &ComponentId, listener: Option<StatusListener>) {
        self.dashboard.watch_component(id, listener);
    }

    pub fn get_component_status(&self, id: &ComponentId) -> ComponentStatus {
        self.tracker.get_status(id)
    }

    pub fn get_all_component_statuses(&self) -> HashMap<ComponentId, ComponentStatus> {
        self.dashboard.get_all_component_statuses()
    }

    /// Status snapshots observed for a component, oldest first.
    pub fn get_component_history(&self, id: &ComponentId) -> Vec<ComponentStatus> {
        self.inner
            .lock()
            .change_history
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.global_listeners.clear();
        inner.component_listeners.clear();
        inner.alert_callbacks.clear();
        inner.last_alerted.clear();
        inner.last_states.clear();
        inner.change_history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ComponentId {
        ComponentId::new(s)
    }

    fn adapter() -> Arc<ComponentStatusAdapter> {
        let registry = Arc::new(ComponentRegistry::new());
        let tracker = Arc::new(StatusTracker::new(100).with_registry(Arc::clone(&registry)));
        let dashboard = Arc::new(ServiceHealthDashboard::new(
            Arc::clone(&tracker),
            Arc::clone(&registry),
        ));
        ComponentStatusAdapter::new(registry, tracker, dashboard)
    }

    #[test]
    fn test_register_component_seeds_status() {
        let adapter = adapter();
        adapter
            .register_component("db", Some(ComponentState::Running), None)
            .unwrap();

        let status = adapter.get_component_status(&id("db"));
        assert_eq!(status.state, ComponentState::Running);
        // Forced seed shows up in the tracker history exactly once.
        assert_eq!(adapter.get_component_history(&id("db")).len(), 1);
    }

    #[test]
    fn test_register_component_with_metadata() {
        let adapter = adapter();
        let mut metadata = HashMap::new();
        metadata.insert("zone".to_string(), Value::String("eu-1".to_string()));
        let component = adapter
            .register_component("db", Some(ComponentState::Running), Some(metadata))
            .unwrap();
        assert_eq!(component.read().metadata["zone"], "eu-1");
    }

    #[test]
    fn test_listeners_observe_cascaded_updates() {
        let adapter = adapter();
        adapter
            .register_component("db", Some(ComponentState::Running), None)
            .unwrap();
        adapter
            .register_component("api", Some(ComponentState::Running), None)
            .unwrap();
        adapter
            .registry()
            .declare_dependency(&id("api"), &id("db"))
            .unwrap();

        let seen: Arc<Mutex<Vec<(String, ComponentState)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_inner = Arc::clone(&seen);
        adapter.register_status_listener(Arc::new(move |cid, status| {
            seen_inner.lock().push((cid.0.clone(), status.state));
        }));

        adapter
            .update_component_status(&id("db"), Some(ComponentState::Down), None, false)
            .unwrap();

        let seen = seen.lock();
        assert!(seen.contains(&("db".to_string(), ComponentState::Down)));
        assert!(seen.contains(&("api".to_string(), ComponentState::Impaired)));
        // The top-level update is observed before its cascade.
        assert_eq!(seen[0].0, "db");
    }

    #[test]
    fn test_component_listener_is_scoped() {
        let adapter = adapter();
        adapter
            .register_component("db", Some(ComponentState::Running), None)
            .unwrap();
        adapter
            .register_component("api", Some(ComponentState::Running), None)
            .unwrap();

        let hits = Arc::new(Mutex::new(0usize));
        let hits_inner = Arc::clone(&hits);
        adapter.register_component_listener(
            id("db"),
            Arc::new(move |_, _| {
                *hits_inner.lock() += 1;
            }),
        );

        adapter
            .update_component_status(&id("api"), Some(ComponentState::Degraded), None, false)
            .unwrap();
        assert_eq!(*hits.lock(), 0);

        adapter
            .update_component_status(&id("db"), Some(ComponentState::Degraded), None, false)
            .unwrap();
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_adapter_alert_dedup() {
        let adapter = adapter();
        adapter
            .register_component("db", Some(ComponentState::Running), None)
            .unwrap();

        let alerts = Arc::new(Mutex::new(Vec::new()));
        let alerts_inner = Arc::clone(&alerts);
        adapter.register_alert_callback(Arc::new(move |cid, state| {
            alerts_inner.lock().push((cid.0.clone(), state));
        }));

        adapter
            .update_component_status(&id("db"), Some(ComponentState::Degraded), None, true)
            .unwrap();
        adapter
            .update_component_status(&id("db"), Some(ComponentState::Degraded), None, true)
            .unwrap();
        assert_eq!(alerts.lock().len(), 1);
    }

    #[test]
    fn test_unregister_component_cleanup() {
        let adapter = adapter();
        adapter
            .register_component("db", Some(ComponentState::Running), None)
            .unwrap();

        assert!(adapter.unregister_component(&id("db")));
        assert!(!adapter.unregister_component(&id("db")));
        assert!(!adapter.registry().contains(&id("db")));
    }

    #[test]
    fn test_status_update_without_state_polls_provider() {
        let adapter = adapter();
        let component = adapter
            .register_component("db", Some(ComponentState::Running), None)
            .unwrap();

        // Mutate the live record; a state-less update picks it up.
        component
            .write()
            .set_state(ComponentState::Degraded, None);
        adapter
            .update_component_status(&id("db"), None, None, false)
            .unwrap();
        assert_eq!(
            adapter.get_component_status(&id("db")).state,
            ComponentState::Degraded
        );
    }
}
