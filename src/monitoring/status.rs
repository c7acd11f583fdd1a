// # Status Tracker
//
// Authoritative current status per component plus a bounded, append-only
// history ring. All transitions are validated against the legal-transition
// table unless the caller forces the write (seeding and cascaded updates);
// forced entries are flagged in the record metrics.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{FabricError, Result};
use crate::registry::{Component, ComponentId, ComponentRegistry, ComponentState};

/// Metadata key set on records written with `force = true`.
pub const FORCED_KEY: &str = "forced";

/// Immutable status snapshot appended to a component's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub component_id: ComponentId,
    pub state: ComponentState,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metrics: HashMap<String, Value>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Current status of a component as held by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub component_id: ComponentId,
    pub state: ComponentState,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: HashMap<String, Value>,
}

impl ComponentStatus {
    pub fn new(
        component_id: ComponentId,
        state: ComponentState,
        details: HashMap<String, Value>,
    ) -> Self {
        Self {
            component_id,
            state,
            timestamp: Utc::now(),
            details,
        }
    }

    /// Sentinel for components the tracker has never seen.
    pub fn unknown(component_id: ComponentId) -> Self {
        Self::new(component_id, ComponentState::Unknown, HashMap::new())
    }
}

/// A provider produces the current status of one component on demand.
pub trait StatusProvider: Send + Sync {
    fn component_state(&self) -> ComponentState;

    fn status_details(&self) -> HashMap<String, Value> {
        HashMap::new()
    }
}

/// Provider bound to a live registry component record.
pub struct ComponentStatusProvider {
    component: Arc<RwLock<Component>>,
}

impl ComponentStatusProvider {
    pub fn new(component: Arc<RwLock<Component>>) -> Self {
        Self { component }
    }
}

impl StatusProvider for ComponentStatusProvider {
    fn component_state(&self) -> ComponentState {
        self.component.read().state
    }

    fn status_details(&self) -> HashMap<String, Value> {
        self.component.read().metadata.clone()
    }
}

struct TrackerInner {
    current: HashMap<ComponentId, ComponentStatus>,
    history: HashMap<ComponentId, VecDeque<StatusRecord>>,
    providers: HashMap<ComponentId, Arc<dyn StatusProvider>>,
}

pub struct StatusTracker {
    inner: Mutex<TrackerInner>,
    history_limit: usize,
    registry: Option<Arc<ComponentRegistry>>,
}

impl StatusTracker {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                current: HashMap::new(),
                history: HashMap::new(),
                providers: HashMap::new(),
            }),
            history_limit: history_limit.max(1),
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<ComponentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn register_provider(&self, id: ComponentId, provider: Arc<dyn StatusProvider>) {
        self.inner.lock().providers.insert(id, provider);
    }

    pub fn unregister_provider(&self, id: &ComponentId) {
        // History and current status stay behind for reference.
        self.inner.lock().providers.remove(id);
    }

    /// Update a component's status.
    ///
    /// With `state = None` the tracker consults the registered provider,
    /// falling back to the live component record in the registry, then to
    /// `Unknown`. Transitions are validated against the table unless
    /// `force` is set; same-state updates are recorded as no-op entries.
    pub fn update_status(
        &self,
        id: &ComponentId,
        state: Option<ComponentState>,
        details: Option<HashMap<String, Value>>,
        force: bool,
    ) -> Result<bool> {
        let (new_state, provider_details) = self.resolve_state(id, state);
        let mut details = details.unwrap_or(provider_details);

        if force {
            details.insert(FORCED_KEY.to_string(), Value::Bool(true));
        }
        let message = details
            .get("message")
            .or_else(|| details.get("reason"))
            .and_then(Value::as_str)
            .map(String::from);

        // Validation and insertion share one critical section so updates
        // for a component are linearized by the tracker lock.
        let mut inner = self.inner.lock();
        if let Some(from) = inner.current.get(id).map(|s| s.state) {
            if !force && from != new_state && !from.can_transition_to(new_state) {
                return Err(FabricError::IllegalTransition {
                    from,
                    to: new_state,
                });
            }
        }

        let status = ComponentStatus::new(id.clone(), new_state, details.clone());
        let record = StatusRecord {
            component_id: id.clone(),
            state: new_state,
            timestamp: status.timestamp,
            metrics: details,
            message,
        };

        inner.current.insert(id.clone(), status);
        let history = inner.history.entry(id.clone()).or_default();
        history.push_back(record);
        while history.len() > self.history_limit {
            history.pop_front();
        }
        drop(inner);

        debug!("Status update: {} -> {}", id, new_state);
        Ok(true)
    }

    // Resolve the effective state for an update with no explicit state.
    // Provider polls run outside the tracker lock.
    fn resolve_state(
        &self,
        id: &ComponentId,
        state: Option<ComponentState>,
    ) -> (ComponentState, HashMap<String, Value>) {
        if let Some(state) = state {
            return (state, HashMap::new());
        }

        let provider = self.inner.lock().providers.get(id).cloned();
        if let Some(provider) = provider {
            return (provider.component_state(), provider.status_details());
        }

        if let Some(registry) = &self.registry {
            if let Some(component) = registry.get_component(id) {
                let component = component.read();
                return (component.state, component.metadata.clone());
            }
        }

        (ComponentState::Unknown, HashMap::new())
    }

    /// Poll every registered provider and record its current status.
    /// Illegal provider transitions are recorded with the forced flag
    /// rather than rejected; the provider is the source of truth.
    pub fn update_all(&self) -> HashMap<ComponentId, ComponentStatus> {
        let ids: Vec<ComponentId> = self.inner.lock().providers.keys().cloned().collect();
        for id in &ids {
            if let Err(FabricError::IllegalTransition { from, to }) =
                self.update_status(id, None, None, false)
            {
                warn!(
                    "Provider for {} reported illegal transition {} -> {}; forcing",
                    id, from, to
                );
                let _ = self.update_status(id, None, None, true);
            }
        }
        self.get_all_statuses()
    }

    /// Current status, or the UNKNOWN sentinel when the component has
    /// never been updated.
    pub fn get_status(&self, id: &ComponentId) -> ComponentStatus {
        self.inner
            .lock()
            .current
            .get(id)
            .cloned()
            .unwrap_or_else(|| ComponentStatus::unknown(id.clone()))
    }

    pub fn get_all_statuses(&self) -> HashMap<ComponentId, ComponentStatus> {
        self.inner.lock().current.clone()
    }

    /// History oldest-first, optionally bounded to a time range.
    pub fn get_history(
        &self,
        id: &ComponentId,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<StatusRecord> {
        let inner = self.inner.lock();
        let Some(history) = inner.history.get(id) else {
            return Vec::new();
        };
        match range {
            Some((start, end)) => history
                .iter()
                .filter(|r| r.timestamp >= start && r.timestamp <= end)
                .cloned()
                .collect(),
            None => history.iter().cloned().collect(),
        }
    }

    /// Per-state counts plus totals, for dashboards and diagnostics.
    pub fn summary(&self) -> Value {
        let inner = self.inner.lock();
        let mut state_counts: HashMap<String, usize> = ComponentState::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        let mut components = serde_json::Map::new();

        for (id, status) in &inner.current {
            *state_counts.entry(status.state.to_string()).or_insert(0) += 1;
            components.insert(
                id.0.clone(),
                json!({
                    "state": status.state.to_string(),
                    "last_change": status.timestamp.to_rfc3339(),
                    "details": status.details,
                }),
            );
        }

        json!({
            "components": components,
            "state_counts": state_counts,
            "total_components": inner.current.len(),
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.current.clear();
        inner.history.clear();
        inner.providers.clear();
    }
}
