// # Service Health Dashboard
//
// Queryable view over the status tracker, enriched with listener and
// alert callbacks and dependency-aware cascading. Alert callbacks fire on
// transitions into a non-nominal state and are deduplicated until the
// component leaves that state. Callback lists are copied under the lock
// and invoked after release, in registration order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::registry::{ComponentId, ComponentRegistry, ComponentState};

use super::status::{ComponentStatus, StatusRecord, StatusTracker};

/// Handle for removing a registered listener or alert callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub type StatusListener = Arc<dyn Fn(&ComponentId, &ComponentStatus) + Send + Sync>;
pub type AlertCallback = Arc<dyn Fn(&ComponentId, ComponentState) + Send + Sync>;

// Map a source state to the state cascaded onto dependents. Nominal
// states do not cascade.
fn cascade_state_for(state: ComponentState) -> Option<ComponentState> {
    match state {
        ComponentState::Down | ComponentState::Failed => Some(ComponentState::Impaired),
        ComponentState::Impaired => Some(ComponentState::Impaired),
        ComponentState::Degraded => Some(ComponentState::Degraded),
        _ => None,
    }
}

struct DashboardInner {
    watchers: HashSet<ComponentId>,
    watch_history: HashMap<ComponentId, Vec<StatusRecord>>,
    listeners: Vec<(CallbackId, Option<ComponentId>, StatusListener)>,
    alert_callbacks: Vec<(CallbackId, AlertCallback)>,
    last_alerted: HashMap<ComponentId, ComponentState>,
    last_notified: HashMap<ComponentId, ComponentState>,
    next_callback_id: u64,
}

pub struct ServiceHealthDashboard {
    tracker: Arc<StatusTracker>,
    registry: Arc<ComponentRegistry>,
    inner: Mutex<DashboardInner>,
}

impl ServiceHealthDashboard {
    pub fn new(tracker: Arc<StatusTracker>, registry: Arc<ComponentRegistry>) -> Self {
        Self {
            tracker,
            registry,
            inner: Mutex::new(DashboardInner {
                watchers: HashSet::new(),
                watch_history: HashMap::new(),
                listeners: Vec::new(),
                alert_callbacks: Vec::new(),
                last_alerted: HashMap::new(),
                last_notified: HashMap::new(),
                next_callback_id: 0,
            }),
        }
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub fn supports_cascading_status(&self) -> bool {
        true
    }

    /// Add a component to the watch set, recording its current state into
    /// the watch history. An optional listener is invoked on every update
    /// of this component.
    pub fn watch_component(&self, id: &ComponentId, listener: Option<StatusListener>) {
        let status = self.lookup_status(id);

        let mut inner = self.inner.lock();
        inner.watchers.insert(id.clone());
        inner
            .watch_history
            .entry(id.clone())
            .or_default()
            .push(StatusRecord {
                component_id: id.clone(),
                state: status.state,
                timestamp: status.timestamp,
                metrics: status.details.clone(),
                message: None,
            });
        if let Some(listener) = listener {
            let cb_id = CallbackId(inner.next_callback_id);
            inner.next_callback_id += 1;
            inner.listeners.push((cb_id, Some(id.clone()), listener));
        }
        drop(inner);

        debug!("Watching component: {}", id);
    }

    // Tracker first, live registry record second.
    fn lookup_status(&self, id: &ComponentId) -> ComponentStatus {
        let status = self.tracker.get_status(id);
        if status.state != ComponentState::Unknown {
            return status;
        }
        if let Some(component) = self.registry.get_component(id) {
            let component = component.read();
            return ComponentStatus::new(id.clone(), component.state, component.metadata.clone());
        }
        status
    }

    pub fn status_for(&self, id: &ComponentId) -> ComponentState {
        self.lookup_status(id).state
    }

    /// Poll the tracker for every provider-backed component, firing watch
    /// listeners for watched components whose state changed since the
    /// last notification.
    pub fn get_all_component_statuses(&self) -> HashMap<ComponentId, ComponentStatus> {
        let statuses = self.tracker.update_all();

        let mut to_notify = Vec::new();
        {
            let mut inner = self.inner.lock();
            for (id, status) in &statuses {
                if !inner.watchers.contains(id) {
                    continue;
                }
                if inner.last_notified.get(id) != Some(&status.state) {
                    inner.last_notified.insert(id.clone(), status.state);
                    let listeners = Self::listeners_for(&inner, id);
                    to_notify.push((id.clone(), status.clone(), listeners));
                }
            }
        }

        for (id, status, listeners) in to_notify {
            for listener in listeners {
                listener(&id, &status);
            }
        }

        statuses
    }

    pub fn get_dependency_graph(&self) -> Vec<(ComponentId, Vec<ComponentId>)> {
        self.registry.dependency_graph()
    }

    /// Tracker-backed history; falls back to the watch history for
    /// components the tracker has never recorded.
    pub fn get_status_history(
        &self,
        id: &ComponentId,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<StatusRecord> {
        let history = self.tracker.get_history(id, range);
        if !history.is_empty() {
            return history;
        }

        let inner = self.inner.lock();
        let records = inner.watch_history.get(id).cloned().unwrap_or_default();
        match range {
            Some((start, end)) => records
                .into_iter()
                .filter(|r| r.timestamp >= start && r.timestamp <= end)
                .collect(),
            None => records,
        }
    }

    pub fn get_all_history(&self) -> HashMap<ComponentId, Vec<StatusRecord>> {
        self.inner.lock().watch_history.clone()
    }

    /// Fires on a transition into a non-nominal state, deduplicated:
    /// repeated updates with the same alert state do not re-fire until
    /// the component transitions out and back in.
    pub fn register_alert_callback(&self, callback: AlertCallback) -> CallbackId {
        let mut inner = self.inner.lock();
        let id = CallbackId(inner.next_callback_id);
        inner.next_callback_id += 1;
        inner.alert_callbacks.push((id, callback));
        id
    }

    /// Fires on every status update, with the recorded `ComponentStatus`.
    pub fn register_status_listener(&self, listener: StatusListener) -> CallbackId {
        let mut inner = self.inner.lock();
        let id = CallbackId(inner.next_callback_id);
        inner.next_callback_id += 1;
        inner.listeners.push((id, None, listener));
        id
    }

    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len() + inner.alert_callbacks.len();
        inner.listeners.retain(|(cb_id, _, _)| *cb_id != id);
        inner.alert_callbacks.retain(|(cb_id, _)| *cb_id != id);
        before != inner.listeners.len() + inner.alert_callbacks.len()
    }

    /// Update a component's status and cascade impairment to dependents.
    ///
    /// The top-level update is validated by the tracker (unless forced)
    /// and recorded before any cascade. Cascaded writes are forced, carry
    /// `cascaded`/`reason` details, never downgrade a dependent already
    /// in a worse state, and visit each node at most once per top-level
    /// update even across dependency cycles.
    pub fn update_component_status(
        &self,
        id: &ComponentId,
        state: Option<ComponentState>,
        details: Option<HashMap<String, Value>>,
        force: bool,
    ) -> Result<bool> {
        self.record_and_notify(id, state, details, force)?;
        let origin_state = self.tracker.get_status(id).state;
        self.cascade_from(id, origin_state);
        Ok(true)
    }

    // Tracker write + watch history + listener/alert fan-out for one
    // component. Callbacks run after every lock is released.
    fn record_and_notify(
        &self,
        id: &ComponentId,
        state: Option<ComponentState>,
        details: Option<HashMap<String, Value>>,
        force: bool,
    ) -> Result<bool> {
        self.tracker.update_status(id, state, details, force)?;
        let status = self.tracker.get_status(id);
        let new_state = status.state;

        let (listeners, alerts) = {
            let mut inner = self.inner.lock();

            if inner.watchers.contains(id) {
                inner
                    .watch_history
                    .entry(id.clone())
                    .or_default()
                    .push(StatusRecord {
                        component_id: id.clone(),
                        state: new_state,
                        timestamp: status.timestamp,
                        metrics: status.details.clone(),
                        message: None,
                    });
                inner.last_notified.insert(id.clone(), new_state);
            }

            let listeners = Self::listeners_for(&inner, id);

            let alerts = if new_state.is_alerting() {
                if inner.last_alerted.get(id) != Some(&new_state) {
                    inner.last_alerted.insert(id.clone(), new_state);
                    inner
                        .alert_callbacks
                        .iter()
                        .map(|(_, cb)| Arc::clone(cb))
                        .collect()
                } else {
                    Vec::new()
                }
            } else {
                inner.last_alerted.remove(id);
                Vec::new()
            };

            (listeners, alerts)
        };

        for listener in listeners {
            listener(id, &status);
        }
        for alert in alerts {
            alert(id, new_state);
        }

        Ok(true)
    }

    // Listeners registered for all components plus those bound to `id`,
    // in registration order.
    fn listeners_for(inner: &DashboardInner, id: &ComponentId) -> Vec<StatusListener> {
        inner
            .listeners
            .iter()
            .filter(|(_, target, _)| target.as_ref().is_none_or(|t| t == id))
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect()
    }

    // Breadth-first cascade from `origin`. Each queue entry carries the
    // immediate dependency that triggered it and the state to propagate.
    fn cascade_from(&self, origin: &ComponentId, origin_state: ComponentState) {
        let Some(initial_cascade) = cascade_state_for(origin_state) else {
            return;
        };

        let mut visited: HashSet<ComponentId> = HashSet::new();
        visited.insert(origin.clone());

        let mut queue: VecDeque<(ComponentId, ComponentId, ComponentState, ComponentState)> =
            self.registry
                .get_dependents(origin)
                .into_iter()
                .map(|dep| (dep, origin.clone(), origin_state, initial_cascade))
                .collect();

        while let Some((dep, via, via_state, cascade_state)) = queue.pop_front() {
            if !visited.insert(dep.clone()) {
                continue;
            }

            // Never "heal" a dependent already in a worse state.
            let current = self.tracker.get_status(&dep).state;
            if !cascade_state.is_worse_than(current) {
                continue;
            }

            let mut details = HashMap::new();
            details.insert("cascaded".to_string(), Value::String(origin.0.clone()));
            details.insert(
                "reason".to_string(),
                Value::String(format!("Depends on {} which is {}", via, via_state)),
            );

            info!(
                "Cascading {} -> {} ({} is {})",
                cascade_state, dep, via, via_state
            );
            // Cascaded writes bypass the transition table.
            if self
                .record_and_notify(&dep, Some(cascade_state), Some(details), true)
                .is_ok()
            {
                if let Some(next_cascade) = cascade_state_for(cascade_state) {
                    for next in self.registry.get_dependents(&dep) {
                        queue.push_back((next, dep.clone(), cascade_state, next_cascade));
                    }
                }
            }
        }
    }

    pub fn reset_for_test(&self) {
        let mut inner = self.inner.lock();
        inner.watchers.clear();
        inner.watch_history.clear();
        inner.listeners.clear();
        inner.alert_callbacks.clear();
        inner.last_alerted.clear();
        inner.last_notified.clear();
    }
}
