// # Integration Health
//
// Periodic health metric collection from registered providers, threshold
// evaluation, and a worst-of rollup per component and for the whole
// system. The poller is a tokio task cancelled through a watch channel;
// stopping takes effect within one polling interval.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{FabricError, Result};
use crate::registry::ComponentId;

/// Health status levels for components and the overall system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failing,
    Critical,
    Unknown,
}

impl HealthStatus {
    // Rollup priority: higher is worse; UNKNOWN is worst because it means
    // the component cannot be assessed at all.
    fn priority(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Failing => 2,
            HealthStatus::Critical => 3,
            HealthStatus::Unknown => 4,
        }
    }

    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.priority() > self.priority() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Failing => "FAILING",
            HealthStatus::Critical => "CRITICAL",
            HealthStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthMetricType {
    ResponseTime,
    ErrorRate,
    Throughput,
    ResourceUsage,
    Availability,
    Custom,
}

/// A single health metric measurement with optional alerting thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetric {
    pub name: String,
    pub value: f64,
    pub metric_type: HealthMetricType,
    pub component_id: ComponentId,
    pub timestamp: DateTime<Utc>,
    pub threshold_warning: Option<f64>,
    pub threshold_critical: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl HealthMetric {
    pub fn new(
        name: impl Into<String>,
        value: f64,
        metric_type: HealthMetricType,
        component_id: impl Into<ComponentId>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            metric_type,
            component_id: component_id.into(),
            timestamp: Utc::now(),
            threshold_warning: None,
            threshold_critical: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_thresholds(mut self, warning: f64, critical: f64) -> Self {
        self.threshold_warning = Some(warning);
        self.threshold_critical = Some(critical);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Threshold evaluation: critical at or above the critical threshold,
    /// degraded at or above the warning threshold, healthy otherwise.
    pub fn derived_status(&self) -> HealthStatus {
        if let Some(critical) = self.threshold_critical {
            if self.value >= critical {
                return HealthStatus::Critical;
            }
        }
        if let Some(warning) = self.threshold_warning {
            if self.value >= warning {
                return HealthStatus::Degraded;
            }
        }
        HealthStatus::Healthy
    }
}

/// Components expose health through this capability. A provider failure
/// never aborts a collection sweep; it is recorded as an error metric.
#[async_trait::async_trait]
pub trait HealthProvider: Send + Sync {
    async fn health_metrics(&self) -> Result<Vec<HealthMetric>>;

    async fn health_status(&self) -> HealthStatus {
        match self.health_metrics().await {
            Ok(metrics) => metrics
                .iter()
                .map(HealthMetric::derived_status)
                .fold(HealthStatus::Healthy, HealthStatus::worst),
            Err(_) => HealthStatus::Unknown,
        }
    }
}

/// Measures elapsed time for an operation as a RESPONSE_TIME metric.
pub struct MetricTimer {
    name: String,
    component_id: ComponentId,
    start: Instant,
}

impl MetricTimer {
    pub fn stop(self, warning: Option<f64>, critical: Option<f64>) -> HealthMetric {
        let elapsed = self.start.elapsed().as_secs_f64();
        let mut metric = HealthMetric::new(
            self.name,
            elapsed,
            HealthMetricType::ResponseTime,
            self.component_id,
        );
        metric.threshold_warning = warning;
        metric.threshold_critical = critical;
        metric
    }
}

struct HealthInner {
    providers: HashMap<ComponentId, Arc<dyn HealthProvider>>,
    metrics_history: HashMap<ComponentId, VecDeque<HealthMetric>>,
    latest: HashMap<ComponentId, HashMap<String, HealthMetric>>,
    status_cache: HashMap<ComponentId, HealthStatus>,
}

pub struct IntegrationHealth {
    inner: Mutex<HealthInner>,
    history_limit: usize,
    polling_interval: Duration,
    poller: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl IntegrationHealth {
    pub fn new(polling_interval: Duration, history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(HealthInner {
                providers: HashMap::new(),
                metrics_history: HashMap::new(),
                latest: HashMap::new(),
                status_cache: HashMap::new(),
            }),
            history_limit: history_limit.max(1),
            polling_interval,
            poller: Mutex::new(None),
        }
    }

    pub fn register_provider(&self, id: ComponentId, provider: Arc<dyn HealthProvider>) {
        let mut inner = self.inner.lock();
        inner.metrics_history.entry(id.clone()).or_default();
        inner.latest.entry(id.clone()).or_default();
        inner.status_cache.insert(id.clone(), HealthStatus::Unknown);
        inner.providers.insert(id, provider);
    }

    pub fn unregister_provider(&self, id: &ComponentId) {
        // History and cached status stay behind for reference.
        self.inner.lock().providers.remove(id);
    }

    /// Collect metrics from one provider or from all of them. Provider
    /// failures become `health_collection_error` metrics so one broken
    /// component cannot hide the rest of the sweep.
    pub async fn collect_metrics(
        &self,
        component_id: Option<&ComponentId>,
    ) -> Result<HashMap<ComponentId, Vec<HealthMetric>>> {
        let targets: Vec<(ComponentId, Arc<dyn HealthProvider>)> = {
            let inner = self.inner.lock();
            match component_id {
                Some(id) => {
                    let provider = inner
                        .providers
                        .get(id)
                        .cloned()
                        .ok_or_else(|| FabricError::Health(format!("Unknown component: {}", id)))?;
                    vec![(id.clone(), provider)]
                }
                None => inner
                    .providers
                    .iter()
                    .map(|(id, p)| (id.clone(), Arc::clone(p)))
                    .collect(),
            }
        };

        let mut results = HashMap::new();
        for (id, provider) in targets {
            let metrics = match provider.health_metrics().await {
                Ok(metrics) => metrics,
                Err(e) => {
                    error!("Health collection failed for {}: {}", id, e);
                    vec![HealthMetric::new(
                        "health_collection_error",
                        1.0,
                        HealthMetricType::ErrorRate,
                        id.clone(),
                    )
                    .with_thresholds(0.5, 0.5)
                    .with_metadata("error", e.to_string())]
                }
            };
            self.record_metrics(&id, &metrics);
            results.insert(id, metrics);
        }
        Ok(results)
    }

    // Store metrics, refresh latest-by-name, and detect status changes.
    fn record_metrics(&self, id: &ComponentId, metrics: &[HealthMetric]) {
        let mut inner = self.inner.lock();

        let history = inner.metrics_history.entry(id.clone()).or_default();
        for metric in metrics {
            history.push_back(metric.clone());
        }
        while history.len() > self.history_limit {
            history.pop_front();
        }

        let latest = inner.latest.entry(id.clone()).or_default();
        for metric in metrics {
            latest.insert(metric.name.clone(), metric.clone());
        }

        let new_status = latest
            .values()
            .map(HealthMetric::derived_status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);
        let old_status = inner
            .status_cache
            .insert(id.clone(), new_status)
            .unwrap_or(HealthStatus::Unknown);
        drop(inner);

        if old_status != new_status {
            if new_status.priority() > old_status.priority() {
                warn!("Health status for {}: {} -> {}", id, old_status, new_status);
            } else {
                info!("Health status for {}: {} -> {}", id, old_status, new_status);
            }
        }
    }

    pub fn component_status(&self, id: &ComponentId) -> HealthStatus {
        self.inner
            .lock()
            .status_cache
            .get(id)
            .copied()
            .unwrap_or(HealthStatus::Unknown)
    }

    /// The system is as healthy as its least healthy component.
    pub fn overall_status(&self) -> HealthStatus {
        let inner = self.inner.lock();
        if inner.status_cache.is_empty() {
            return HealthStatus::Unknown;
        }
        inner
            .status_cache
            .values()
            .copied()
            .fold(HealthStatus::Healthy, HealthStatus::worst)
    }

    pub fn latest_metrics(&self, id: &ComponentId) -> HashMap<String, HealthMetric> {
        self.inner.lock().latest.get(id).cloned().unwrap_or_default()
    }

    /// Snapshot for health dashboards: overall status, per-component
    /// status, and the latest value + derived status per metric.
    pub fn visualization_data(&self) -> Value {
        let inner = self.inner.lock();

        let overall = if inner.status_cache.is_empty() {
            HealthStatus::Unknown
        } else {
            inner
                .status_cache
                .values()
                .copied()
                .fold(HealthStatus::Healthy, HealthStatus::worst)
        };

        let component_status: serde_json::Map<String, Value> = inner
            .status_cache
            .iter()
            .map(|(id, status)| (id.0.clone(), Value::String(status.as_str().to_string())))
            .collect();

        let mut metrics_summary = serde_json::Map::new();
        for (id, latest) in &inner.latest {
            let per_metric: serde_json::Map<String, Value> = latest
                .iter()
                .map(|(name, metric)| {
                    (
                        name.clone(),
                        json!({
                            "value": metric.value,
                            "status": metric.derived_status().as_str(),
                            "timestamp": metric.timestamp.to_rfc3339(),
                        }),
                    )
                })
                .collect();
            metrics_summary.insert(id.0.clone(), Value::Object(per_metric));
        }

        json!({
            "overall_status": overall.as_str(),
            "component_status": component_status,
            "metrics_summary": metrics_summary,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    /// Start the background poller. A second call while polling is a
    /// no-op.
    pub fn start_polling(self: &Arc<Self>) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let health = Arc::clone(self);
        let interval = self.polling_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the first
            // sweep happens one interval after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = health.collect_metrics(None).await {
                            error!("Health polling sweep failed: {}", e);
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        *poller = Some((handle, stop_tx));
        info!("Health polling started ({:?} interval)", interval);
    }

    /// Cancel the poller; takes effect within one interval.
    pub fn stop_polling(&self) {
        if let Some((handle, stop_tx)) = self.poller.lock().take() {
            let _ = stop_tx.send(true);
            drop(handle);
            info!("Health polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.lock().is_some()
    }

    pub fn start_timer(&self, name: impl Into<String>, id: ComponentId) -> MetricTimer {
        MetricTimer {
            name: name.into(),
            component_id: id,
            start: Instant::now(),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.providers.clear();
        inner.metrics_history.clear();
        inner.latest.clear();
        inner.status_cache.clear();
    }
}
