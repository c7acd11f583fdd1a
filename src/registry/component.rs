// Component model shared by the registry, status tracker, and dashboard.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Unique, non-empty component identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        ComponentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(id: &str) -> Self {
        ComponentId(id.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(id: String) -> Self {
        ComponentId(id)
    }
}

/// Lifecycle and health state of a registered component.
///
/// `Healthy` and `Running` are both nominal. `Impaired` is reserved for
/// cascaded degradation so observers can tell transitive failure apart
/// from first-party failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Unknown,
    Starting,
    Healthy,
    Running,
    Degraded,
    Down,
    Failed,
    Recovering,
    Impaired,
    Stopping,
    Stopped,
}

impl ComponentState {
    pub const ALL: [ComponentState; 11] = [
        ComponentState::Unknown,
        ComponentState::Starting,
        ComponentState::Healthy,
        ComponentState::Running,
        ComponentState::Degraded,
        ComponentState::Down,
        ComponentState::Failed,
        ComponentState::Recovering,
        ComponentState::Impaired,
        ComponentState::Stopping,
        ComponentState::Stopped,
    ];

    /// True for the two nominal operating states.
    pub fn is_nominal(&self) -> bool {
        matches!(self, ComponentState::Healthy | ComponentState::Running)
    }

    /// States that trigger alert callbacks on the dashboard.
    pub fn is_alerting(&self) -> bool {
        matches!(
            self,
            ComponentState::Degraded
                | ComponentState::Down
                | ComponentState::Failed
                | ComponentState::Impaired
        )
    }

    /// Severity rank, lower is worse. Lifecycle states rank with `Unknown`
    /// since they carry no health signal.
    pub fn severity_rank(&self) -> u8 {
        match self {
            ComponentState::Failed => 0,
            ComponentState::Down => 1,
            ComponentState::Impaired => 2,
            ComponentState::Degraded => 3,
            ComponentState::Recovering => 4,
            ComponentState::Running => 5,
            ComponentState::Healthy => 6,
            ComponentState::Unknown
            | ComponentState::Starting
            | ComponentState::Stopping
            | ComponentState::Stopped => 7,
        }
    }

    /// True if `self` is strictly worse than `other` in the severity ordering.
    pub fn is_worse_than(&self, other: ComponentState) -> bool {
        self.severity_rank() < other.severity_rank()
    }

    /// The legal-transition table. Same-state updates are handled by the
    /// tracker (recorded as no-op entries) and are not part of the table.
    /// `Impaired` is a cascaded state and may be reassigned freely.
    pub fn can_transition_to(&self, to: ComponentState) -> bool {
        use ComponentState::*;
        match self {
            Unknown => matches!(to, Healthy | Running | Degraded | Down | Failed),
            Healthy => matches!(to, Degraded | Failed),
            Running => matches!(to, Degraded | Failed | Down),
            Degraded => matches!(to, Failed | Recovering),
            Down => matches!(to, Recovering),
            Failed => matches!(to, Recovering),
            Recovering => matches!(to, Healthy | Failed),
            Impaired => true,
            Starting | Stopping | Stopped => false,
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentState::Unknown => "UNKNOWN",
            ComponentState::Starting => "STARTING",
            ComponentState::Healthy => "HEALTHY",
            ComponentState::Running => "RUNNING",
            ComponentState::Degraded => "DEGRADED",
            ComponentState::Down => "DOWN",
            ComponentState::Failed => "FAILED",
            ComponentState::Recovering => "RECOVERING",
            ComponentState::Impaired => "IMPAIRED",
            ComponentState::Stopping => "STOPPING",
            ComponentState::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

/// A registered component record.
///
/// The registry owns these behind `Arc<RwLock<_>>` so status providers can
/// observe live state. `dependencies` mirrors the edges held by the
/// dependency graph for fast lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub component_type: Option<String>,
    pub state: ComponentState,
    pub metadata: HashMap<String, Value>,
    pub dependencies: Vec<ComponentId>,
}

impl Component {
    pub fn new(id: ComponentId) -> Self {
        let name = id.0.clone();
        Self {
            id,
            name,
            description: None,
            version: None,
            component_type: None,
            state: ComponentState::Unknown,
            metadata: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: ComponentState) -> Self {
        self.state = state;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_type(mut self, component_type: impl Into<String>) -> Self {
        self.component_type = Some(component_type.into());
        self
    }

    /// Update state, merging any details into the metadata bag.
    pub fn set_state(&mut self, state: ComponentState, details: Option<&HashMap<String, Value>>) {
        self.state = state;
        if let Some(details) = details {
            for (k, v) in details {
                self.metadata.insert(k.clone(), v.clone());
            }
        }
    }

    /// Record a dependency, preserving declaration order and suppressing
    /// duplicates.
    pub fn declare_dependency(&mut self, dep: ComponentId) {
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
    }
}

// Optional lifecycle capability, invoked by the registry's bulk operations.
#[async_trait::async_trait]
pub trait ComponentLifecycle: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
