// Cross-component transaction model. A transaction is a logical unit of
// work flowing through several components; its stage machine is
// `CREATED -> STARTED -> PROCESSING -> {COMPLETED | FAILED | CANCELED}`
// and the terminal stages are absorbing.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ComponentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStage {
    Created,
    Started,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl TransactionStage {
    pub const ALL: [TransactionStage; 6] = [
        TransactionStage::Created,
        TransactionStage::Started,
        TransactionStage::Processing,
        TransactionStage::Completed,
        TransactionStage::Failed,
        TransactionStage::Canceled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStage::Completed | TransactionStage::Failed | TransactionStage::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStage::Created => "CREATED",
            TransactionStage::Started => "STARTED",
            TransactionStage::Processing => "PROCESSING",
            TransactionStage::Completed => "COMPLETED",
            TransactionStage::Failed => "FAILED",
            TransactionStage::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in a transaction's stage history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: TransactionStage,
    pub timestamp: DateTime<Utc>,
    pub component_id: Option<ComponentId>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionErrorEntry {
    pub component_id: ComponentId,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub stage: TransactionStage,
    pub metadata: HashMap<String, Value>,
    pub tags: BTreeSet<String>,
    pub components: Vec<ComponentId>,
    pub stages: Vec<StageEntry>,
    pub errors: Vec<TransactionErrorEntry>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(id: impl Into<String>, parent_id: Option<String>, name: impl Into<String>) -> Self {
        let mut tx = Self {
            id: id.into(),
            parent_id,
            name: name.into(),
            stage: TransactionStage::Created,
            metadata: HashMap::new(),
            tags: BTreeSet::new(),
            components: Vec::new(),
            stages: Vec::new(),
            errors: Vec::new(),
            start_time: None,
            end_time: None,
        };
        tx.push_stage(TransactionStage::Created, None, None);
        tx
    }

    pub fn is_active(&self) -> bool {
        !self.stage.is_terminal()
    }

    pub fn start(&mut self, component_id: Option<&ComponentId>) -> &mut Self {
        if self.stage.is_terminal() {
            return self;
        }
        self.start_time = Some(Utc::now());
        self.stage = TransactionStage::Started;
        self.push_stage(TransactionStage::Started, component_id, None);
        self
    }

    pub fn process(&mut self, component_id: &ComponentId, action: &str) -> &mut Self {
        if self.stage.is_terminal() {
            return self;
        }
        self.stage = TransactionStage::Processing;
        let metadata = if action.is_empty() {
            None
        } else {
            let mut m = HashMap::new();
            m.insert("action".to_string(), Value::String(action.to_string()));
            Some(m)
        };
        self.push_stage(TransactionStage::Processing, Some(component_id), metadata);
        self
    }

    pub fn complete(&mut self, component_id: Option<&ComponentId>) -> &mut Self {
        if self.stage.is_terminal() {
            return self;
        }
        self.end_time = Some(Utc::now());
        self.stage = TransactionStage::Completed;
        self.push_stage(TransactionStage::Completed, component_id, None);
        self
    }

    pub fn fail(
        &mut self,
        component_id: &ComponentId,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> &mut Self {
        if self.stage.is_terminal() {
            return self;
        }
        let error_type = error_type.into();
        let message = message.into();

        self.end_time = Some(Utc::now());
        self.stage = TransactionStage::Failed;
        self.errors.push(TransactionErrorEntry {
            component_id: component_id.clone(),
            error_type: error_type.clone(),
            message: message.clone(),
            timestamp: Utc::now(),
        });

        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), Value::String(message));
        metadata.insert("error_type".to_string(), Value::String(error_type));
        self.push_stage(TransactionStage::Failed, Some(component_id), Some(metadata));
        self
    }

    pub fn cancel(&mut self, component_id: Option<&ComponentId>, reason: &str) -> &mut Self {
        if self.stage.is_terminal() {
            return self;
        }
        self.end_time = Some(Utc::now());
        self.stage = TransactionStage::Canceled;
        let metadata = if reason.is_empty() {
            None
        } else {
            let mut m = HashMap::new();
            m.insert("reason".to_string(), Value::String(reason.to_string()));
            Some(m)
        };
        self.push_stage(TransactionStage::Canceled, component_id, metadata);
        self
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Elapsed time: start to end, or start to now while active.
    pub fn duration(&self) -> Option<Duration> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(Utc::now);
        Some(end - start)
    }

    fn push_stage(
        &mut self,
        stage: TransactionStage,
        component_id: Option<&ComponentId>,
        metadata: Option<HashMap<String, Value>>,
    ) {
        if let Some(component_id) = component_id {
            if !self.components.contains(component_id) {
                self.components.push(component_id.clone());
            }
        }
        self.stages.push(StageEntry {
            stage,
            timestamp: Utc::now(),
            component_id: component_id.cloned(),
            metadata,
        });
    }
}
