// # Transaction Logger
//
// In-memory record of recent transactions with indices by parent,
// component, tag, and stage. Terminal transactions are optionally
// persisted as JSON lines; when the store exceeds its limit, terminal
// transactions are pruned oldest-first by end time, then (only if still
// over) active transactions oldest-first by start time.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::registry::ComponentId;

use super::transaction::{Transaction, TransactionStage};

struct LoggerInner {
    transactions: HashMap<String, Transaction>,
    by_parent: HashMap<String, Vec<String>>,
    by_component: HashMap<ComponentId, Vec<String>>,
    by_tag: HashMap<String, Vec<String>>,
    next_id: u64,
}

pub struct TransactionLogger {
    inner: Mutex<LoggerInner>,
    max_transactions: usize,
    persist_path: Option<PathBuf>,
}

impl TransactionLogger {
    pub fn new(max_transactions: usize) -> Self {
        Self {
            inner: Mutex::new(LoggerInner {
                transactions: HashMap::new(),
                by_parent: HashMap::new(),
                by_component: HashMap::new(),
                by_tag: HashMap::new(),
                next_id: 0,
            }),
            max_transactions: max_transactions.max(1),
            persist_path: None,
        }
    }

    /// Persist terminal transactions to a JSONL file at `path`.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    /// Create a transaction. Ids are `tx-<unix-seconds>-<counter>`.
    pub fn create(
        &self,
        name: Option<&str>,
        parent_id: Option<&str>,
        metadata: Option<HashMap<String, Value>>,
        tags: &[&str],
    ) -> Transaction {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let seq = inner.next_id;
        let id = format!("tx-{}-{}", Utc::now().timestamp(), seq);
        let name = name
            .map(String::from)
            .unwrap_or_else(|| format!("Transaction-{}", seq));

        let mut transaction = Transaction::new(id, parent_id.map(String::from), name);
        if let Some(metadata) = metadata {
            transaction.metadata = metadata;
        }
        for tag in tags {
            transaction.add_tag(*tag);
        }

        Self::store(&mut inner, &transaction);
        drop(inner);

        debug!("Created transaction {}", transaction.id);
        transaction
    }

    /// Store the latest snapshot of a transaction, re-indexing it. On a
    /// terminal stage the snapshot is persisted (when configured) and the
    /// store is pruned if over its limit.
    pub fn update(&self, transaction: &Transaction) {
        let over_limit = {
            let mut inner = self.inner.lock();
            Self::store(&mut inner, transaction);
            inner.transactions.len() > self.max_transactions
        };

        debug!(
            "Transaction {} ({}) is now {}",
            transaction.name, transaction.id, transaction.stage
        );

        if transaction.stage.is_terminal() {
            self.persist(transaction);
        }
        if over_limit {
            self.prune();
        }
    }

    fn store(inner: &mut LoggerInner, transaction: &Transaction) {
        let id = transaction.id.clone();

        if let Some(parent) = &transaction.parent_id {
            let index = inner.by_parent.entry(parent.clone()).or_default();
            if !index.contains(&id) {
                index.push(id.clone());
            }
        }
        for component in &transaction.components {
            let index = inner.by_component.entry(component.clone()).or_default();
            if !index.contains(&id) {
                index.push(id.clone());
            }
        }
        for tag in &transaction.tags {
            let index = inner.by_tag.entry(tag.clone()).or_default();
            if !index.contains(&id) {
                index.push(id.clone());
            }
        }

        inner.transactions.insert(id, transaction.clone());
    }

    fn remove(inner: &mut LoggerInner, id: &str) {
        let Some(transaction) = inner.transactions.remove(id) else {
            return;
        };

        if let Some(parent) = &transaction.parent_id {
            if let Some(index) = inner.by_parent.get_mut(parent) {
                index.retain(|tx_id| tx_id != id);
                if index.is_empty() {
                    inner.by_parent.remove(parent);
                }
            }
        }
        for component in &transaction.components {
            if let Some(index) = inner.by_component.get_mut(component) {
                index.retain(|tx_id| tx_id != id);
                if index.is_empty() {
                    inner.by_component.remove(component);
                }
            }
        }
        for tag in &transaction.tags {
            if let Some(index) = inner.by_tag.get_mut(tag) {
                index.retain(|tx_id| tx_id != id);
                if index.is_empty() {
                    inner.by_tag.remove(tag);
                }
            }
        }
    }

    // Append one JSON line per terminal transaction. IO happens with no
    // lock held; failures are logged and never surface to the caller.
    fn persist(&self, transaction: &Transaction) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let line = match serde_json::to_string(transaction) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize transaction {}: {}", transaction.id, e);
                return;
            }
        };
        let outcome = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = outcome {
            error!("Failed to persist transaction {}: {}", transaction.id, e);
        }
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        self.inner.lock().transactions.get(id).cloned()
    }

    pub fn by_parent(&self, parent_id: &str) -> Vec<Transaction> {
        let inner = self.inner.lock();
        inner
            .by_parent
            .get(parent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.transactions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn by_component(&self, component_id: &ComponentId) -> Vec<Transaction> {
        let inner = self.inner.lock();
        inner
            .by_component
            .get(component_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.transactions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<Transaction> {
        let inner = self.inner.lock();
        inner
            .by_tag
            .get(tag)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.transactions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn by_stage(&self, stage: TransactionStage) -> Vec<Transaction> {
        let inner = self.inner.lock();
        inner
            .transactions
            .values()
            .filter(|tx| tx.stage == stage)
            .cloned()
            .collect()
    }

    pub fn active(&self) -> Vec<Transaction> {
        let inner = self.inner.lock();
        inner
            .transactions
            .values()
            .filter(|tx| tx.is_active())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().transactions.is_empty()
    }

    /// Counts by stage, active counts per component, average duration of
    /// completed transactions, and the failure rate among finished ones.
    pub fn summary(&self) -> Value {
        let inner = self.inner.lock();

        let mut stage_counts: HashMap<&'static str, usize> = TransactionStage::ALL
            .iter()
            .map(|s| (s.as_str(), 0))
            .collect();
        let mut active_by_component: HashMap<String, usize> = HashMap::new();
        let mut completed_durations = Vec::new();

        for tx in inner.transactions.values() {
            *stage_counts.entry(tx.stage.as_str()).or_insert(0) += 1;
            if tx.is_active() {
                for component in &tx.components {
                    *active_by_component.entry(component.0.clone()).or_insert(0) += 1;
                }
            }
            if tx.stage == TransactionStage::Completed {
                if let Some(duration) = tx.duration() {
                    completed_durations.push(duration.num_milliseconds() as f64 / 1000.0);
                }
            }
        }

        let average_duration = if completed_durations.is_empty() {
            None
        } else {
            Some(completed_durations.iter().sum::<f64>() / completed_durations.len() as f64)
        };

        let finished = stage_counts["COMPLETED"] + stage_counts["FAILED"] + stage_counts["CANCELED"];
        let error_rate = if finished > 0 {
            stage_counts["FAILED"] as f64 / finished as f64
        } else {
            0.0
        };

        let active = inner.transactions.values().filter(|tx| tx.is_active()).count();

        json!({
            "total_transactions": inner.transactions.len(),
            "active_transactions": active,
            "stage_counts": stage_counts,
            "active_by_component": active_by_component,
            "average_duration": average_duration,
            "error_rate": error_rate,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    /// Remove terminal transactions, optionally only those ended more
    /// than `max_age` ago. Returns the number removed.
    pub fn clear_completed(&self, max_age: Option<chrono::Duration>) -> usize {
        let cutoff = max_age.map(|age| Utc::now() - age);
        let mut inner = self.inner.lock();

        let to_remove: Vec<String> = inner
            .transactions
            .values()
            .filter(|tx| tx.stage.is_terminal())
            .filter(|tx| match cutoff {
                Some(cutoff) => tx.end_time.is_some_and(|end| end < cutoff),
                None => true,
            })
            .map(|tx| tx.id.clone())
            .collect();

        for id in &to_remove {
            Self::remove(&mut inner, id);
        }
        to_remove.len()
    }

    // Two-phase pruning: terminal transactions oldest-first by end time;
    // active transactions oldest-first by start time only as a last
    // resort.
    fn prune(&self) {
        let mut inner = self.inner.lock();
        if inner.transactions.len() <= self.max_transactions {
            return;
        }

        let mut terminal: Vec<(String, chrono::DateTime<Utc>)> = inner
            .transactions
            .values()
            .filter(|tx| tx.stage.is_terminal())
            .map(|tx| (tx.id.clone(), tx.end_time.unwrap_or_else(Utc::now)))
            .collect();
        terminal.sort_by_key(|(_, end)| *end);

        let mut pruned = 0usize;
        for (id, _) in terminal {
            if inner.transactions.len() <= self.max_transactions {
                break;
            }
            Self::remove(&mut inner, &id);
            pruned += 1;
        }

        if inner.transactions.len() > self.max_transactions {
            let mut active: Vec<(String, chrono::DateTime<Utc>)> = inner
                .transactions
                .values()
                .map(|tx| {
                    let started = tx
                        .start_time
                        .or_else(|| tx.stages.first().map(|s| s.timestamp))
                        .unwrap_or_else(Utc::now);
                    (tx.id.clone(), started)
                })
                .collect();
            active.sort_by_key(|(_, start)| *start);

            for (id, _) in active {
                if inner.transactions.len() <= self.max_transactions {
                    break;
                }
                warn!("Pruning active transaction {}", id);
                Self::remove(&mut inner, &id);
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!("Pruned {} transaction(s)", pruned);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.transactions.clear();
        inner.by_parent.clear();
        inner.by_component.clear();
        inner.by_tag.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ComponentId {
        ComponentId::new(s)
    }

    #[test]
    fn test_create_assigns_sequential_ids() {
        let logger = TransactionLogger::new(100);
        let a = logger.create(Some("first"), None, None, &[]);
        let b = logger.create(None, None, None, &[]);

        assert!(a.id.starts_with("tx-"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.name, "first");
        assert_eq!(b.name, "Transaction-2");
        assert_eq!(logger.len(), 2);
    }

    #[test]
    fn test_indices() {
        let logger = TransactionLogger::new(100);
        let parent = logger.create(Some("parent"), None, None, &[]);
        let mut child = logger.create(Some("child"), Some(&parent.id), None, &["batch"]);
        child.start(Some(&id("worker")));
        logger.update(&child);

        assert_eq!(logger.by_parent(&parent.id).len(), 1);
        assert_eq!(logger.by_component(&id("worker")).len(), 1);
        assert_eq!(logger.by_tag("batch").len(), 1);
        assert_eq!(logger.by_stage(TransactionStage::Started).len(), 1);
        assert_eq!(logger.active().len(), 2);
    }

    #[test]
    fn test_remove_cleans_indices() {
        let logger = TransactionLogger::new(100);
        let mut tx = logger.create(Some("t"), None, None, &["batch"]);
        tx.start(Some(&id("worker")));
        logger.update(&tx);

        let mut inner = logger.inner.lock();
        TransactionLogger::remove(&mut inner, &tx.id);
        assert!(inner.transactions.is_empty());
        assert!(inner.by_component.is_empty());
        assert!(inner.by_tag.is_empty());
    }

    #[test]
    fn test_pruning_prefers_oldest_terminal() {
        let logger = TransactionLogger::new(3);

        // Two terminal transactions, completed in order, then enough
        // active ones to exceed the limit.
        let mut first = logger.create(Some("first"), None, None, &[]);
        first.start(None);
        first.complete(None);
        logger.update(&first);
        std::thread::sleep(std::time::Duration::from_millis(2));

        let mut second = logger.create(Some("second"), None, None, &[]);
        second.start(None);
        second.complete(None);
        logger.update(&second);

        let third = logger.create(Some("third"), None, None, &[]);
        let fourth = logger.create(Some("fourth"), None, None, &[]);
        // The fourth create pushed the store to 4; update triggers prune.
        logger.update(&fourth);

        assert!(logger.len() <= 3);
        // Oldest terminal went first; actives survive.
        assert!(logger.get(&first.id).is_none());
        assert!(logger.get(&third.id).is_some());
        assert!(logger.get(&fourth.id).is_some());
    }

    #[test]
    fn test_pruning_falls_back_to_active() {
        let logger = TransactionLogger::new(2);

        let mut a = logger.create(Some("a"), None, None, &[]);
        a.start(None);
        logger.update(&a);
        std::thread::sleep(std::time::Duration::from_millis(2));

        let mut b = logger.create(Some("b"), None, None, &[]);
        b.start(None);
        logger.update(&b);
        std::thread::sleep(std::time::Duration::from_millis(2));

        let mut c = logger.create(Some("c"), None, None, &[]);
        c.start(None);
        logger.update(&c);

        assert_eq!(logger.len(), 2);
        // Oldest active was sacrificed.
        assert!(logger.get(&a.id).is_none());
        assert!(logger.get(&b.id).is_some());
        assert!(logger.get(&c.id).is_some());
    }

    #[test]
    fn test_summary_counts() {
        let logger = TransactionLogger::new(100);

        let mut done = logger.create(Some("done"), None, None, &[]);
        done.start(Some(&id("worker")));
        done.complete(None);
        logger.update(&done);

        let mut failed = logger.create(Some("failed"), None, None, &[]);
        failed.start(Some(&id("worker")));
        failed.fail(&id("worker"), "Error", "boom");
        logger.update(&failed);

        let mut running = logger.create(Some("running"), None, None, &[]);
        running.start(Some(&id("worker")));
        logger.update(&running);

        let summary = logger.summary();
        assert_eq!(summary["total_transactions"], 3);
        assert_eq!(summary["active_transactions"], 1);
        assert_eq!(summary["stage_counts"]["COMPLETED"], 1);
        assert_eq!(summary["stage_counts"]["FAILED"], 1);
        assert_eq!(summary["active_by_component"]["worker"], 1);
        assert_eq!(summary["error_rate"], 0.5);
    }

    #[test]
    fn test_clear_completed() {
        let logger = TransactionLogger::new(100);
        let mut done = logger.create(Some("done"), None, None, &[]);
        done.start(None);
        done.complete(None);
        logger.update(&done);
        logger.create(Some("active"), None, None, &[]);

        assert_eq!(logger.clear_completed(None), 1);
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_persistence_writes_terminal_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transactions.jsonl");
        let logger = TransactionLogger::new(100).with_persistence(&path);

        let mut tx = logger.create(Some("persisted"), None, None, &[]);
        tx.start(Some(&id("worker")));
        logger.update(&tx);
        // Non-terminal updates are not persisted.
        assert!(!path.exists());

        tx.complete(None);
        logger.update(&tx);

        let contents = std::fs::read_to_string(&path).unwrap();
        let restored: Transaction = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(restored.id, tx.id);
        assert_eq!(restored.stage, TransactionStage::Completed);
    }
}
