// Transaction logger integration tests: scoped handles on both exit
// paths, stage monotonicity, indexed queries, and pruning.

use std::sync::Arc;

use integration_fabric::registry::ComponentId;
use integration_fabric::transactions::{TransactionLogger, TransactionStage};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn id(s: &str) -> ComponentId {
    ComponentId::new(s)
}

#[derive(Debug)]
struct ValueError(&'static str);

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// S4 happy path: metadata and processing steps inside the scope, normal
// exit completes with both components attributed.
#[test]
fn test_scoped_transaction_happy_path() {
    let logger = Arc::new(TransactionLogger::new(100));

    let tx_id = {
        let mut scope = logger.scope("worker", Some("import"), "load", None, None, &["batch"]);
        scope.add_metadata("k", "v");
        scope.process("db", "write");
        scope.id().to_string()
    };

    let tx = logger.get(&tx_id).unwrap();
    assert_eq!(tx.stage, TransactionStage::Completed);
    assert_eq!(tx.metadata["k"], "v");
    assert_eq!(tx.components, vec![id("worker"), id("db")]);
    assert!(tx.duration().unwrap() >= chrono::Duration::zero());
    assert!(tx.tags.contains("batch"));
}

// S4 failure path: the error is recorded with its type and propagates.
#[test]
fn test_scoped_transaction_failure_path() {
    let logger = Arc::new(TransactionLogger::new(100));

    let result: Result<(), ValueError> =
        logger.in_transaction("worker", Some("import"), "load", |scope| {
            scope.add_metadata("k", "v");
            Err(ValueError("boom"))
        });
    assert_eq!(result.unwrap_err().0, "boom");

    let failed = logger.by_stage(TransactionStage::Failed);
    assert_eq!(failed.len(), 1);
    let tx = &failed[0];
    assert_eq!(tx.errors.len(), 1);
    assert_eq!(tx.errors[0].error_type, "ValueError");
    assert_eq!(tx.errors[0].message, "boom");
    assert_eq!(tx.errors[0].component_id, id("worker"));
    assert_eq!(tx.metadata["k"], "v");
}

// Property 13: terminal stages absorb further transitions.
#[test]
fn test_stage_monotonicity_after_terminal() {
    let logger = Arc::new(TransactionLogger::new(100));
    let mut tx = logger.create(Some("t"), None, None, &[]);
    tx.start(Some(&id("worker")));
    tx.cancel(None, "operator abort");
    logger.update(&tx);

    let stages_before = tx.stages.len();
    tx.start(None);
    tx.process(&id("worker"), "late");
    tx.complete(None);
    tx.fail(&id("worker"), "Error", "late");
    logger.update(&tx);

    let stored = logger.get(&tx.id).unwrap();
    assert_eq!(stored.stage, TransactionStage::Canceled);
    assert_eq!(stored.stages.len(), stages_before);
}

#[test]
fn test_nested_transactions_indexed_by_parent() {
    let logger = Arc::new(TransactionLogger::new(100));
    let parent = logger.create(Some("outer"), None, None, &[]);

    for n in 0..3 {
        let name = format!("inner-{}", n);
        let mut child = logger.create(Some(name.as_str()), Some(&parent.id), None, &[]);
        child.start(Some(&id("worker")));
        child.complete(None);
        logger.update(&child);
    }

    let children = logger.by_parent(&parent.id);
    assert_eq!(children.len(), 3);
    assert!(children.iter().all(|c| c.stage == TransactionStage::Completed));
    assert_eq!(logger.by_component(&id("worker")).len(), 3);
}

#[test]
fn test_queries_by_tag_and_stage_and_active() {
    let logger = Arc::new(TransactionLogger::new(100));

    let mut tagged = logger.create(Some("tagged"), None, None, &["ingest", "nightly"]);
    tagged.start(Some(&id("worker")));
    logger.update(&tagged);

    let mut done = logger.create(Some("done"), None, None, &["ingest"]);
    done.start(None);
    done.complete(None);
    logger.update(&done);

    assert_eq!(logger.by_tag("ingest").len(), 2);
    assert_eq!(logger.by_tag("nightly").len(), 1);
    assert!(logger.by_tag("unknown").is_empty());
    assert_eq!(logger.by_stage(TransactionStage::Started).len(), 1);
    assert_eq!(logger.active().len(), 1);
    assert_eq!(logger.active()[0].id, tagged.id);
}

// Property 15: pruning keeps the store at the limit and drops terminal
// transactions with the earliest end times first.
#[test]
fn test_pruning_correctness() {
    init_tracing();
    let logger = Arc::new(TransactionLogger::new(4));
    let mut terminal_ids = Vec::new();

    for n in 0..4 {
        let name = format!("t{}", n);
        let mut tx = logger.create(Some(name.as_str()), None, None, &[]);
        tx.start(None);
        tx.complete(None);
        logger.update(&tx);
        terminal_ids.push(tx.id.clone());
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    // Two more transactions push the store over the limit.
    let active_a = logger.create(Some("a"), None, None, &[]);
    let active_b = logger.create(Some("b"), None, None, &[]);
    logger.update(&logger.get(&active_b.id).unwrap());

    assert!(logger.len() <= 4);
    // The two earliest-ended terminal transactions were dropped first.
    assert!(logger.get(&terminal_ids[0]).is_none());
    assert!(logger.get(&terminal_ids[1]).is_none());
    assert!(logger.get(&terminal_ids[2]).is_some());
    assert!(logger.get(&terminal_ids[3]).is_some());
    assert!(logger.get(&active_a.id).is_some());
    assert!(logger.get(&active_b.id).is_some());
}

#[test]
fn test_summary_statistics() {
    let logger = Arc::new(TransactionLogger::new(100));

    for outcome in ["ok", "ok", "fail"] {
        let mut tx = logger.create(Some(outcome), None, None, &[]);
        tx.start(Some(&id("worker")));
        if outcome == "fail" {
            tx.fail(&id("worker"), "Error", "boom");
        } else {
            tx.complete(None);
        }
        logger.update(&tx);
    }

    let summary = logger.summary();
    assert_eq!(summary["total_transactions"], 3);
    assert_eq!(summary["active_transactions"], 0);
    assert_eq!(summary["stage_counts"]["COMPLETED"], 2);
    assert_eq!(summary["stage_counts"]["FAILED"], 1);
    let error_rate = summary["error_rate"].as_f64().unwrap();
    assert!((error_rate - 1.0 / 3.0).abs() < 1e-9);
    assert!(summary["average_duration"].is_number());
}

#[test]
fn test_transaction_ids_are_monotonic_per_logger() {
    let logger = Arc::new(TransactionLogger::new(100));
    let a = logger.create(None, None, None, &[]);
    let b = logger.create(None, None, None, &[]);

    let suffix = |tx_id: &str| -> u64 { tx_id.rsplit('-').next().unwrap().parse().unwrap() };
    assert!(suffix(&b.id) > suffix(&a.id));
    assert!(a.id.starts_with("tx-"));
}
