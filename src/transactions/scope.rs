// Scoped transaction handles. Acquiring a scope starts and processes the
// transaction; releasing it deterministically ends it on every exit path:
// normal drop completes, a panicking drop fails, and the closure form
// records the error before handing it back to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::registry::ComponentId;

use super::logger::TransactionLogger;
use super::transaction::{Transaction, TransactionStage};

// Last path segment of a type name, e.g. `fabric::FabricError` ->
// `FabricError`.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Guard over an in-flight transaction. Dropping the guard completes the
/// transaction unless it already reached a terminal stage or the thread
/// is unwinding, in which case it fails with a `panic` error entry.
pub struct TransactionScope {
    logger: Arc<TransactionLogger>,
    component_id: ComponentId,
    transaction: Transaction,
    released: bool,
}

impl TransactionScope {
    pub(super) fn enter(
        logger: Arc<TransactionLogger>,
        component_id: ComponentId,
        mut transaction: Transaction,
        action: &str,
    ) -> Self {
        transaction.start(Some(&component_id));
        transaction.process(&component_id, action);
        logger.update(&transaction);
        Self {
            logger,
            component_id,
            transaction,
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.transaction.id
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.transaction.add_metadata(key, value);
        self.logger.update(&self.transaction);
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.transaction.add_tag(tag);
        self.logger.update(&self.transaction);
    }

    /// Record a processing step attributed to a component.
    pub fn process(&mut self, component_id: impl Into<ComponentId>, action: &str) {
        let component_id = component_id.into();
        self.transaction.process(&component_id, action);
        self.logger.update(&self.transaction);
    }

    /// Explicit successful completion.
    pub fn complete(mut self) -> Transaction {
        self.transaction.complete(Some(&self.component_id.clone()));
        self.logger.update(&self.transaction);
        self.released = true;
        self.transaction.clone()
    }

    /// Explicit failure with an error type and message.
    pub fn fail(
        mut self,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Transaction {
        self.transaction
            .fail(&self.component_id.clone(), error_type, message);
        self.logger.update(&self.transaction);
        self.released = true;
        self.transaction.clone()
    }

    /// Explicit cancellation.
    pub fn cancel(mut self, reason: &str) -> Transaction {
        self.transaction.cancel(Some(&self.component_id.clone()), reason);
        self.logger.update(&self.transaction);
        self.released = true;
        self.transaction.clone()
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.released || self.transaction.stage.is_terminal() {
            return;
        }
        let component_id = self.component_id.clone();
        if std::thread::panicking() {
            warn!(
                "Transaction {} dropped during unwind; marking failed",
                self.transaction.id
            );
            self.transaction
                .fail(&component_id, "panic", "scope dropped during panic");
        } else {
            self.transaction.complete(Some(&component_id));
        }
        self.logger.update(&self.transaction);
    }
}

impl TransactionLogger {
    /// Begin a scoped transaction: created, started, and processing on
    /// entry; ended deterministically when the scope is released.
    pub fn scope(
        self: &Arc<Self>,
        component_id: impl Into<ComponentId>,
        name: Option<&str>,
        action: &str,
        parent_id: Option<&str>,
        metadata: Option<HashMap<String, Value>>,
        tags: &[&str],
    ) -> TransactionScope {
        let component_id = component_id.into();
        let transaction = self.create(name, parent_id, metadata, tags);
        TransactionScope::enter(Arc::clone(self), component_id, transaction, action)
    }

    /// Run `f` inside a transaction. `Ok` completes it; `Err` fails it
    /// with the error's type name and message, then returns the error to
    /// the caller.
    pub fn in_transaction<T, E, F>(
        self: &Arc<Self>,
        component_id: impl Into<ComponentId>,
        name: Option<&str>,
        action: &str,
        f: F,
    ) -> std::result::Result<T, E>
    where
        E: std::fmt::Display,
        F: FnOnce(&mut TransactionScope) -> std::result::Result<T, E>,
    {
        let mut scope = self.scope(component_id, name, action, None, None, &[]);
        match f(&mut scope) {
            Ok(value) => {
                debug_assert!(scope.transaction.stage == TransactionStage::Processing);
                scope.complete();
                Ok(value)
            }
            Err(error) => {
                scope.fail(short_type_name::<E>(), error.to_string());
                Err(error)
            }
        }
    }
}
