// Cross-component transaction logging: the transaction model, the
// indexed logger with pruning, and scoped handles.

pub mod logger;
pub mod scope;
pub mod transaction;

pub use logger::TransactionLogger;
pub use scope::TransactionScope;
pub use transaction::{StageEntry, Transaction, TransactionErrorEntry, TransactionStage};
