use thiserror::Error;

use crate::registry::ComponentState;

#[derive(Error, Debug)]
pub enum FabricError {
    #[error("Component id must not be empty")]
    InvalidId,

    #[error("Component {0} already registered")]
    AlreadyRegistered(String),

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Illegal state transition: {from} -> {to}")]
    IllegalTransition {
        from: ComponentState,
        to: ComponentState,
    },

    #[error("Interface validation failed: {0:?}")]
    InterfaceValidation(Vec<String>),

    #[error("Interface error: {0}")]
    Interface(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Health error: {0}")]
    Health(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FabricError>;
