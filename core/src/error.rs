use thiserror::Error;

use crate::dom::NodeId;

/// Failures of the durable key-value collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The host runtime was torn down; the store will not come back.
    #[error("storage is unavailable")]
    Unavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, StorageError::Unavailable)
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge peer disconnected")]
    Disconnected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    MissingNode(NodeId),

    #[error("node {0:?} is detached from the document")]
    Detached(NodeId),

    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("node {0:?} cannot have children")]
    NotAnElement(NodeId),

    #[error("inserting {node:?} under {parent:?} would create a cycle")]
    Cycle { parent: NodeId, node: NodeId },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Crate-level error for operations that can fail before the pipeline runs.
#[derive(Debug, Error)]
pub enum EnricherError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, EnricherError>;
