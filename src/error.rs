//! Error types for uploadq.

use thiserror::Error;

use crate::model::{ActorId, Capability, ItemId, ItemStatus};

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("actor {actor} lacks the {capability} capability")]
    Permission {
        actor: ActorId,
        capability: Capability,
    },

    #[error("queue item {item} is not assigned to actor {actor}")]
    NotOwned { item: ItemId, actor: ActorId },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit sink failed: {0}")]
    Audit(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Store failures are retryable; nothing was committed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
