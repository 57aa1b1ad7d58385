use crate::entity::EntityKind;
use crate::types::Id;
use crate::validation::{RejectionKind, ValidationErrors};

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A controlled validation failure. Nothing was written.
    #[error("{kind} validation failed: {errors}")]
    Rejected {
        kind: RejectionKind,
        errors: ValidationErrors,
    },
    #[error("{kind} {id} does not exist")]
    NotFound { kind: EntityKind, id: Id },
    #[error("{kind} {id} is still referenced and cannot be deleted")]
    Protected { kind: EntityKind, id: Id },
    /// The row changed after it was read. Nothing was written, the whole
    /// mutation can be retried.
    #[error("{kind} {id} was changed by a concurrent save")]
    Conflict { kind: EntityKind, id: Id },
    #[error("mutations must be attributed to an identified user")]
    Anonymous,
    #[error("validator failed internally: {0}")]
    Internal(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to generate identifier: {0}")]
    Identifier(#[from] anyhow::Error),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("failed to build snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn encode<E: std::fmt::Display>(err: E) -> Self {
        EngineError::Encode(err.to_string())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }

    /// Field level messages when this is a controlled rejection.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            EngineError::Rejected { errors, .. } => Some(errors),
            _ => None,
        }
    }
}
