//! Engine errors.
//!
//! This module provides:
//! - `EngineError`: failures surfaced to callers of the run decomposer and
//!   worker loop
//! - `TaskError`: failures of one claimed task, classified so the worker can
//!   decide between requeue and dead-lettering

use infra_store::StoreError;
use pricer_core::types::{ComputationError, ValidationError};
use thiserror::Error;

/// Errors returned to engine callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request or snapshot is malformed. Nothing was persisted.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The store failed outside a claimed task.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Class of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    NotFound,
    Computation,
    Infrastructure,
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskErrorKind::NotFound => write!(f, "not_found"),
            TaskErrorKind::Computation => write!(f, "computation"),
            TaskErrorKind::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

/// Failure of one claimed task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A run, snapshot or instrument referenced by the task does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// `run`, `position snapshot`, `market snapshot` or `instrument`
        kind: &'static str,
        id: String,
    },

    /// Pricer dispatch failed for one (position, scenario). Aborts the batch.
    #[error("Computation failed for position {position_id} scenario {scenario_id}: {source}")]
    Computation {
        position_id: String,
        scenario_id: String,
        #[source]
        source: ComputationError,
    },

    /// A store read or write failed mid-task.
    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] StoreError),
}

impl TaskError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> TaskErrorKind {
        match self {
            TaskError::NotFound { .. } => TaskErrorKind::NotFound,
            TaskError::Computation { .. } => TaskErrorKind::Computation,
            TaskError::Infrastructure(_) => TaskErrorKind::Infrastructure,
        }
    }

    /// Whether running the task again could plausibly succeed.
    ///
    /// Missing references do not appear by themselves; everything else is
    /// treated as transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskError::NotFound { .. })
    }
}

/// Truncate `message` to at most `max_chars` characters, on a char boundary.
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
