//! Error types for the agreement engine

use std::time::Duration;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error: {message}")]
    ChainConnection { message: String },

    #[error("Artifact error for {name}: {message}")]
    Artifact { name: String, message: String },

    #[error("Contract {contract} has no method {method}")]
    UnknownMethod { contract: String, method: String },

    #[error("ABI error for {operation} on {target}: {message}")]
    Abi {
        target: String,
        operation: String,
        message: String,
    },

    /// The chain rejected the transaction outright
    #[error("{operation} on {target} rejected by chain: {reason}")]
    Submission {
        target: String,
        operation: String,
        reason: String,
    },

    /// No confirmation within the configured bound
    #[error("Timed out after {waited:?} waiting for {operation} on {target}")]
    PendingTimeout {
        target: String,
        operation: String,
        waited: Duration,
    },

    #[error("Precondition violated for {operation} on {target}: {condition}")]
    PreconditionViolation {
        target: String,
        operation: String,
        condition: String,
    },

    /// Subscription ended before an event from the transaction arrived
    #[error("No event correlated for {operation} on {target} (tx {tx}): {reason}")]
    CorrelationFailure {
        target: String,
        operation: String,
        tx: String,
        reason: String,
    },

    #[error("{operation} on {target} cancelled")]
    Cancelled { target: String, operation: String },

    #[error("Event decoding error: {0}")]
    EventDecoding(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn precondition(
        target: impl Into<String>,
        operation: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        EngineError::PreconditionViolation {
            target: target.into(),
            operation: operation.into(),
            condition: condition.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ChainConnection { .. }
                | EngineError::PendingTimeout { .. }
                | EngineError::CorrelationFailure { .. }
        )
    }

    /// Correlation failures count as pending timeouts: the transaction may still land.
    pub fn is_pending_timeout(&self) -> bool {
        matches!(
            self,
            EngineError::PendingTimeout { .. } | EngineError::CorrelationFailure { .. }
        )
    }

    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, EngineError::PreconditionViolation { .. })
    }

    /// Replace the reported target with a logical id such as `agreement 0`.
    pub fn with_target(mut self, logical: impl Into<String>) -> Self {
        let logical = logical.into();
        match &mut self {
            EngineError::Abi { target, .. }
            | EngineError::Submission { target, .. }
            | EngineError::PendingTimeout { target, .. }
            | EngineError::PreconditionViolation { target, .. }
            | EngineError::CorrelationFailure { target, .. }
            | EngineError::Cancelled { target, .. } => *target = logical,
            _ => {}
        }
        self
    }

    /// Target and operation of a taxonomy error, when it carries them.
    pub fn context(&self) -> Option<(&str, &str)> {
        match self {
            EngineError::Abi {
                target, operation, ..
            }
            | EngineError::Submission {
                target, operation, ..
            }
            | EngineError::PendingTimeout {
                target, operation, ..
            }
            | EngineError::PreconditionViolation {
                target, operation, ..
            }
            | EngineError::CorrelationFailure {
                target, operation, ..
            }
            | EngineError::Cancelled { target, operation } => Some((target, operation)),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
