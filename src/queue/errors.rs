//! Queue error types
//!
//! Error codes:
//! - AERO_TX_QUEUE_CONFIG (ERROR severity)
//! - AERO_TX_QUEUE_CLOSED (ERROR severity)
//! - AERO_TX_QUEUE_OVERCOMMITTED (ERROR severity)
//! - AERO_TX_QUEUE_NOT_DRAINED (ERROR severity)
//! - AERO_TX_QUEUE_NO_MEMORY (FATAL severity)

use thiserror::Error;

use crate::observability::Severity;
use crate::op::OpError;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Configuration rejected by `validate`
    #[error("Invalid queue config: {0}")]
    InvalidConfig(String),

    /// Preallocation failed
    #[error("Queue preallocation of {slots} slots failed")]
    OutOfMemory { slots: usize },

    /// `put` after `end`
    #[error("Queue is closed")]
    Closed,

    /// More producers parked than `producers_max`
    #[error("Too many waiting producers (max: {0})")]
    TooManyProducers(usize),

    /// More consumers parked than `consumers_max`
    #[error("Too many waiting consumers (max: {0})")]
    TooManyConsumers(usize),

    /// `fini` while items are still resident
    #[error("Queue not drained: {remaining} items remaining")]
    NotDrained { remaining: u64 },

    /// Caller's op misused
    #[error("Queue op error: {0}")]
    Op(#[from] OpError),
}

impl QueueError {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::InvalidConfig(_) => "AERO_TX_QUEUE_CONFIG",
            QueueError::OutOfMemory { .. } => "AERO_TX_QUEUE_NO_MEMORY",
            QueueError::Closed => "AERO_TX_QUEUE_CLOSED",
            QueueError::TooManyProducers(_) | QueueError::TooManyConsumers(_) => {
                "AERO_TX_QUEUE_OVERCOMMITTED"
            }
            QueueError::NotDrained { .. } => "AERO_TX_QUEUE_NOT_DRAINED",
            QueueError::Op(e) => e.code(),
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            QueueError::OutOfMemory { .. } => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}
