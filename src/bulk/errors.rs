//! Bulk pool error types
//!
//! Error codes:
//! - AERO_TX_BULK_CONFIG (ERROR severity)
//! - AERO_TX_BULK_PARTITION (ERROR severity)
//! - AERO_TX_BULK_NOT_FINISHED (ERROR severity)
//! - AERO_TX_BULK_RUNNING (ERROR severity)
//! - AERO_TX_BULK_OPEN_FAILED (ERROR severity)

use thiserror::Error;

use crate::errno;
use crate::observability::Severity;
use crate::op::OpError;
use crate::queue::QueueError;

/// Result type for bulk pool operations
pub type BulkResult<T> = Result<T, BulkError>;

/// Bulk pool errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BulkError {
    /// Configuration rejected by `validate`
    #[error("Invalid bulk config: {0}")]
    InvalidConfig(String),

    /// `put` named a partition the pool does not have
    #[error("Partition {partition} out of range (partitions: {partitions})")]
    InvalidPartition { partition: usize, partitions: usize },

    /// Status read before the pool completion fired
    #[error("Bulk pool has not finished")]
    NotFinished,

    /// `run` called twice, or `fini` while workers are running
    #[error("Bulk pool is already running")]
    AlreadyRunning,

    /// A transaction open failed; the pool stopped
    #[error("Transaction open failed (rc {rc})")]
    TxOpenFailed { rc: i32 },

    /// Partition queue error
    #[error("Bulk queue error: {0}")]
    Queue(#[from] QueueError),

    /// Caller's op misused
    #[error("Bulk op error: {0}")]
    Op(#[from] OpError),
}

impl BulkError {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            BulkError::InvalidConfig(_) => "AERO_TX_BULK_CONFIG",
            BulkError::InvalidPartition { .. } => "AERO_TX_BULK_PARTITION",
            BulkError::NotFinished => "AERO_TX_BULK_NOT_FINISHED",
            BulkError::AlreadyRunning => "AERO_TX_BULK_RUNNING",
            BulkError::TxOpenFailed { .. } => "AERO_TX_BULK_OPEN_FAILED",
            BulkError::Queue(e) => e.code(),
            BulkError::Op(e) => e.code(),
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            BulkError::Queue(e) => e.severity(),
            _ => Severity::Error,
        }
    }

    /// Result code reported for this error
    pub fn rc(&self) -> i32 {
        match self {
            BulkError::TxOpenFailed { rc } => *rc,
            BulkError::InvalidConfig(_) | BulkError::InvalidPartition { .. } => errno::EINVAL,
            BulkError::Queue(QueueError::OutOfMemory { .. }) => errno::ENOMEM,
            _ => errno::EIO,
        }
    }
}
