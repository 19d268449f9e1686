//! Op error types
//!
//! Every contract violation of the completion primitive is reported as
//! one of these instead of aborting the process.
//!
//! Error codes:
//! - AERO_TX_OP_INVALID_STATE (ERROR severity)
//! - AERO_TX_OP_STALE_HANDLE (ERROR severity)
//! - AERO_TX_OP_SET_MISUSE (ERROR severity)
//! - AERO_TX_OP_RC_MISUSE (ERROR severity)

use thiserror::Error;

use super::{OpId, OpKind, OpState};
use crate::observability::Severity;

/// Result type for op operations
pub type OpResult<T> = Result<T, OpError>;

/// Op errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    /// Operation called in the wrong state
    #[error("op {op}: expected state {expected:?}, found {actual:?}")]
    InvalidState {
        op: OpId,
        expected: &'static [OpState],
        actual: OpState,
    },

    /// Op is DONE but its completion callbacks are still running
    #[error("op {0}: completion in progress")]
    CompletionInProgress(OpId),

    /// Operation requires a different kind
    #[error("op {op}: expected kind {expected:?}, found {actual:?}")]
    InvalidKind {
        op: OpId,
        expected: OpKind,
        actual: OpKind,
    },

    /// Set operation on a NORMAL op
    #[error("op {0} is not a set")]
    NotSetKind(OpId),

    /// Child added after `set_add_finish`
    #[error("op {0}: set addition already finished")]
    AdditionFinished(OpId),

    /// Child added to a set that already completed
    #[error("op {0}: set already done")]
    ParentDone(OpId),

    /// `set_add_finish` on a set without children
    #[error("op {0}: set has no children")]
    EmptySet(OpId),

    /// Child already belongs to a set
    #[error("op {child} already belongs to set {parent}")]
    AlreadyAttached { child: OpId, parent: OpId },

    /// An op cannot be its own child
    #[error("op {0} cannot be added to itself")]
    SelfAttach(OpId),

    /// Result code set twice in one ACTIVE period
    #[error("op {0}: result code already set")]
    RcAlreadySet(OpId),

    /// Result code read but never set
    #[error("op {0}: result code not set")]
    RcNotSet(OpId),

    /// Handle refers to a finalized op
    #[error("op {0}: stale handle")]
    StaleHandle(OpId),

    /// Parent and child live in different arenas
    #[error("op {0}: belongs to a different arena")]
    ForeignArena(OpId),

    /// Callback slot already occupied
    #[error("op {0}: callback already set")]
    CallbackAlreadySet(OpId),
}

impl OpError {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            OpError::InvalidState { .. }
            | OpError::InvalidKind { .. }
            | OpError::CompletionInProgress(_) => "AERO_TX_OP_INVALID_STATE",
            OpError::StaleHandle(_) | OpError::ForeignArena(_) => "AERO_TX_OP_STALE_HANDLE",
            OpError::RcAlreadySet(_) | OpError::RcNotSet(_) => "AERO_TX_OP_RC_MISUSE",
            OpError::NotSetKind(_)
            | OpError::AdditionFinished(_)
            | OpError::ParentDone(_)
            | OpError::EmptySet(_)
            | OpError::AlreadyAttached { .. }
            | OpError::SelfAttach(_)
            | OpError::CallbackAlreadySet(_) => "AERO_TX_OP_SET_MISUSE",
        }
    }

    /// Op errors are caller bugs; the process keeps running
    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}
