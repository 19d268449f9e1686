//! Transaction error types
//!
//! Error codes:
//! - AERO_TX_OPEN_FAILED (ERROR severity)
//! - AERO_TX_CREDIT_EXCEEDED (FATAL severity)
//! - AERO_TX_PAYLOAD_EXCEEDED (FATAL severity)
//! - AERO_TX_CLOSED (ERROR severity)
//! - AERO_TX_ENGINE_CONFIG (ERROR severity)
//! - AERO_TX_ENGINE_START (FATAL severity)

use thiserror::Error;

use crate::credit::TxCredit;
use crate::errno;
use crate::observability::Severity;

/// Result type for transaction operations
pub type TxResult<T> = Result<T, TxError>;

/// Transaction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// The engine could not open the transaction
    #[error("Transaction open failed (rc {rc}): {reason}")]
    OpenFailed { rc: i32, reason: String },

    /// A capture needs more credit than was prepared
    #[error("Transaction credit exceeded: used {used}, prepared {prepared}")]
    CreditExceeded { used: TxCredit, prepared: TxCredit },

    /// Payload larger than the reserved payload budget
    #[error("Transaction payload exceeded: {used} > {reserved} bytes")]
    PayloadExceeded { used: u64, reserved: u64 },

    /// Operation on a closed transaction or a stopped engine
    #[error("Transaction closed")]
    Closed,

    /// Engine configuration rejected
    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),

    /// Engine background thread could not be started
    #[error("Engine start failed: {0}")]
    EngineStart(String),
}

impl TxError {
    /// Open failure with an explicit result code
    pub fn open_failed(rc: i32, reason: impl Into<String>) -> Self {
        TxError::OpenFailed {
            rc,
            reason: reason.into(),
        }
    }

    /// Negative result code carried into ops and the pool status
    pub fn rc(&self) -> i32 {
        match self {
            TxError::OpenFailed { rc, .. } => *rc,
            TxError::CreditExceeded { .. } | TxError::PayloadExceeded { .. } => errno::E2BIG,
            TxError::Closed | TxError::EngineStart(_) => errno::EIO,
            TxError::InvalidConfig(_) => errno::EINVAL,
        }
    }

    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            TxError::OpenFailed { .. } => "AERO_TX_OPEN_FAILED",
            TxError::CreditExceeded { .. } => "AERO_TX_CREDIT_EXCEEDED",
            TxError::PayloadExceeded { .. } => "AERO_TX_PAYLOAD_EXCEEDED",
            TxError::Closed => "AERO_TX_CLOSED",
            TxError::InvalidConfig(_) => "AERO_TX_ENGINE_CONFIG",
            TxError::EngineStart(_) => "AERO_TX_ENGINE_START",
        }
    }

    /// Under-reservation is a caller bug
    pub fn severity(&self) -> Severity {
        match self {
            TxError::CreditExceeded { .. }
            | TxError::PayloadExceeded { .. }
            | TxError::EngineStart(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rc_mapping() {
        assert_eq!(TxError::open_failed(errno::ENOSPC, "full").rc(), errno::ENOSPC);
        assert_eq!(
            TxError::PayloadExceeded {
                used: 2,
                reserved: 1
            }
            .rc(),
            errno::E2BIG
        );
    }

    #[test]
    fn test_display() {
        let msg = TxError::open_failed(errno::E2BIG, "too large").to_string();
        assert!(msg.contains("rc -7"));
        assert!(msg.contains("too large"));
    }
}
