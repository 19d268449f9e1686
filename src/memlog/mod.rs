//! Reference in-memory log
//!
//! `MemLog` implements `TxEngine` without any storage underneath. It is
//! what the CLI runs workloads against and what the tests use to drive
//! the batching engine end to end:
//!
//! - open fails with `E2BIG` when the requested credit or payload
//!   exceeds the configured maximum
//! - captures are checked against the credit the transaction was opened
//!   with
//! - closed transactions are appended by a flusher thread in groups and
//!   acknowledged only after their whole group is in the log
//! - every record carries a CRC32 over its contents
//! - open failures can be injected deterministically

mod checksum;
mod engine;
mod group_commit;

pub use checksum::{compute_checksum, record_checksum, verify_checksum};
pub use engine::{MemLog, MemLogStats};
pub use group_commit::{
    CapturedRegion, CommitGroup, GroupCommitter, LogRecord, PendingCommit, PendingCommitState,
};

use serde::{Deserialize, Serialize};

use crate::credit::TxCredit;
use crate::tx::{TxError, TxResult};

/// Which transaction opens are made to fail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePlan {
    /// No injected failures
    #[default]
    Never,
    /// Only the n-th open (1-based) fails
    NthOpen(u64),
    /// The n-th open and every later one fail
    FromNthOpen(u64),
    /// Every open fails
    Always,
}

/// Configuration for `MemLog`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemLogConfig {
    /// Largest credit a single transaction may be opened with
    pub tx_size_max: TxCredit,
    /// Largest payload a single transaction may reserve
    pub payload_max: u64,
    /// Most closed transactions flushed as one group
    pub group_max: usize,
    /// Injected open failures
    #[serde(default)]
    pub fail_open: FailurePlan,
}

impl Default for MemLogConfig {
    fn default() -> Self {
        Self {
            tx_size_max: TxCredit::new(256, 1 << 20),
            payload_max: 64 * 1024,
            group_max: 64,
            fail_open: FailurePlan::Never,
        }
    }
}

impl MemLogConfig {
    /// Rejects limits no transaction could satisfy
    pub fn validate(&self) -> TxResult<()> {
        if self.tx_size_max.regions == 0 {
            return Err(TxError::InvalidConfig(
                "tx_size_max.regions must be > 0".into(),
            ));
        }
        if self.group_max == 0 {
            return Err(TxError::InvalidConfig("group_max must be > 0".into()));
        }
        if matches!(
            self.fail_open,
            FailurePlan::NthOpen(0) | FailurePlan::FromNthOpen(0)
        ) {
            return Err(TxError::InvalidConfig(
                "open numbers are 1-based".into(),
            ));
        }
        Ok(())
    }
}
