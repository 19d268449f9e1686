//! Group commit of closed transactions
//!
//! Closed transactions queue up here. The flusher takes whatever has
//! arrived (at most `group_max`), appends the whole group to the log,
//! "flushes" once, and only then reports every member persistent, in
//! arrival order.
//!
//! Groups are formed only by concurrent arrival: there are no timers
//! and no waiting for a group to fill up.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::checksum::record_checksum;
use crate::tx::{PersistentCallback, TxError, TxResult};

/// One captured region of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedRegion {
    /// Offset in the target segment
    pub offset: u64,
    /// Captured bytes
    pub data: Vec<u8>,
}

/// A committed transaction as stored in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    /// Position in the log, assigned at append
    pub sequence: u64,
    /// Transaction that produced the record
    pub tx_id: u64,
    /// Captured regions in capture order
    pub regions: Vec<CapturedRegion>,
    /// Opaque payload
    pub payload: Vec<u8>,
    /// CRC32 over sequence, id, regions and payload
    pub checksum: u32,
}

impl LogRecord {
    /// Recomputes the checksum and compares it with the stored one
    pub fn verify(&self) -> bool {
        record_checksum(self.sequence, self.tx_id, &self.regions, &self.payload) == self.checksum
    }
}

/// State of a pending commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCommitState {
    /// Waiting for the flusher
    Queued,
    /// Appended to the log, waiting for the group flush
    Appended,
    /// Flushed; the transaction is persistent
    Durable,
}

/// A closed transaction waiting to become persistent
pub struct PendingCommit {
    tx_id: u64,
    regions: Vec<CapturedRegion>,
    payload: Vec<u8>,
    sequence: Option<u64>,
    state: PendingCommitState,
    on_persistent: Option<PersistentCallback>,
}

impl PendingCommit {
    /// Create a queued commit
    pub fn new(
        tx_id: u64,
        regions: Vec<CapturedRegion>,
        payload: Vec<u8>,
        on_persistent: PersistentCallback,
    ) -> Self {
        Self {
            tx_id,
            regions,
            payload,
            sequence: None,
            state: PendingCommitState::Queued,
            on_persistent: Some(on_persistent),
        }
    }

    /// Transaction id
    pub fn tx_id(&self) -> u64 {
        self.tx_id
    }

    /// Current state
    pub fn state(&self) -> PendingCommitState {
        self.state
    }

    /// Assigns the log position and builds the stored record
    pub fn append(&mut self, sequence: u64) -> LogRecord {
        debug_assert_eq!(self.state, PendingCommitState::Queued);
        self.sequence = Some(sequence);
        self.state = PendingCommitState::Appended;
        LogRecord {
            sequence,
            tx_id: self.tx_id,
            checksum: record_checksum(sequence, self.tx_id, &self.regions, &self.payload),
            regions: std::mem::take(&mut self.regions),
            payload: std::mem::take(&mut self.payload),
        }
    }

    /// Marks the commit durable and fires its persistent callback
    pub fn acknowledge(&mut self) {
        debug_assert_eq!(self.state, PendingCommitState::Appended);
        self.state = PendingCommitState::Durable;
        if let Some(cb) = self.on_persistent.take() {
            cb(Ok(self.tx_id));
        }
    }

    /// Fails the commit, handing `error` to its persistent callback
    pub fn reject(mut self, error: TxError) {
        if let Some(cb) = self.on_persistent.take() {
            cb(Err(error));
        }
    }
}

/// Commits flushed together
pub struct CommitGroup {
    /// Monotonic group number
    pub epoch: u64,
    /// Members in arrival order
    pub commits: Vec<PendingCommit>,
}

impl CommitGroup {
    /// Number of commits in this group
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Whether the group is empty
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

struct CommitterInner {
    queue: VecDeque<PendingCommit>,
    shutdown: bool,
    epoch: u64,
}

/// Queue of closed transactions feeding the flusher
pub struct GroupCommitter {
    group_max: usize,
    inner: Mutex<CommitterInner>,
    arrived: Condvar,
}

impl GroupCommitter {
    /// Create a committer forming groups of at most `group_max`
    pub fn new(group_max: usize) -> Self {
        Self {
            group_max: group_max.max(1),
            inner: Mutex::new(CommitterInner {
                queue: VecDeque::new(),
                shutdown: false,
                epoch: 0,
            }),
            arrived: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CommitterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a closed transaction
    ///
    /// After shutdown the commit is rejected: its callback receives
    /// `Err(Closed)` before this returns the same error.
    pub fn submit(&self, commit: PendingCommit) -> TxResult<()> {
        let mut inner = self.lock();
        if inner.shutdown {
            drop(inner);
            commit.reject(TxError::Closed);
            return Err(TxError::Closed);
        }
        inner.queue.push_back(commit);
        self.arrived.notify_one();
        Ok(())
    }

    /// Blocks until commits are queued and takes the next group
    ///
    /// Returns `None` once shut down and empty.
    pub fn next_group(&self) -> Option<CommitGroup> {
        let mut inner = self.lock();
        while inner.queue.is_empty() && !inner.shutdown {
            inner = self
                .arrived
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.queue.is_empty() {
            return None;
        }
        let take = inner.queue.len().min(self.group_max);
        let commits: Vec<_> = inner.queue.drain(..take).collect();
        inner.epoch += 1;
        Some(CommitGroup {
            epoch: inner.epoch,
            commits,
        })
    }

    /// Stops accepting commits; already queued ones are still handed out
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.arrived.notify_all();
    }

    /// Commits waiting for the flusher
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }
}
