//! In-memory log engine
//!
//! Opens transactions against a maximum credit and payload size, checks
//! every capture against the credit the transaction was opened with, and
//! makes closed transactions persistent through a group-commit flusher
//! thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde::Serialize;

use super::group_commit::{CapturedRegion, GroupCommitter, LogRecord, PendingCommit};
use super::{FailurePlan, MemLogConfig};
use crate::credit::TxCredit;
use crate::errno;
use crate::observability::{event_enabled, log_event_with_fields, Event};
use crate::tx::{OpenCallback, PersistentCallback, Transaction, TxEngine, TxError, TxResult};

#[derive(Default)]
struct LogState {
    records: Vec<LogRecord>,
    next_sequence: u64,
}

#[derive(Default)]
struct LogCounters {
    opened: AtomicU64,
    open_failed: AtomicU64,
    committed: AtomicU64,
    groups: AtomicU64,
    largest_group: AtomicU64,
}

struct LogShared {
    config: MemLogConfig,
    committer: GroupCommitter,
    log: Mutex<LogState>,
    next_tx: AtomicU64,
    opens: AtomicU64,
    counters: LogCounters,
}

impl LogShared {
    fn log(&self) -> MutexGuard<'_, LogState> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flusher loop: append each group, then acknowledge its members
    fn flush_groups(&self) {
        while let Some(mut group) = self.committer.next_group() {
            {
                let mut log = self.log();
                for commit in &mut group.commits {
                    let sequence = log.next_sequence;
                    log.next_sequence += 1;
                    let record = commit.append(sequence);
                    log.records.push(record);
                }
            }

            let size = group.len() as u64;
            self.counters.groups.fetch_add(1, Ordering::Relaxed);
            self.counters.committed.fetch_add(size, Ordering::Relaxed);
            self.counters.largest_group.fetch_max(size, Ordering::Relaxed);
            if event_enabled(Event::MemLogGroupCommit) {
                log_event_with_fields(
                    Event::MemLogGroupCommit,
                    &[
                        ("epoch", &group.epoch.to_string()),
                        ("size", &size.to_string()),
                    ],
                );
            }

            for commit in &mut group.commits {
                commit.acknowledge();
            }
        }
        log_event_with_fields(
            Event::MemLogShutdown,
            &[("committed", &self.counters.committed.load(Ordering::Relaxed).to_string())],
        );
    }
}

/// Counters of a `MemLog`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemLogStats {
    pub opened: u64,
    pub open_failed: u64,
    pub committed: u64,
    pub groups: u64,
    pub largest_group: u64,
}

/// In-memory group-committing log
pub struct MemLog {
    shared: Arc<LogShared>,
    flusher: Option<JoinHandle<()>>,
}

impl MemLog {
    /// Validate `config` and start the flusher thread
    pub fn start(config: MemLogConfig) -> TxResult<Self> {
        config.validate()?;
        let shared = Arc::new(LogShared {
            committer: GroupCommitter::new(config.group_max),
            config,
            log: Mutex::new(LogState::default()),
            next_tx: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            counters: LogCounters::default(),
        });

        let flusher_shared = Arc::clone(&shared);
        let flusher = thread::Builder::new()
            .name("aerotx-memlog-flusher".to_string())
            .spawn(move || flusher_shared.flush_groups())
            .map_err(|e| TxError::EngineStart(e.to_string()))?;

        Ok(Self {
            shared,
            flusher: Some(flusher),
        })
    }

    /// Configuration the log was started with
    pub fn config(&self) -> &MemLogConfig {
        &self.shared.config
    }

    /// Copy of every committed record in log order
    pub fn records(&self) -> Vec<LogRecord> {
        self.shared.log().records.clone()
    }

    /// Number of committed records
    pub fn record_count(&self) -> usize {
        self.shared.log().records.len()
    }

    /// Whether every committed record passes its checksum
    pub fn verify(&self) -> bool {
        self.shared.log().records.iter().all(LogRecord::verify)
    }

    /// Current counters
    pub fn stats(&self) -> MemLogStats {
        let c = &self.shared.counters;
        MemLogStats {
            opened: c.opened.load(Ordering::Relaxed),
            open_failed: c.open_failed.load(Ordering::Relaxed),
            committed: c.committed.load(Ordering::Relaxed),
            groups: c.groups.load(Ordering::Relaxed),
            largest_group: c.largest_group.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting commits and waits for queued ones to persist
    pub fn shutdown(&mut self) {
        self.shared.committer.shutdown();
        if let Some(flusher) = self.flusher.take() {
            // The last reference may be released by a persistent callback
            if flusher.thread().id() != thread::current().id() {
                let _ = flusher.join();
            }
        }
    }

    fn refuse(&self, on_open: OpenCallback, error: TxError) {
        self.shared
            .counters
            .open_failed
            .fetch_add(1, Ordering::Relaxed);
        on_open(Err(error));
    }
}

impl TxEngine for MemLog {
    fn open(&self, credit: TxCredit, payload: u64, on_open: OpenCallback) {
        let config = &self.shared.config;
        let attempt = self.shared.opens.fetch_add(1, Ordering::SeqCst) + 1;

        if config.fail_open.fails(attempt) {
            return self.refuse(
                on_open,
                TxError::open_failed(errno::ENOSPC, format!("injected failure on open #{}", attempt)),
            );
        }
        if !credit.le(&config.tx_size_max) {
            return self.refuse(
                on_open,
                TxError::open_failed(
                    errno::E2BIG,
                    format!("credit {} exceeds {}", credit, config.tx_size_max),
                ),
            );
        }
        if payload > config.payload_max {
            return self.refuse(
                on_open,
                TxError::open_failed(
                    errno::E2BIG,
                    format!("payload {} exceeds {}", payload, config.payload_max),
                ),
            );
        }

        let id = self.shared.next_tx.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.counters.opened.fetch_add(1, Ordering::Relaxed);
        on_open(Ok(Box::new(MemTx {
            id,
            prepared: credit,
            used: TxCredit::ZERO,
            payload_reserved: payload,
            regions: Vec::new(),
            payload: Vec::new(),
            shared: Arc::clone(&self.shared),
        })));
    }

    fn should_break(&self, accum: &TxCredit, candidate: &TxCredit) -> bool {
        !(*accum + *candidate).le(&self.shared.config.tx_size_max)
    }

    fn payload_should_break(&self, accum: u64, candidate: u64) -> bool {
        accum.saturating_add(candidate) > self.shared.config.payload_max
    }
}

impl Drop for MemLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for MemLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemLog")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Transaction opened by `MemLog`
struct MemTx {
    id: u64,
    prepared: TxCredit,
    used: TxCredit,
    payload_reserved: u64,
    regions: Vec<CapturedRegion>,
    payload: Vec<u8>,
    shared: Arc<LogShared>,
}

impl Transaction for MemTx {
    fn id(&self) -> u64 {
        self.id
    }

    fn prepared(&self) -> TxCredit {
        self.prepared
    }

    fn used(&self) -> TxCredit {
        self.used
    }

    fn capture(&mut self, offset: u64, data: &[u8]) -> TxResult<()> {
        let used = self.used + TxCredit::of_bytes(data.len() as u64);
        if !used.le(&self.prepared) {
            return Err(TxError::CreditExceeded {
                used,
                prepared: self.prepared,
            });
        }
        self.used = used;
        self.regions.push(CapturedRegion {
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn capture_payload(&mut self, data: &[u8]) -> TxResult<()> {
        let used = (self.payload.len() + data.len()) as u64;
        if used > self.payload_reserved {
            return Err(TxError::PayloadExceeded {
                used,
                reserved: self.payload_reserved,
            });
        }
        self.payload.extend_from_slice(data);
        Ok(())
    }

    fn close(self: Box<Self>, on_persistent: PersistentCallback) {
        let MemTx {
            id,
            regions,
            payload,
            shared,
            ..
        } = *self;
        let commit = PendingCommit::new(id, regions, payload, on_persistent);
        if let Err(e) = shared.committer.submit(commit) {
            log_event_with_fields(
                Event::TxCloseFailed,
                &[("error", &e.to_string()), ("tx", &id.to_string())],
            );
        }
    }
}

impl FailurePlan {
    /// Whether open number `attempt` (1-based) is made to fail
    pub fn fails(&self, attempt: u64) -> bool {
        match self {
            FailurePlan::Never => false,
            FailurePlan::NthOpen(n) => attempt == *n,
            FailurePlan::FromNthOpen(n) => attempt >= *n,
            FailurePlan::Always => true,
        }
    }
}
