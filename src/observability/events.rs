//! Observable events
//!
//! Every lifecycle step worth a log line has a typed event here, so the
//! set of emitted event names is closed and greppable.

use std::fmt;

use super::logger::Severity;

/// Observable events in aerotx
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Bulk pool lifecycle
    /// Pool constructed, placement computed
    BulkInit,
    /// `run` started all workers
    BulkRunBegin,
    /// A worker step was scheduled on its lane
    BulkWorkerStep,
    /// A batch was accumulated and is being opened
    BulkBatchOpen,
    /// A worker reached `finish`
    BulkWorkerFinished,
    /// Every worker finished, pool completion fired
    BulkComplete,
    /// A put was rejected after a global failure
    BulkPutRejected,
    /// `end` closed every partition
    BulkEnd,
    /// An item's do-callback reported a non-zero result
    BulkItemFailed,

    // Transactions
    /// Transaction open failed (pool-wide failure)
    TxOpenFailed,
    /// Closed transaction could not be made persistent
    TxCloseFailed,
    /// Transaction became persistent
    TxPersistent,

    // Queue
    /// Queue drained after a failure or at pool completion
    QueueDrained,
    /// Queue finalized while items were still resident
    QueueFiniNotDrained,

    // Ops
    /// Op dropped while still ACTIVE
    OpAbandoned,

    // Locality lanes
    /// Lane executor started
    LaneStart,
    /// A continuation was posted after the lane stopped
    LanePostFailed,

    // Reference log
    /// A group of closed transactions was flushed together
    MemLogGroupCommit,
    /// Flusher thread stopped
    MemLogShutdown,

    // CLI
    /// Configuration loaded
    ConfigLoaded,
    /// Workload run complete
    RunComplete,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BulkInit => "BULK_INIT",
            Event::BulkRunBegin => "BULK_RUN_BEGIN",
            Event::BulkWorkerStep => "BULK_WORKER_STEP",
            Event::BulkBatchOpen => "BULK_BATCH_OPEN",
            Event::BulkWorkerFinished => "BULK_WORKER_FINISHED",
            Event::BulkComplete => "BULK_COMPLETE",
            Event::BulkPutRejected => "BULK_PUT_REJECTED",
            Event::BulkEnd => "BULK_END",
            Event::BulkItemFailed => "BULK_ITEM_FAILED",

            Event::TxOpenFailed => "TX_OPEN_FAILED",
            Event::TxCloseFailed => "TX_CLOSE_FAILED",
            Event::TxPersistent => "TX_PERSISTENT",

            Event::QueueDrained => "QUEUE_DRAINED",
            Event::QueueFiniNotDrained => "QUEUE_FINI_NOT_DRAINED",

            Event::OpAbandoned => "OP_ABANDONED",

            Event::LaneStart => "LANE_START",
            Event::LanePostFailed => "LANE_POST_FAILED",

            Event::MemLogGroupCommit => "MEMLOG_GROUP_COMMIT",
            Event::MemLogShutdown => "MEMLOG_SHUTDOWN",

            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::RunComplete => "RUN_COMPLETE",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::BulkWorkerStep
            | Event::BulkBatchOpen
            | Event::TxPersistent
            | Event::MemLogGroupCommit
            | Event::LaneStart => Severity::Trace,
            Event::BulkPutRejected | Event::BulkItemFailed | Event::OpAbandoned => Severity::Warn,
            Event::TxOpenFailed
            | Event::TxCloseFailed
            | Event::QueueFiniNotDrained
            | Event::LanePostFailed => Severity::Error,
            _ => Severity::Info,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
