//! Transaction collaborators
//!
//! The batching engine does not implement transactions. It drives any
//! engine that can open a transaction for a credit and a payload budget,
//! report ACTIVE or FAILED asynchronously, and report PERSISTENT once a
//! closed transaction is durable.
//!
//! Lifecycle seen through these traits:
//!
//! ```text
//! open(credit, payload) --> on_open(Ok(tx))  --> capture* --> close --> on_persistent(Ok(id))
//!                       \-> on_open(Err(e))                         \-> on_persistent(Err(e))
//! ```

mod errors;

pub use errors::{TxError, TxResult};

use crate::credit::TxCredit;

/// Called once with the opened transaction or the open failure
pub type OpenCallback = Box<dyn FnOnce(TxResult<Box<dyn Transaction>>) + Send + 'static>;

/// Called exactly once per closed transaction
///
/// Receives the transaction id once it is persistent, or the error that
/// kept it from becoming persistent.
pub type PersistentCallback = Box<dyn FnOnce(TxResult<u64>) + Send + 'static>;

/// An open transaction
pub trait Transaction: Send {
    /// Engine-assigned identifier
    fn id(&self) -> u64;

    /// Credit the transaction was opened with
    fn prepared(&self) -> TxCredit;

    /// Credit consumed by captures so far
    fn used(&self) -> TxCredit;

    /// Captures `data` as one region at `offset`
    ///
    /// Fails when the capture would exceed the prepared credit.
    fn capture(&mut self, offset: u64, data: &[u8]) -> TxResult<()>;

    /// Appends opaque payload bytes
    ///
    /// Fails when the payload would exceed the reserved budget.
    fn capture_payload(&mut self, data: &[u8]) -> TxResult<()>;

    /// Closes the transaction; `on_persistent` fires exactly once, when it
    /// is durable or when it can no longer become durable
    fn close(self: Box<Self>, on_persistent: PersistentCallback);
}

/// Source of transactions and the batch sizing policy
pub trait TxEngine: Send + Sync {
    /// Opens a transaction sized to `credit` and `payload` bytes
    ///
    /// `on_open` may run before `open` returns or later on another
    /// thread.
    fn open(&self, credit: TxCredit, payload: u64, on_open: OpenCallback);

    /// Whether adding `candidate` to a batch already worth `accum` would
    /// overflow one transaction
    fn should_break(&self, accum: &TxCredit, candidate: &TxCredit) -> bool;

    /// Payload counterpart of `should_break`
    fn payload_should_break(&self, _accum: u64, _candidate: u64) -> bool {
        false
    }
}
