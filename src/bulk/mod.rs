//! Batched transaction execution
//!
//! `TxBulk` turns a stream of caller items into credit-bounded
//! transactions, processed by a fixed set of workers spread over
//! locality lanes. Each worker serves one partition queue and cycles
//! through four steps, each posted as a continuation onto its lane:
//!
//! ```text
//!   fetch --get--> init --open--> close --persistent--> gc --+
//!     ^                                                      |
//!     +------------------------------------------------------+
//!
//!   fetch (queue closed and drained) -> finish
//!   open failed                      -> drain every queue -> finish
//! ```
//!
//! - **fetch** parks the worker's op on its partition queue
//! - **init** accumulates more items from the same partition while the
//!   engine's break predicates allow and the item cap is not reached,
//!   then opens one transaction for the whole batch
//! - **close** runs `BulkWork::execute` for each item in order and
//!   closes the transaction
//! - **gc** runs `BulkWork::done` for each item once the transaction is
//!   persistent
//!
//! A failed open is fatal for the pool: every queue is drained and
//! closed, later puts are rejected, and every worker finishes without
//! running further items. The pool completion fires once all workers
//! have finished; `status` then reports the first non-zero worker
//! result in finish order.
//!
//! Lock order: pool state, then worker, then queue.

mod config;
mod errors;
mod placement;
mod pool;
mod worker;

pub use config::BulkConfig;
pub use errors::{BulkError, BulkResult};
pub use placement::{placement, Placement};
pub use pool::TxBulk;

use serde::Serialize;

use crate::credit::TxCredit;
use crate::op::OpHandle;
use crate::tx::Transaction;

/// Where and in which transaction an item is being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerContext {
    pub worker: usize,
    pub partition: usize,
    pub locality: usize,
    pub tx_id: u64,
}

/// A queued item with its size estimates
#[derive(Debug)]
pub struct BulkItem<T> {
    /// Caller's item
    pub item: T,
    /// Credit the item is expected to consume
    pub credit: TxCredit,
    /// Payload bytes the item is expected to capture
    pub payload: u64,
}

/// Caller-supplied processing of items
pub trait BulkWork: Send + Sync + 'static {
    /// Item type carried through the partition queues
    type Item: Send + 'static;

    /// Applies `item` inside `tx`
    ///
    /// `op` is fresh and INIT. The worker waits for it to reach DONE
    /// before moving to the next item, so it must be completed before
    /// returning or from another lane. A non-zero result code set on
    /// `op` is logged; the item still counts as executed.
    fn execute(
        &self,
        tx: &mut dyn Transaction,
        item: &mut Self::Item,
        ctx: &WorkerContext,
        op: &OpHandle,
    );

    /// Called once the transaction holding `item` is persistent
    fn done(&self, item: Self::Item, ctx: &WorkerContext);
}
